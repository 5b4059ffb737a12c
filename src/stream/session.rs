use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use url::Url;
use uuid::Uuid;

use crate::cache::{CacheCoordinator, invalidation};
use crate::cancel::{CancelCheck, CancellationToken};
use crate::config::Endpoints;
use crate::error::{AppError, Result, log_error, require_id};
use crate::stream::decoder::ChunkDecoder;
use crate::stream::events::StreamEvent;
use crate::stream::state::{ABORTED_MESSAGE, SessionStatus, StreamSessionState};
use crate::stream::transport::StreamTransport;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Linear backoff: the Nth reconnect waits `N * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

// ============================================================================
// REQUEST STRUCTURES
// ============================================================================

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub session_id: Uuid,
    pub case_id: String,
    pub stage: String,
    pub refresh: bool,
    pub url: Url,
}

#[derive(Default)]
struct RunSlot {
    generation: u64,
    token: Option<CancellationToken>,
    retries: u32,
}

// ============================================================================
// STREAM SESSION
// ============================================================================

/// Controller for one stage run at a time.
///
/// Starting again, aborting or resetting bumps the slot generation; a run
/// task whose generation is no longer current stops publishing state.
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn StreamTransport>,
    endpoints: Endpoints,
    policy: RetryPolicy,
    cache: Option<Arc<CacheCoordinator>>,
    state: watch::Sender<StreamSessionState>,
    slot: Mutex<RunSlot>,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn StreamTransport>, endpoints: Endpoints) -> Self {
        Self::build(transport, endpoints, RetryPolicy::default(), None)
    }

    pub fn build(
        transport: Arc<dyn StreamTransport>,
        endpoints: Endpoints,
        policy: RetryPolicy,
        cache: Option<Arc<CacheCoordinator>>,
    ) -> Self {
        let (state, _) = watch::channel(StreamSessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                transport,
                endpoints,
                policy,
                cache,
                state,
                slot: Mutex::new(RunSlot::default()),
            }),
        }
    }

    /// Starts streaming `stage` for `case_id`, replacing any run in flight.
    ///
    /// Identifiers are validated before anything else happens; the returned
    /// handle resolves once the run reaches a terminal state or is superseded.
    pub fn start(&self, case_id: &str, stage: &str, refresh: bool) -> Result<JoinHandle<()>> {
        let case_id = require_id("case id", case_id)?;
        let stage = require_id("stage", stage)?;
        let request = StageRequest {
            session_id: Uuid::now_v7(),
            case_id: case_id.to_string(),
            stage: stage.to_string(),
            refresh,
            url: self.inner.endpoints.stage_stream(case_id, stage, refresh)?,
        };

        let (generation, token) = {
            let mut slot = self.inner.slot.lock();
            if let Some(previous) = slot.token.take() {
                log::debug!("Cancelling previous stream before restart");
                previous.cancel();
            }
            slot.generation += 1;
            slot.retries = 0;
            let token = CancellationToken::new();
            slot.token = Some(token.clone());
            self.inner.state.send_replace(StreamSessionState::connecting());
            (slot.generation, token)
        };

        log::info!(
            "▶️  Stream {} started: case={} stage={} refresh={}",
            request.session_id,
            request.case_id,
            request.stage,
            request.refresh
        );

        Ok(tokio::spawn(run(self.inner.clone(), generation, token, request)))
    }

    /// Cancels the run in flight. An active run ends in `error` with
    /// "Stream aborted"; idle or terminal sessions keep their status.
    pub fn abort(&self) {
        let mut slot = self.inner.slot.lock();
        if let Some(token) = slot.token.take() {
            token.cancel();
        }
        slot.generation += 1;
        let aborted = self.inner.state.send_if_modified(|s| {
            if s.status.is_active() {
                s.fail(ABORTED_MESSAGE);
                true
            } else {
                false
            }
        });
        if aborted {
            log::info!("⏹️  Stream aborted");
        }
    }

    /// Cancels the run in flight and restores the initial snapshot.
    pub fn reset(&self) {
        let mut slot = self.inner.slot.lock();
        if let Some(token) = slot.token.take() {
            token.cancel();
        }
        slot.generation += 1;
        slot.retries = 0;
        self.inner.state.send_replace(StreamSessionState::default());
    }

    pub fn snapshot(&self) -> StreamSessionState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSessionState> {
        self.inner.state.subscribe()
    }

    pub fn updates(&self) -> WatchStream<StreamSessionState> {
        WatchStream::new(self.subscribe())
    }

    /// Reconnect attempts made by the current run.
    pub fn retries(&self) -> u32 {
        self.inner.slot.lock().retries
    }

    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.inner.slot.lock().token.clone()
    }

    /// Waits until the session is `done` or `error` and returns that snapshot.
    ///
    /// A session that is idle, or gets reset while waiting, resolves with the
    /// idle snapshot since no run is left to finish.
    pub async fn wait_for_terminal(&self) -> StreamSessionState {
        let mut rx = self.subscribe();
        match rx
            .wait_for(|s| s.status.is_terminal() || s.status == SessionStatus::Idle)
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(token) = self.inner.slot.lock().token.take() {
            token.cancel();
        }
    }
}

// ============================================================================
// RUN LOOP
// ============================================================================

async fn run(
    inner: Arc<SessionInner>,
    generation: u64,
    token: CancellationToken,
    request: StageRequest,
) {
    let mut retries = 0;

    loop {
        if token.is_cancelled() || !inner.is_current(generation) {
            return;
        }

        match inner.stream_once(generation, &token, &request).await {
            Ok(()) => break,
            Err(e) if e.is_cancelled() || token.is_cancelled() => {
                log::debug!("Stream {} cancelled", request.session_id);
                return;
            }
            Err(e) if e.code.is_retryable() && retries < inner.policy.max_retries => {
                retries += 1;
                inner.record_retry(generation, retries);
                log::warn!(
                    "🔁 Stream {} lost ({}), reconnect {}/{}",
                    request.session_id,
                    e.message,
                    retries,
                    inner.policy.max_retries
                );
                if !inner.wait_before_retry(generation, &token, retries).await {
                    return;
                }
            }
            Err(e) => {
                log_error(&e);
                inner.update(generation, |s| {
                    s.fail(e.message.clone());
                    true
                });
                break;
            }
        }
    }

    inner.settle(generation, &request);
}

impl SessionInner {
    fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// Applies `f` only while `generation` still owns the session.
    fn update(&self, generation: u64, f: impl FnOnce(&mut StreamSessionState) -> bool) -> bool {
        let slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        self.state.send_if_modified(f);
        true
    }

    fn record_retry(&self, generation: u64, retries: u32) {
        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.retries = retries;
        }
    }

    async fn stream_once(
        &self,
        generation: u64,
        token: &CancellationToken,
        request: &StageRequest,
    ) -> Result<()> {
        token.check()?;

        let mut body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AppError::cancelled()),
            opened = self.transport.open(&request.url) => opened?,
        };

        let current = self.update(generation, |s| {
            s.status = SessionStatus::Streaming;
            true
        });
        if !current {
            return Err(AppError::cancelled());
        }

        let mut decoder = ChunkDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AppError::cancelled()),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if self.fold(generation, decoder.push(&chunk))? {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if !self.fold(generation, decoder.finish())? {
                        log::debug!("Stream {} ended without a done event", request.session_id);
                        self.update(generation, |s| {
                            s.finish();
                            true
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Folds events in arrival order; `Ok(true)` once the session is terminal.
    fn fold(&self, generation: u64, events: Vec<StreamEvent>) -> Result<bool> {
        for event in events {
            let mut terminal = false;
            let current = self.update(generation, |s| {
                let applied = s.apply(event);
                terminal = s.status.is_terminal();
                applied
            });
            if !current {
                return Err(AppError::cancelled());
            }
            if terminal {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Shows a per-second countdown; false when cancelled during the wait.
    async fn wait_before_retry(
        &self,
        generation: u64,
        token: &CancellationToken,
        attempt: u32,
    ) -> bool {
        let deadline = Instant::now() + self.policy.delay_for(attempt);
        let max_retries = self.policy.max_retries;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let left = deadline - now;
            let secs = left.as_secs_f64().ceil() as u64;
            let current = self.update(generation, |s| {
                s.status = SessionStatus::Connecting;
                s.message = format!(
                    "Connection lost. Reconnecting in {}s (attempt {}/{})",
                    secs, attempt, max_retries
                );
                true
            });
            if !current {
                return false;
            }

            let step = left.saturating_sub(Duration::from_secs(secs.saturating_sub(1)));
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
        }

        !token.is_cancelled() && self.is_current(generation)
    }

    fn settle(&self, generation: u64, request: &StageRequest) {
        if !self.is_current(generation) {
            return;
        }
        let state = self.state.borrow().clone();

        let keys = match state.status {
            SessionStatus::Done => {
                log::info!(
                    "✅ Stream {} done: {} events, {:.0}%",
                    request.session_id,
                    state.events.len(),
                    state.percent
                );
                invalidation::on_stage_completed(&request.case_id)
            }
            SessionStatus::Error => {
                log::warn!(
                    "❌ Stream {} failed: {}",
                    request.session_id,
                    state.error.as_deref().unwrap_or("unknown error")
                );
                invalidation::on_stage_failed(&request.case_id)
            }
            _ => return,
        };

        if let Some(cache) = &self.cache {
            cache.invalidate_many(&keys);
        }
    }
}
