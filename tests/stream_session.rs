use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
use url::Url;

use casewatch::cache::{CacheCoordinator, CacheKey};
use casewatch::error::{AppError, ErrorCode, Result};
use casewatch::stream::{
    ByteStream, RetryPolicy, SessionStatus, StreamEventKind, StreamSession, StreamTransport,
};
use casewatch::Endpoints;

// ============================================================================
// Scripted transport
// ============================================================================

enum Attempt {
    Fail(&'static str),
    Body(Vec<&'static str>),
    BodyThenFail(Vec<&'static str>, &'static str),
    Pending,
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    opens: AtomicUsize,
    urls: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    fn new(attempts: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(attempts.into()),
            ..Self::default()
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        let attempt = self.script.lock().pop_front();
        match attempt {
            Some(Attempt::Body(chunks)) => {
                let chunks: Vec<Result<Bytes>> =
                    chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            Some(Attempt::BodyThenFail(chunks, message)) => {
                let mut items: Vec<Result<Bytes>> =
                    chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
                items.push(Err(AppError::transport(message)));
                Ok(futures::stream::iter(items).boxed())
            }
            Some(Attempt::Pending) => std::future::pending().await,
            Some(Attempt::Fail(message)) => Err(AppError::transport(message)),
            None => Err(AppError::transport("script exhausted")),
        }
    }
}

fn endpoints() -> Endpoints {
    Endpoints::new("http://backend.test", "api/v1", None).unwrap()
}

fn session(transport: Arc<ScriptedTransport>) -> StreamSession {
    StreamSession::new(transport, endpoints())
}

const FULL_RUN: &[&str] = &[
    "data: {\"event\":\"stage_start\",\"stage\":\"policy_analysis\",\"percent\":0}\n\n",
    "data: {\"event\":\"payer_start\",\"payer_name\":\"Cigna\",\"per",
    "cent\":10}\n\ndata: {\"event\":\"progress\",\"message\":\"Reading criteria\",\"percent\":40}\n",
    "\ndata: {\"event\":\"payer_complete\",\"payer_name\":\"Cigna\",\"approval_likelihood\":0.82,\"percent\":80}\n\n",
    "data: {\"event\":\"stage_complete\",\"percent\":95}\n\n",
    "data: {\"event\":\"done\"}\n\n",
];

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_run_reaches_done_in_order() {
    let transport = ScriptedTransport::new(vec![Attempt::Body(FULL_RUN.to_vec())]);
    let session = session(transport.clone());

    let run = session.start("case-1", "policy_analysis", true).unwrap();
    let state = session.wait_for_terminal().await;
    run.await.unwrap();

    assert_eq!(state.status, SessionStatus::Done);
    assert_eq!(state.percent, 100.0);
    assert!(state.error.is_none());
    let kinds: Vec<_> = state.events.iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![
            StreamEventKind::StageStart,
            StreamEventKind::PayerStart,
            StreamEventKind::Progress,
            StreamEventKind::PayerComplete,
            StreamEventKind::StageComplete,
            StreamEventKind::Done,
        ]
    );
    assert_eq!(
        state.result.as_ref().map(|e| e.event),
        Some(StreamEventKind::StageComplete)
    );
    assert_eq!(transport.opens(), 1);
    assert_eq!(
        transport.urls.lock()[0].as_str(),
        "http://backend.test/api/v1/cases/case-1/run-stage-stream/policy_analysis?refresh=true"
    );
}

#[tokio::test(start_paused = true)]
async fn test_eof_without_done_ends_in_done() {
    let transport = ScriptedTransport::new(vec![Attempt::Body(vec![
        "data: {\"event\":\"progress\",\"percent\":30}\n\n",
        "data: {\"event\":\"progress\",\"percent\":60}",
    ])]);
    let session = session(transport);

    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Done);
    assert_eq!(state.events.len(), 2);
    assert_eq!(state.percent, 60.0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_is_skipped() {
    let transport = ScriptedTransport::new(vec![Attempt::Body(vec![
        "data: {\"event\":\"progress\",\"percent\":10}\n\n",
        "data: {not json\n\n",
        "data: {\"event\":\"done\"}\n\n",
    ])]);
    let session = session(transport);

    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Done);
    assert_eq!(state.events.len(), 2);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_failure_reconnects_after_one_second() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Fail("connection reset"),
        Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"]),
    ]);
    let session = session(transport.clone());

    let started = Instant::now();
    session.start("case-1", "analysis", false).unwrap().await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(session.status(), SessionStatus::Done);
    assert_eq!(session.retries(), 1);
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_surface_last_error() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Fail("connection reset"),
        Attempt::Fail("connection reset"),
        Attempt::Fail("gateway unreachable"),
    ]);
    let session = session(transport.clone());

    let started = Instant::now();
    session.start("case-1", "analysis", false).unwrap().await.unwrap();

    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some("gateway unreachable"));
    assert_eq!(transport.opens(), 3);
    assert_eq!(session.retries(), 2);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_events_already_applied() {
    let transport = ScriptedTransport::new(vec![
        Attempt::BodyThenFail(
            vec!["data: {\"event\":\"progress\",\"percent\":50}\n\n"],
            "connection reset mid-body",
        ),
        Attempt::Body(vec![
            "data: {\"event\":\"progress\",\"percent\":70}\n\n",
            "data: {\"event\":\"done\"}\n\n",
        ]),
    ]);
    let session = session(transport.clone());

    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Done);
    assert_eq!(state.events.len(), 3);
    assert_eq!(state.percent, 70.0);
    assert_eq!(transport.opens(), 2);
    let urls = transport.urls.lock();
    assert_eq!(urls[0], urls[1]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_budget_fails_on_first_error() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Fail("reset"),
        Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"]),
    ]);
    let policy = RetryPolicy {
        max_retries: 0,
        ..RetryPolicy::default()
    };
    let session = StreamSession::build(transport.clone(), endpoints(), policy, None);

    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_message_while_waiting() {
    let transport = ScriptedTransport::new(vec![Attempt::Fail("reset"), Attempt::Pending]);
    let session = session(transport);
    let mut rx = session.subscribe();

    session.start("case-1", "analysis", false).unwrap();
    let state = rx
        .wait_for(|s| s.message.starts_with("Connection lost"))
        .await
        .unwrap()
        .clone();
    assert_eq!(state.status, SessionStatus::Connecting);
    assert_eq!(state.message, "Connection lost. Reconnecting in 1s (attempt 1/2)");
    session.abort();
}

// ============================================================================
// Abort / reset / restart
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_abort_while_connecting_fails_with_aborted() {
    let transport = ScriptedTransport::new(vec![Attempt::Pending]);
    let session = session(transport.clone());

    let run = session.start("case-1", "analysis", false).unwrap();
    tokio::task::yield_now().await;
    session.abort();
    run.await.unwrap();

    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Stream aborted"));
    assert_eq!(state.message, "Stream aborted");
}

#[tokio::test]
async fn test_abort_while_idle_keeps_idle() {
    let session = session(ScriptedTransport::new(vec![]));
    session.abort();
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.snapshot().error.is_none());
}

#[tokio::test]
async fn test_abort_after_done_keeps_done() {
    let transport = ScriptedTransport::new(vec![Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"])]);
    let session = session(transport);
    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    session.abort();
    assert_eq!(session.status(), SessionStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_retry_wait_prevents_reconnect() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Fail("reset"),
        Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"]),
    ]);
    let session = session(transport.clone());
    let mut rx = session.subscribe();

    let run = session.start("case-1", "analysis", false).unwrap();
    rx.wait_for(|s| s.message.starts_with("Connection lost"))
        .await
        .unwrap();
    session.abort();
    run.await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(session.snapshot().error.as_deref(), Some("Stream aborted"));
}

#[tokio::test(start_paused = true)]
async fn test_restart_supersedes_previous_run() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Pending,
        Attempt::Body(vec![
            "data: {\"event\":\"progress\",\"percent\":20}\n\n",
            "data: {\"event\":\"done\"}\n\n",
        ]),
    ]);
    let session = session(transport.clone());

    let first = session.start("case-1", "analysis", false).unwrap();
    while transport.opens() == 0 {
        tokio::task::yield_now().await;
    }
    let first_token = session.cancellation_token().unwrap();

    let second = session.start("case-1", "analysis", true).unwrap();
    assert!(first_token.is_cancelled());
    first.await.unwrap();
    second.await.unwrap();

    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Done);
    assert_eq!(state.events.len(), 2);
    assert!(state.error.is_none());
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_terminal_resolves_when_reset_mid_run() {
    let transport = ScriptedTransport::new(vec![Attempt::Pending]);
    let session = Arc::new(session(transport.clone()));
    let run = session.start("case-1", "analysis", false).unwrap();
    while transport.opens() == 0 {
        tokio::task::yield_now().await;
    }

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.wait_for_terminal().await })
    };
    tokio::task::yield_now().await;
    session.reset();

    let state = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("reset releases the waiter")
        .unwrap();
    assert_eq!(state.status, SessionStatus::Idle);
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_initial_snapshot() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Fail("reset"),
        Attempt::Body(FULL_RUN.to_vec()),
    ]);
    let session = session(transport);
    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    assert_eq!(session.retries(), 1);

    session.reset();
    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Idle);
    assert!(state.events.is_empty());
    assert_eq!(state.percent, 0.0);
    assert!(state.result.is_none());
    assert!(state.error.is_none());
    assert_eq!(session.retries(), 0);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_missing_identifier_rejected_before_network() {
    let transport = ScriptedTransport::new(vec![]);
    let session = session(transport.clone());

    let err = session.start("   ", "analysis", false).unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingIdentifier);
    let err = session.start("case-1", "", false).unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingIdentifier);

    assert_eq!(session.status(), SessionStatus::Idle);
    assert_eq!(transport.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_event_is_terminal_without_retry() {
    let transport = ScriptedTransport::new(vec![
        Attempt::Body(vec![
            "data: {\"event\":\"progress\",\"percent\":35}\n\n",
            "data: {\"event\":\"error\",\"message\":\"Payer criteria unavailable\"}\n\n",
            "data: {\"event\":\"done\"}\n\n",
        ]),
        Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"]),
    ]);
    let session = session(transport.clone());

    session.start("case-1", "analysis", false).unwrap().await.unwrap();
    let state = session.snapshot();
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Payer criteria unavailable"));
    assert_eq!(state.percent, 35.0);
    assert_eq!(state.events.len(), 2);
    assert_eq!(transport.opens(), 1);
}

// ============================================================================
// Cache interplay
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_done_invalidates_case_keys() {
    let cache = Arc::new(CacheCoordinator::default());
    cache.set(CacheKey::case("case-1"), json!({"id": "case-1"}));
    cache.set(CacheKey::strategies("case-1"), json!([]));
    cache.set(CacheKey::cases(), json!([]));
    cache.set(CacheKey::case("case-2"), json!({"id": "case-2"}));

    let transport = ScriptedTransport::new(vec![Attempt::Body(vec!["data: {\"event\":\"done\"}\n\n"])]);
    let session =
        StreamSession::build(transport, endpoints(), RetryPolicy::default(), Some(cache.clone()));
    session.start("case-1", "analysis", false).unwrap().await.unwrap();

    assert!(cache.is_invalidated(&CacheKey::case("case-1")));
    assert!(cache.is_invalidated(&CacheKey::strategies("case-1")));
    assert!(cache.is_invalidated(&CacheKey::cases()));
    assert!(!cache.is_invalidated(&CacheKey::case("case-2")));
}

#[tokio::test(start_paused = true)]
async fn test_updates_stream_yields_terminal_snapshot() {
    let transport = ScriptedTransport::new(vec![Attempt::Body(FULL_RUN.to_vec())]);
    let session = session(transport);
    let mut updates = session.updates();

    session.start("case-1", "analysis", false).unwrap();
    let mut last = None;
    while let Some(state) = updates.next().await {
        let terminal = state.status.is_terminal();
        last = Some(state);
        if terminal {
            break;
        }
    }
    assert_eq!(last.unwrap().status, SessionStatus::Done);
}
