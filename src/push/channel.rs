use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::cancel::CancellationToken;
use crate::error::{AppError, Result, log_error};
use crate::push::messages::{PushMessage, Topic};
use crate::push::transport::{FrameStream, PushConnection, PushTransport};

pub type Listener = Arc<dyn Fn(&PushMessage) + Send + Sync>;

type ListenerList = RwLock<Vec<(u64, Listener)>>;

// ============================================================================
// Subscriptions
// ============================================================================

/// Handle returned by `on_message`; dropping it keeps the listener attached.
pub struct Subscription {
    listeners: Weak<ListenerList>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Callback slot that can be swapped without touching the connection.
#[derive(Clone)]
pub struct LatestCallback {
    current: Arc<RwLock<Listener>>,
}

impl LatestCallback {
    pub fn new(f: impl Fn(&PushMessage) + Send + Sync + 'static) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(f))),
        }
    }

    pub fn update(&self, f: impl Fn(&PushMessage) + Send + Sync + 'static) {
        *self.current.write() = Arc::new(f);
    }

    pub fn call(&self, message: &PushMessage) {
        let f = self.current.read().clone();
        f(message);
    }
}

// ============================================================================
// Push Channel
// ============================================================================

struct ActiveConnection {
    token: CancellationToken,
    outgoing: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

/// One duplex connection for one topic, fanning frames out to listeners in
/// wire order.
pub struct PushChannel {
    topic: Topic,
    url: Url,
    transport: Arc<dyn PushTransport>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    connected: Arc<watch::Sender<bool>>,
    connection: Mutex<Option<ActiveConnection>>,
}

impl PushChannel {
    pub fn new(topic: Topic, url: Url, transport: Arc<dyn PushTransport>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            topic,
            url,
            transport,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener: AtomicU64::new(1),
            connected: Arc::new(connected),
            connection: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Opens the connection. Calling it while connected does nothing.
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| !c.reader.is_finished()) {
            return Ok(());
        }

        let PushConnection { frames, outgoing } = match self.transport.connect(&self.url).await {
            Ok(opened) => opened,
            Err(e) => {
                self.connected.send_replace(false);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        self.connected.send_replace(true);
        let reader = tokio::spawn(read_frames(
            frames,
            self.topic.clone(),
            self.listeners.clone(),
            self.connected.clone(),
            token.clone(),
        ));
        *connection = Some(ActiveConnection {
            token,
            outgoing,
            reader,
        });

        log::info!("🔌 Push channel {} connected", self.topic);
        Ok(())
    }

    /// Closes the connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let active = self.connection.lock().await.take();
        if let Some(active) = active {
            active.token.cancel();
            drop(active.outgoing);
            log::info!("🔌 Push channel {} disconnected", self.topic);
        }
        self.connected.send_replace(false);
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn on_message(&self, f: impl Fn(&PushMessage) + Send + Sync + 'static) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(f)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Same delivery as `on_message`; the name used for the global topic.
    pub fn on_notification(
        &self,
        f: impl Fn(&PushMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.on_message(f)
    }

    /// Registers a listener that always calls whatever `callback` holds now.
    pub fn on_message_latest(&self, callback: &LatestCallback) -> Subscription {
        let callback = callback.clone();
        self.on_message(move |message| callback.call(message))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Sends one client frame over the open connection.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        let outgoing = match self.connection.lock().await.as_ref() {
            Some(active) => active.outgoing.clone(),
            None => {
                return Err(AppError::transport(format!(
                    "push channel {} is not connected",
                    self.topic
                )));
            }
        };
        outgoing
            .send(text)
            .await
            .map_err(|_| AppError::transport(format!("push channel {} closed", self.topic)))
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(active) = self.connection.get_mut().take() {
            active.token.cancel();
        }
    }
}

async fn read_frames(
    mut frames: FrameStream,
    topic: Topic,
    listeners: Arc<ListenerList>,
    connected: Arc<watch::Sender<bool>>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(text)) => match serde_json::from_str::<PushMessage>(&text) {
                Ok(mut message) => {
                    if message.case_id.is_none() {
                        message.case_id = topic.case_id().map(str::to_string);
                    }
                    deliver(&listeners, &message);
                }
                Err(e) => log::warn!("Dropping push frame on {}: {}", topic, e),
            },
            Some(Err(e)) => {
                log_error(&e);
                break;
            }
            None => {
                log::info!("Push channel {} closed by server", topic);
                break;
            }
        }
    }

    // A deliberate disconnect already cleared the flag, possibly followed by
    // a fresh connect that set it again.
    if !token.is_cancelled() {
        connected.send_replace(false);
    }
}

fn deliver(listeners: &ListenerList, message: &PushMessage) {
    let current: Vec<Listener> = listeners.read().iter().map(|(_, f)| f.clone()).collect();
    for listener in current {
        listener(message);
    }
}
