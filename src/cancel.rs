use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
pub use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

/// `?`-friendly cancellation check for suspension points.
pub trait CancelCheck {
    fn check(&self) -> Result<()>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::cancelled())
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// REQUEST MANAGER
// ============================================================================

/// Registry of live tokens so a collaborator can cancel work it did not start.
#[derive(Default)]
pub struct RequestManager {
    active_requests: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: String) -> CancellationToken {
        let token = CancellationToken::new();
        self.track(request_id, token.clone()).await;
        token
    }

    /// Tracks an existing token; a previous token under the same id is cancelled.
    pub async fn track(&self, request_id: String, token: CancellationToken) {
        let mut requests = self.active_requests.write().await;
        if let Some(previous) = requests.insert(request_id, token) {
            previous.cancel();
        }
    }

    pub async fn cancel(&self, request_id: &str) -> bool {
        let requests = self.active_requests.read().await;
        if let Some(token) = requests.get(request_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn cancel_all(&self) -> usize {
        let requests = self.active_requests.read().await;
        requests.values().for_each(|token| token.cancel());
        requests.len()
    }

    pub async fn unregister(&self, request_id: &str) {
        let mut requests = self.active_requests.write().await;
        requests.remove(request_id);
    }

    pub async fn len(&self) -> usize {
        self.active_requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(token.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_is_immediate_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(10), token.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test]
    async fn test_request_manager_cancel_and_unregister() {
        let manager = RequestManager::new();
        let token = manager.register("stream-1".to_string()).await;
        assert!(manager.cancel("stream-1").await);
        assert!(token.is_cancelled());
        assert!(!manager.cancel("missing").await);

        manager.unregister("stream-1").await;
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_track_replaces_and_cancels_previous() {
        let manager = RequestManager::new();
        let first = manager.register("case-7".to_string()).await;
        let second = CancellationToken::new();
        manager.track("case-7".to_string(), second.clone()).await;
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(manager.cancel_all().await, 1);
        assert!(second.is_cancelled());
    }
}
