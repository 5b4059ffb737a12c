pub mod api;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod init;
pub mod push;
pub mod stream;

pub use crate::api::ApiClient;
pub use crate::cache::{CacheCoordinator, CacheKey, StalenessTier};
pub use crate::cancel::{CancellationToken, RequestManager};
pub use crate::config::{Config, Endpoints};
pub use crate::error::{AppError, ErrorCode, Result};
pub use crate::init::{AppState, app_init};
pub use crate::push::{PushChannel, PushHub, PushMessage, Topic};
pub use crate::stream::{SessionStatus, StreamEvent, StreamSession, StreamSessionState};
