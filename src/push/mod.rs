pub mod channel;
pub mod hub;
pub mod messages;
pub mod routing;
pub mod transport;

pub use channel::{LatestCallback, Listener, PushChannel, Subscription};
pub use hub::PushHub;
pub use messages::{PushKind, PushMessage, Topic};
pub use routing::{apply_invalidation, attach_invalidation, invalidation_keys};
pub use transport::{FrameStream, PushConnection, PushTransport, WsPushTransport};
