pub mod decoder;
pub mod events;
pub mod session;
pub mod state;
pub mod transport;

pub use decoder::{ChunkDecoder, SseFramer};
pub use events::{StreamEvent, StreamEventKind};
pub use session::{RetryPolicy, StageRequest, StreamSession};
pub use state::{SessionStatus, StreamSessionState};
pub use transport::{ByteStream, HttpStreamTransport, StreamTransport};
