pub mod clock;
pub mod invalidation;
pub mod keys;
pub mod mutation;
pub mod persist;
pub mod store;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::CacheKey;
pub use mutation::{MutationPlan, MutationState, PendingMutation};
pub use persist::{CachePersister, DurableStore, FileStore, MemoryStore, PersistedCache};
pub use store::{CacheCoordinator, CacheEntry, EntryStatus};
pub use tier::StalenessTier;
