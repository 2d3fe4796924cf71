//! Two-tier response cache and the throttle gate built on it.
//!
//! - [`CacheStore`] keeps typed values in a cost-bounded memory tier and
//!   encoded bytes on disk, with an age and size sweep
//! - [`RequestTimes`] persists when each request key was last fetched
//! - [`CacheLayer`] decides per call whether to answer from the store or the
//!   network, coalescing concurrent fetches of the same key

pub mod disk;
mod layer;
mod memory;
mod store;
mod time_records;
mod traits;

pub use disk::SweepReport;
pub use layer::CacheLayer;
pub use memory::MemoryTier;
pub use store::{CacheConfig, CacheStore, DiskCodec, JsonCodec, PendingWrite, NAMESPACE};
pub use time_records::{RequestTimes, REQUEST_TIME_KEY};
pub use traits::{CacheResult, CacheSource, Cached, Cacheable};
