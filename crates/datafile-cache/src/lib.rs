//! Size-bounded persistent data file cache
//!
//! Stores named byte blobs on disk under a byte ceiling. Each object's
//! most recent write time is kept in a manifest that survives restarts, and
//! the oldest objects are evicted to make room for new writes. Overflowing the
//! ceiling can be allowed per cache or per write.

mod atomic;

pub mod accountant;
pub mod clock;
pub mod config;
pub mod error;
pub mod manifest;
pub mod store;
pub mod types;

pub use accountant::{
    AllocatedBlocks, ExtendedAttributes, FixedOverhead, MetadataOverhead, NoOverhead,
    SizeAccountant,
};
pub use clock::{Clock, SystemClock};
pub use config::{CacheConfig, UNBOUNDED};
pub use error::{CacheError, Result};
pub use manifest::Manifest;
pub use store::CacheStore;
pub use types::{CacheStats, SaveOptions, SaveOutcome, StoredObject};
