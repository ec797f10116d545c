//! Generic caching layer for reference data.
//!
//! This module provides a domain-agnostic cache that:
//! - Persists whole entity lists per partition, keyed by entity id
//! - Stamps every full replace with a `saved_at` time and expires it after a TTL
//! - Serves fresh cache immediately and revalidates in a detached task
//! - Falls back to whatever is stored when the network is unavailable

mod diff;
mod layer;
mod storage;
mod traits;

pub use diff::{diff_by_key, Diff};
pub use layer::{CacheLayer, CacheStatus, Lookup, SyncReport};
pub use storage::{CacheStorage, NoopStorage, Snapshot, SqliteStorage, StorageBackend};
pub use traits::{system_clock, CacheResult, CacheSource, Cacheable, Clock, Freshness};
