//! Two-tier caching of parent listings.
//!
//! This module provides:
//! - A durable, per-parent ordered item store backed by SQLite
//! - A memory tier with separate fresh and stale TTLs, hydrated lazily from disk
//! - Write-through helpers so both tiers always move together

mod memory;
mod storage;
mod traits;

pub use memory::{CacheStats, Lookup, MemoryCache, MemoryCacheEntry};
pub use storage::{NoopStorage, PersistedSlice, SliceMeta, SliceStorage, SqliteStorage};
#[cfg(test)]
pub(crate) use storage::FailingStorage;
pub use traits::{is_within, CacheSource, Clock, Freshness, ManualClock, SystemClock};
