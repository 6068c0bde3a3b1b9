//! Offline-first cache and synchronization layer for browsing a remote
//! media catalog.
//!
//! - [`cache`]: durable per-parent item store plus a TTL memory tier
//! - [`catalog`]: request layer with retry, conditional revalidation and
//!   size-gated decoding
//! - [`sync`]: the policy layer driving both

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod sync;

pub use error::{FetchError, StorageError};
