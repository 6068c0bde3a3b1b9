//! Synchronization policy: stale-while-revalidate, pagination merge and
//! change detection on top of the cache tiers and the catalog client.

mod diff;
mod event;
pub mod filter;
mod orchestrator;

pub use diff::slice_changed;
pub use event::{LoadKind, SyncEvent, ViewUpdate};
pub use orchestrator::{LoadPhase, LoadStart, SyncOptions, SyncOrchestrator};
