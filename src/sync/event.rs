use crate::cache::CacheSource;
use crate::catalog::{CatalogRecord, FetchOutcome};
use crate::error::FetchError;

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
  /// Blocking first page; the view shows a loading state
  Initial,
  /// Background revalidation of data already on screen
  Refresh,
  /// Blocking next page appended after the current items
  More,
}

/// Completion of a spawned fetch, delivered back to the control task.
#[derive(Debug)]
pub struct SyncEvent {
  pub parent_id: String,
  pub kind: LoadKind,
  /// Generation of the parent when the fetch was issued
  pub generation: u64,
  pub start_position: u64,
  pub result: Result<FetchOutcome, FetchError>,
}

/// Notifications for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
  Loading {
    parent_id: String,
    loading: bool,
  },
  ItemsReplaced {
    parent_id: String,
    items: Vec<CatalogRecord>,
    total_count: u64,
    source: CacheSource,
  },
  ItemsAppended {
    parent_id: String,
    items: Vec<CatalogRecord>,
    total_count: u64,
  },
  TotalCountChanged {
    parent_id: String,
    total_count: u64,
  },
  LoadError {
    parent_id: String,
    error: FetchError,
  },
}
