//! Change detection for background refreshes.

use crate::cache::MemoryCacheEntry;
use crate::catalog::ItemsPage;

/// Whether a refreshed page differs from what is cached.
///
/// Checked in order: total count, item count, then ids pairwise by position.
/// Payload changes under an unchanged id sequence are not detected.
pub fn slice_changed(cached: &MemoryCacheEntry, fresh: &ItemsPage) -> bool {
  if cached.total_count != fresh.total_count {
    return true;
  }
  if cached.items.len() != fresh.items.len() {
    return true;
  }
  cached
    .items
    .iter()
    .zip(&fresh.items)
    .any(|(old, new)| old.id != new.id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::CatalogRecord;

  fn entry(ids: &[&str], total: u64) -> MemoryCacheEntry {
    MemoryCacheEntry {
      items: ids.iter().map(|id| CatalogRecord::with_id(*id)).collect(),
      total_count: total,
      updated_at_ms: 1,
    }
  }

  fn page(ids: &[&str], total: u64) -> ItemsPage {
    ItemsPage {
      items: ids.iter().map(|id| CatalogRecord::with_id(*id)).collect(),
      total_count: total,
      start_index: 0,
    }
  }

  #[test]
  fn identical_slices_are_unchanged() {
    assert!(!slice_changed(&entry(&["a", "b"], 2), &page(&["a", "b"], 2)));
  }

  #[test]
  fn total_count_change_is_detected() {
    assert!(slice_changed(&entry(&["a", "b"], 2), &page(&["a", "b"], 3)));
  }

  #[test]
  fn length_change_is_detected() {
    assert!(slice_changed(&entry(&["a", "b"], 2), &page(&["a"], 2)));
  }

  #[test]
  fn reorder_is_detected() {
    assert!(slice_changed(&entry(&["a", "b"], 2), &page(&["b", "a"], 2)));
  }
}
