//! Process-lifetime memory tier in front of [`SliceStorage`].
//!
//! Writes go through to disk; a disk failure is logged and the memory tier
//! keeps working on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::storage::SliceStorage;
use super::traits::{Clock, Freshness};
use crate::catalog::CatalogRecord;

/// Cached children of one parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCacheEntry {
  /// Raw records in server order, unfiltered
  pub items: Vec<CatalogRecord>,
  pub total_count: u64,
  /// Zero means absent
  pub updated_at_ms: i64,
}

impl MemoryCacheEntry {
  pub fn is_present(&self) -> bool {
    self.updated_at_ms != 0
  }
}

/// Result of looking a parent up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
  Hit {
    freshness: Freshness,
    /// Entry was just loaded from disk
    hydrated: bool,
  },
  Miss,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub hydrations: u64,
}

/// TTL cache of parent listings, hydrated lazily from disk.
pub struct MemoryCache {
  entries: HashMap<String, MemoryCacheEntry>,
  storage: Arc<dyn SliceStorage>,
  clock: Arc<dyn Clock>,
  fresh_ttl: Duration,
  stale_ttl: Duration,
  stats: CacheStats,
}

impl MemoryCache {
  pub fn new(
    storage: Arc<dyn SliceStorage>,
    clock: Arc<dyn Clock>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
  ) -> Self {
    Self {
      entries: HashMap::new(),
      storage,
      clock,
      fresh_ttl,
      stale_ttl,
      stats: CacheStats::default(),
    }
  }

  /// Classify the cached data for `parent_id`, pulling it from disk on a
  /// memory miss. Disk data is taken whatever its age.
  pub fn lookup(&mut self, parent_id: &str) -> Lookup {
    let mut hydrated = false;

    if !self.entries.contains_key(parent_id) {
      match self.storage.read(parent_id, 0, 0) {
        Ok(slice) if slice.updated_at_ms != 0 => {
          debug!(parent_id, count = slice.items.len(), "Hydrated from disk cache");
          self.entries.insert(
            parent_id.to_string(),
            MemoryCacheEntry {
              items: slice.items,
              total_count: slice.total_count,
              updated_at_ms: slice.updated_at_ms,
            },
          );
          self.stats.hydrations += 1;
          hydrated = true;
        }
        Ok(_) => {}
        Err(e) => warn!(parent_id, error = %e, "Disk cache read failed"),
      }
    }

    match self.entries.get(parent_id) {
      Some(entry) if entry.is_present() => {
        self.stats.hits += 1;
        let freshness = Freshness::classify(
          entry.updated_at_ms,
          self.clock.now_ms(),
          self.fresh_ttl,
          self.stale_ttl,
        );
        trace!(parent_id, ?freshness, hydrated, "Cache HIT");
        Lookup::Hit {
          freshness,
          hydrated,
        }
      }
      _ => {
        self.stats.misses += 1;
        trace!(parent_id, "Cache MISS");
        Lookup::Miss
      }
    }
  }

  /// Entry for `parent_id` without touching disk.
  pub fn get(&self, parent_id: &str) -> Option<&MemoryCacheEntry> {
    self.entries.get(parent_id).filter(|e| e.is_present())
  }

  /// Replace the whole listing in both tiers.
  pub fn replace(&mut self, parent_id: &str, items: Vec<CatalogRecord>, total_count: u64) {
    if let Err(e) = self.storage.replace_all(parent_id, &items, total_count) {
      warn!(parent_id, error = %e, "Disk cache write failed; continuing memory-only");
    }
    self.entries.insert(
      parent_id.to_string(),
      MemoryCacheEntry {
        items,
        total_count,
        updated_at_ms: self.clock.now_ms(),
      },
    );
  }

  /// Apply an authoritative refresh of the first page.
  ///
  /// Disk rows are rewritten from position zero and rows whose id is no
  /// longer listed are pruned.
  pub fn reconcile(&mut self, parent_id: &str, items: Vec<CatalogRecord>, total_count: u64) {
    if let Err(e) = self
      .storage
      .upsert_items(parent_id, &items, total_count, true, 0)
    {
      warn!(parent_id, error = %e, "Disk cache refresh failed; continuing memory-only");
    }
    self.entries.insert(
      parent_id.to_string(),
      MemoryCacheEntry {
        items,
        total_count,
        updated_at_ms: self.clock.now_ms(),
      },
    );
  }

  /// Append a page after the current items in both tiers.
  ///
  /// Records whose id is already listed are skipped, so both tiers keep one
  /// row per id. Returns the records actually appended.
  pub fn append(
    &mut self,
    parent_id: &str,
    items: Vec<CatalogRecord>,
    total_count: u64,
  ) -> Vec<CatalogRecord> {
    let now = self.clock.now_ms();
    let entry = self.entries.entry(parent_id.to_string()).or_default();
    let start_position = entry.items.len() as u64;

    let mut seen: HashSet<String> = entry.items.iter().map(|r| r.id.clone()).collect();
    let received = items.len();
    let fresh: Vec<CatalogRecord> = items
      .into_iter()
      .filter(|r| seen.insert(r.id.clone()))
      .collect();
    if fresh.len() != received {
      debug!(
        parent_id,
        skipped = received - fresh.len(),
        "Skipped records already listed"
      );
    }

    if let Err(e) = self
      .storage
      .upsert_items(parent_id, &fresh, total_count, false, start_position)
    {
      warn!(parent_id, error = %e, "Disk cache append failed; continuing memory-only");
    }

    entry.items.extend(fresh.iter().cloned());
    entry.total_count = total_count;
    entry.updated_at_ms = now;
    fresh
  }

  /// Mark the cached listing as confirmed current.
  pub fn touch(&mut self, parent_id: &str) {
    let now = self.clock.now_ms();
    if let Some(entry) = self.entries.get_mut(parent_id) {
      entry.updated_at_ms = now;
    }
    if let Err(e) = self.storage.touch(parent_id) {
      warn!(parent_id, error = %e, "Disk cache touch failed");
    }
  }

  /// Drop `parent_id` from both tiers.
  pub fn invalidate(&mut self, parent_id: &str) {
    self.entries.remove(parent_id);
    if let Err(e) = self.storage.clear_parent(parent_id) {
      warn!(parent_id, error = %e, "Disk cache invalidation failed");
    }
  }

  /// Drop everything from both tiers.
  pub fn clear(&mut self) {
    self.entries.clear();
    if let Err(e) = self.storage.clear_all() {
      warn!(error = %e, "Disk cache reset failed");
    }
  }

  pub fn stats(&self) -> CacheStats {
    self.stats
  }

  pub fn storage(&self) -> &Arc<dyn SliceStorage> {
    &self.storage
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{FailingStorage, NoopStorage, SqliteStorage};
  use crate::cache::traits::ManualClock;

  const FRESH: Duration = Duration::from_secs(60);
  const STALE: Duration = Duration::from_secs(600);

  fn records(ids: &[&str]) -> Vec<CatalogRecord> {
    ids.iter().map(|id| CatalogRecord::with_id(*id)).collect()
  }

  fn setup() -> (Arc<ManualClock>, Arc<SqliteStorage>, MemoryCache) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let storage = Arc::new(
      SqliteStorage::open_in_memory()
        .unwrap()
        .with_clock(clock.clone()),
    );
    let cache = MemoryCache::new(storage.clone(), clock.clone(), FRESH, STALE);
    (clock, storage, cache)
  }

  #[test]
  fn empty_cache_misses() {
    let (_, _, mut cache) = setup();
    assert_eq!(cache.lookup("p"), Lookup::Miss);
    assert_eq!(cache.stats().misses, 1);
  }

  #[test]
  fn freshness_follows_the_two_ttls() {
    let (clock, _, mut cache) = setup();
    cache.replace("p", records(&["a"]), 1);

    assert_eq!(
      cache.lookup("p"),
      Lookup::Hit {
        freshness: Freshness::Fresh,
        hydrated: false
      }
    );

    clock.advance(FRESH);
    assert!(matches!(
      cache.lookup("p"),
      Lookup::Hit {
        freshness: Freshness::Stale,
        ..
      }
    ));

    clock.advance(STALE);
    assert!(matches!(
      cache.lookup("p"),
      Lookup::Hit {
        freshness: Freshness::Expired,
        ..
      }
    ));
  }

  #[test]
  fn miss_hydrates_from_disk_regardless_of_age() {
    let (clock, storage, _) = setup();
    storage.replace_all("p", &records(&["a", "b"]), 2).unwrap();
    clock.advance(Duration::from_secs(86_400));

    let mut cache = MemoryCache::new(storage.clone(), clock.clone(), FRESH, STALE);
    assert_eq!(
      cache.lookup("p"),
      Lookup::Hit {
        freshness: Freshness::Expired,
        hydrated: true
      }
    );
    assert_eq!(cache.get("p").unwrap().items, records(&["a", "b"]));
    assert_eq!(cache.stats().hydrations, 1);
  }

  #[test]
  fn append_writes_through_at_current_length() {
    let (_, storage, mut cache) = setup();
    cache.replace("p", records(&["a", "b"]), 3);
    let appended = cache.append("p", records(&["c"]), 3);

    assert_eq!(appended, records(&["c"]));
    assert_eq!(cache.get("p").unwrap().items, records(&["a", "b", "c"]));
    assert_eq!(storage.read("p", 0, 0).unwrap().items, records(&["a", "b", "c"]));
  }

  #[test]
  fn append_skips_ids_already_listed() {
    let (_, storage, mut cache) = setup();
    cache.replace("p", records(&["a", "b"]), 4);
    let appended = cache.append("p", records(&["b", "c", "c"]), 4);

    assert_eq!(appended, records(&["c"]));
    let memory = cache.get("p").unwrap().items.clone();
    assert_eq!(memory, records(&["a", "b", "c"]));
    assert_eq!(storage.read("p", 0, 0).unwrap().items, memory);

    // The next page starts right after the unique rows in both tiers
    let appended = cache.append("p", records(&["d"]), 4);
    assert_eq!(appended, records(&["d"]));
    assert_eq!(
      storage.read("p", 0, 0).unwrap().items,
      records(&["a", "b", "c", "d"])
    );
  }

  #[test]
  fn disk_failures_leave_memory_tier_working() {
    let clock = Arc::new(ManualClock::new(10));
    let mut cache = MemoryCache::new(Arc::new(FailingStorage), clock, FRESH, STALE);

    assert_eq!(cache.lookup("p"), Lookup::Miss);

    cache.replace("p", records(&["a", "b"]), 3);
    assert_eq!(cache.append("p", records(&["c"]), 3), records(&["c"]));
    cache.touch("p");

    assert_eq!(
      cache.lookup("p"),
      Lookup::Hit {
        freshness: Freshness::Fresh,
        hydrated: false
      }
    );
    assert_eq!(cache.get("p").unwrap().items, records(&["a", "b", "c"]));

    cache.invalidate("p");
    assert!(cache.get("p").is_none());
    cache.replace("q", records(&["x"]), 1);
    cache.clear();
    assert!(cache.get("q").is_none());
  }

  #[test]
  fn reconcile_prunes_vanished_rows_on_disk() {
    let (_, storage, mut cache) = setup();
    cache.replace("p", records(&["a", "b", "c"]), 3);
    cache.reconcile("p", records(&["c", "a"]), 2);

    assert_eq!(storage.read("p", 0, 0).unwrap().items, records(&["c", "a"]));
    assert_eq!(cache.get("p").unwrap().total_count, 2);
  }

  #[test]
  fn invalidate_clears_both_tiers() {
    let (_, storage, mut cache) = setup();
    cache.replace("p", records(&["a"]), 1);
    cache.invalidate("p");

    assert!(cache.get("p").is_none());
    assert!(!storage.has_data("p").unwrap());
    assert_eq!(cache.lookup("p"), Lookup::Miss);
  }

  #[test]
  fn works_memory_only() {
    let clock = Arc::new(ManualClock::new(10));
    let mut cache = MemoryCache::new(Arc::new(NoopStorage), clock, FRESH, STALE);
    cache.replace("p", records(&["a"]), 1);
    assert!(matches!(cache.lookup("p"), Lookup::Hit { .. }));
  }
}
