//! Slice storage trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{Clock, SystemClock};
use crate::catalog::CatalogRecord;
use crate::error::{StorageError, StorageResult};

/// Ordered children of one parent as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedSlice {
  /// Records ordered by position
  pub items: Vec<CatalogRecord>,
  pub total_count: u64,
  /// Zero when nothing is stored for the parent
  pub updated_at_ms: i64,
}

/// Meta row of one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceMeta {
  pub total_count: u64,
  pub updated_at_ms: i64,
}

/// Trait for durable per-parent slice storage.
///
/// Every write is all-or-nothing. Implementations guard their own I/O and may
/// be called from any thread.
pub trait SliceStorage: Send + Sync {
  /// Read the slice for `parent_id`. `limit == 0` means no limit.
  /// An unknown parent yields an empty slice, not an error.
  fn read(&self, parent_id: &str, limit: usize, offset: usize) -> StorageResult<PersistedSlice>;

  /// Meta row without loading any records.
  fn meta(&self, parent_id: &str) -> StorageResult<Option<SliceMeta>>;

  fn has_data(&self, parent_id: &str) -> StorageResult<bool> {
    Ok(self.meta(parent_id)?.is_some())
  }

  /// Drop every row of the parent and write `items` at positions `0..n`.
  fn replace_all(&self, parent_id: &str, items: &[CatalogRecord], total_count: u64)
    -> StorageResult<()>;

  /// Write `items` at positions starting from `start_position`.
  ///
  /// With `remove_missing`, rows of the parent whose id is not in `items` are
  /// deleted. Only authoritative refreshes should ask for that, never appends.
  fn upsert_items(
    &self,
    parent_id: &str,
    items: &[CatalogRecord],
    total_count: u64,
    remove_missing: bool,
    start_position: u64,
  ) -> StorageResult<()>;

  /// Refresh the freshness timestamp only.
  fn touch(&self, parent_id: &str) -> StorageResult<()>;

  fn clear_parent(&self, parent_id: &str) -> StorageResult<()>;

  fn clear_all(&self) -> StorageResult<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when the cache is disabled or the database could not be opened.
pub struct NoopStorage;

impl SliceStorage for NoopStorage {
  fn read(&self, _parent_id: &str, _limit: usize, _offset: usize) -> StorageResult<PersistedSlice> {
    Ok(PersistedSlice::default()) // Always miss
  }

  fn meta(&self, _parent_id: &str) -> StorageResult<Option<SliceMeta>> {
    Ok(None)
  }

  fn replace_all(&self, _parent_id: &str, _items: &[CatalogRecord], _total: u64) -> StorageResult<()> {
    Ok(()) // Discard
  }

  fn upsert_items(
    &self,
    _parent_id: &str,
    _items: &[CatalogRecord],
    _total_count: u64,
    _remove_missing: bool,
    _start_position: u64,
  ) -> StorageResult<()> {
    Ok(()) // Discard
  }

  fn touch(&self, _parent_id: &str) -> StorageResult<()> {
    Ok(())
  }

  fn clear_parent(&self, _parent_id: &str) -> StorageResult<()> {
    Ok(())
  }

  fn clear_all(&self) -> StorageResult<()> {
    Ok(())
  }
}

/// Storage whose every call fails, for exercising memory-only degradation.
#[cfg(test)]
pub(crate) struct FailingStorage;

#[cfg(test)]
impl FailingStorage {
  fn fail<T>() -> StorageResult<T> {
    Err(StorageError::LockPoisoned("disk unavailable".to_string()))
  }
}

#[cfg(test)]
impl SliceStorage for FailingStorage {
  fn read(&self, _parent_id: &str, _limit: usize, _offset: usize) -> StorageResult<PersistedSlice> {
    Self::fail()
  }

  fn meta(&self, _parent_id: &str) -> StorageResult<Option<SliceMeta>> {
    Self::fail()
  }

  fn replace_all(&self, _parent_id: &str, _items: &[CatalogRecord], _total: u64) -> StorageResult<()> {
    Self::fail()
  }

  fn upsert_items(
    &self,
    _parent_id: &str,
    _items: &[CatalogRecord],
    _total_count: u64,
    _remove_missing: bool,
    _start_position: u64,
  ) -> StorageResult<()> {
    Self::fail()
  }

  fn touch(&self, _parent_id: &str) -> StorageResult<()> {
    Self::fail()
  }

  fn clear_parent(&self, _parent_id: &str) -> StorageResult<()> {
    Self::fail()
  }

  fn clear_all(&self) -> StorageResult<()> {
    Self::fail()
  }
}

/// SQLite-based slice storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
}

/// Several handles may share one file; wait for the writer instead of failing.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

impl SqliteStorage {
  /// Open (or create) the cache database at `path`. Idempotent.
  pub fn open(path: &Path) -> StorageResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path).map_err(|source| StorageError::Open {
      path: path.display().to_string(),
      source,
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String =
      conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(path = %path.display(), journal_mode = %mode, "Opened cache database");

    Self::from_connection(conn)
  }

  /// Database that lives as long as this handle. Used by tests.
  pub fn open_in_memory() -> StorageResult<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("catsync").join("cache.db"))
  }

  /// Use a different clock for the `updated_at_ms` stamps.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  fn from_connection(conn: Connection) -> StorageResult<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      clock: Arc::new(SystemClock),
    })
  }

  fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::LockPoisoned(e.to_string()))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per child, ordered by position within its parent
CREATE TABLE IF NOT EXISTS catalog_items (
    parent_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (parent_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_catalog_items_position
    ON catalog_items(parent_id, position);

-- Per-parent listing metadata
CREATE TABLE IF NOT EXISTS catalog_meta (
    parent_id TEXT PRIMARY KEY,
    total_count INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
"#;

const UPSERT_ITEM: &str = "INSERT INTO catalog_items (parent_id, item_id, position, data, updated_at_ms)
   VALUES (?1, ?2, ?3, ?4, ?5)
   ON CONFLICT(parent_id, item_id) DO UPDATE SET
     position = excluded.position,
     data = excluded.data,
     updated_at_ms = excluded.updated_at_ms";

const UPSERT_META: &str = "INSERT INTO catalog_meta (parent_id, total_count, updated_at_ms)
   VALUES (?1, ?2, ?3)
   ON CONFLICT(parent_id) DO UPDATE SET
     total_count = excluded.total_count,
     updated_at_ms = excluded.updated_at_ms";

fn write_rows(
  tx: &rusqlite::Transaction<'_>,
  parent_id: &str,
  items: &[CatalogRecord],
  start_position: u64,
  now: i64,
) -> StorageResult<()> {
  let mut stmt = tx.prepare_cached(UPSERT_ITEM)?;
  for (offset, item) in items.iter().enumerate() {
    let position = (start_position + offset as u64) as i64;
    stmt.execute(params![parent_id, item.id, position, item.to_bytes()?, now])?;
  }
  Ok(())
}

impl SliceStorage for SqliteStorage {
  fn read(&self, parent_id: &str, limit: usize, offset: usize) -> StorageResult<PersistedSlice> {
    let mut conn = self.lock()?;
    // Meta and rows must come from the same snapshot
    let tx = conn.transaction()?;

    let meta: Option<(i64, i64)> = tx
      .query_row(
        "SELECT total_count, updated_at_ms FROM catalog_meta WHERE parent_id = ?",
        params![parent_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    // SQLite treats a negative LIMIT as "no limit"
    let sql_limit: i64 = if limit == 0 { -1 } else { limit as i64 };
    let rows = {
      let mut stmt = tx.prepare_cached(
        "SELECT item_id, data FROM catalog_items
         WHERE parent_id = ?
         ORDER BY position, rowid
         LIMIT ? OFFSET ?",
      )?;
      let rows = stmt
        .query_map(params![parent_id, sql_limit, offset as i64], |row| {
          Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      rows
    };
    tx.commit()?;

    let mut items = Vec::with_capacity(rows.len());
    for (item_id, data) in rows {
      match CatalogRecord::from_bytes(&data) {
        Ok(Some(record)) => items.push(record),
        Ok(None) | Err(_) => {
          warn!(parent_id, item_id = %item_id, "Skipping undecodable cached record");
        }
      }
    }

    let (total_count, updated_at_ms) = meta.unwrap_or((0, 0));
    Ok(PersistedSlice {
      items,
      total_count: total_count.max(0) as u64,
      updated_at_ms,
    })
  }

  fn meta(&self, parent_id: &str) -> StorageResult<Option<SliceMeta>> {
    let conn = self.lock()?;
    let meta = conn
      .query_row(
        "SELECT total_count, updated_at_ms FROM catalog_meta WHERE parent_id = ?",
        params![parent_id],
        |row| {
          Ok(SliceMeta {
            total_count: row.get::<_, i64>(0)?.max(0) as u64,
            updated_at_ms: row.get(1)?,
          })
        },
      )
      .optional()?;
    Ok(meta)
  }

  fn replace_all(&self, parent_id: &str, items: &[CatalogRecord], total_count: u64)
    -> StorageResult<()> {
    let now = self.clock.now_ms();
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM catalog_items WHERE parent_id = ?",
      params![parent_id],
    )?;
    write_rows(&tx, parent_id, items, 0, now)?;
    tx.execute(UPSERT_META, params![parent_id, total_count as i64, now])?;

    tx.commit()?;
    debug!(parent_id, count = items.len(), total_count, "Replaced persisted slice");
    Ok(())
  }

  fn upsert_items(
    &self,
    parent_id: &str,
    items: &[CatalogRecord],
    total_count: u64,
    remove_missing: bool,
    start_position: u64,
  ) -> StorageResult<()> {
    let now = self.clock.now_ms();
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    write_rows(&tx, parent_id, items, start_position, now)?;

    let mut removed = 0usize;
    if remove_missing {
      let incoming: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
      let existing: Vec<String> = {
        let mut stmt = tx.prepare("SELECT item_id FROM catalog_items WHERE parent_id = ?")?;
        let ids = stmt
          .query_map(params![parent_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        ids
      };
      let mut delete =
        tx.prepare("DELETE FROM catalog_items WHERE parent_id = ? AND item_id = ?")?;
      for id in existing.iter().filter(|id| !incoming.contains(id.as_str())) {
        removed += delete.execute(params![parent_id, id])?;
      }
    }

    tx.execute(UPSERT_META, params![parent_id, total_count as i64, now])?;
    tx.commit()?;

    debug!(
      parent_id,
      count = items.len(),
      start_position,
      removed,
      "Upserted persisted items"
    );
    Ok(())
  }

  fn touch(&self, parent_id: &str) -> StorageResult<()> {
    let now = self.clock.now_ms();
    let conn = self.lock()?;
    conn.execute(
      "UPDATE catalog_meta SET updated_at_ms = ? WHERE parent_id = ?",
      params![now, parent_id],
    )?;
    Ok(())
  }

  fn clear_parent(&self, parent_id: &str) -> StorageResult<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM catalog_items WHERE parent_id = ?",
      params![parent_id],
    )?;
    tx.execute(
      "DELETE FROM catalog_meta WHERE parent_id = ?",
      params![parent_id],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn clear_all(&self) -> StorageResult<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM catalog_items", [])?;
    tx.execute("DELETE FROM catalog_meta", [])?;
    tx.commit()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::ManualClock;

  fn ids(slice: &PersistedSlice) -> Vec<&str> {
    slice.items.iter().map(|r| r.id.as_str()).collect()
  }

  fn records(ids: &[&str]) -> Vec<CatalogRecord> {
    ids.iter().map(|id| CatalogRecord::with_id(*id)).collect()
  }

  fn storage_at(now: i64) -> SqliteStorage {
    SqliteStorage::open_in_memory()
      .unwrap()
      .with_clock(Arc::new(ManualClock::new(now)))
  }

  #[test]
  fn unknown_parent_reads_empty() {
    let storage = storage_at(1);
    let slice = storage.read("nope", 0, 0).unwrap();
    assert_eq!(slice, PersistedSlice::default());
    assert!(!storage.has_data("nope").unwrap());
  }

  #[test]
  fn replace_all_round_trips_order_and_total() {
    let storage = storage_at(42);
    storage
      .replace_all("p", &records(&["c", "a", "b"]), 10)
      .unwrap();

    let slice = storage.read("p", 0, 0).unwrap();
    assert_eq!(ids(&slice), ["c", "a", "b"]);
    assert_eq!(slice.total_count, 10);
    assert_eq!(slice.updated_at_ms, 42);
  }

  #[test]
  fn replace_all_drops_previous_rows() {
    let storage = storage_at(1);
    storage.replace_all("p", &records(&["a", "b"]), 2).unwrap();
    storage.replace_all("p", &records(&["z"]), 1).unwrap();
    assert_eq!(ids(&storage.read("p", 0, 0).unwrap()), ["z"]);
  }

  #[test]
  fn read_honours_limit_and_offset() {
    let storage = storage_at(1);
    storage
      .replace_all("p", &records(&["a", "b", "c", "d"]), 4)
      .unwrap();
    assert_eq!(ids(&storage.read("p", 2, 1).unwrap()), ["b", "c"]);
    assert_eq!(ids(&storage.read("p", 0, 3).unwrap()), ["d"]);
  }

  #[test]
  fn append_upsert_extends_the_list() {
    let storage = storage_at(1);
    storage.replace_all("p", &records(&["a", "b"]), 4).unwrap();
    storage
      .upsert_items("p", &records(&["c", "d"]), 4, false, 2)
      .unwrap();
    assert_eq!(ids(&storage.read("p", 0, 0).unwrap()), ["a", "b", "c", "d"]);
  }

  #[test]
  fn remove_missing_prunes_absent_ids() {
    let storage = storage_at(1);
    storage
      .replace_all("p", &records(&["a", "b", "c"]), 3)
      .unwrap();
    storage
      .upsert_items("p", &records(&["c", "a"]), 2, true, 0)
      .unwrap();

    let slice = storage.read("p", 0, 0).unwrap();
    assert_eq!(ids(&slice), ["c", "a"]);
    assert_eq!(slice.total_count, 2);
  }

  #[test]
  fn parents_are_isolated() {
    let storage = storage_at(1);
    storage.replace_all("p1", &records(&["a"]), 1).unwrap();
    storage.replace_all("p2", &records(&["a", "b"]), 2).unwrap();
    storage.clear_parent("p1").unwrap();

    assert!(!storage.has_data("p1").unwrap());
    assert_eq!(ids(&storage.read("p2", 0, 0).unwrap()), ["a", "b"]);

    storage.clear_all().unwrap();
    assert!(!storage.has_data("p2").unwrap());
  }

  #[test]
  fn touch_only_moves_the_timestamp() {
    let clock = Arc::new(ManualClock::new(100));
    let storage = SqliteStorage::open_in_memory()
      .unwrap()
      .with_clock(clock.clone());
    storage.replace_all("p", &records(&["a"]), 1).unwrap();

    clock.set(500);
    storage.touch("p").unwrap();

    let slice = storage.read("p", 0, 0).unwrap();
    assert_eq!(ids(&slice), ["a"]);
    assert_eq!(slice.updated_at_ms, 500);
  }

  #[test]
  fn reopen_on_disk_is_idempotent_and_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.replace_all("lib", &records(&["x", "y"]), 2).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let slice = storage.read("lib", 0, 0).unwrap();
    assert_eq!(ids(&slice), ["x", "y"]);
    assert_eq!(slice.total_count, 2);
  }

  #[test]
  fn read_sees_rows_and_total_from_one_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let writer = SqliteStorage::open(&path).unwrap();
    let reader = SqliteStorage::open(&path).unwrap();
    writer.replace_all("p", &records(&["a", "b"]), 2).unwrap();

    let short = records(&["a", "b"]);
    let long = records(&["a", "b", "c"]);
    let done = std::sync::atomic::AtomicBool::new(false);

    std::thread::scope(|s| {
      s.spawn(|| {
        for i in 0..200 {
          let items = if i % 2 == 0 { &long } else { &short };
          writer.replace_all("p", items, items.len() as u64).unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
      });

      while !done.load(std::sync::atomic::Ordering::SeqCst) {
        let slice = reader.read("p", 0, 0).unwrap();
        assert_eq!(slice.items.len() as u64, slice.total_count);
      }
    });
  }

  #[test]
  fn noop_storage_never_has_data() {
    let storage = NoopStorage;
    storage.replace_all("p", &records(&["a"]), 1).unwrap();
    assert!(!storage.has_data("p").unwrap());
    assert!(storage.read("p", 0, 0).unwrap().items.is_empty());
  }
}
