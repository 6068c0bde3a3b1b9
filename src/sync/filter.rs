//! Presentation filter applied when handing listings to the view.
//!
//! Never applied to what is persisted: the stores always hold the raw slice.

use crate::catalog::CatalogRecord;

/// Kinds that only make sense to show when they have children.
const CONTAINER_KINDS: &[&str] = &[
  "folder",
  "collectionfolder",
  "aggregatefolder",
  "userrootfolder",
  "userview",
  "boxset",
  "series",
  "season",
  "musicalbum",
  "photoalbum",
  "playlist",
  "playlistsfolder",
];

pub fn is_container_kind(kind: &str) -> bool {
  CONTAINER_KINDS
    .iter()
    .any(|known| known.eq_ignore_ascii_case(kind))
}

/// An empty container: known container kind with an explicit zero child count.
pub fn is_hidden(record: &CatalogRecord) -> bool {
  let empty = record.child_count == Some(0);
  empty && record.kind.as_deref().is_some_and(is_container_kind)
}

/// Records the view should show, in order.
pub fn visible(items: &[CatalogRecord]) -> Vec<CatalogRecord> {
  items.iter().filter(|r| !is_hidden(r)).cloned().collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: serde_json::Value) -> CatalogRecord {
    CatalogRecord::from_value(value).unwrap()
  }

  #[test]
  fn hides_only_empty_containers() {
    let items = vec![
      record(json!({ "Id": "f0", "Type": "Folder", "ChildCount": 0 })),
      record(json!({ "Id": "f1", "Type": "Folder", "ChildCount": 3 })),
      record(json!({ "Id": "s0", "Type": "Series" })),
      record(json!({ "Id": "m0", "Type": "Movie", "ChildCount": 0 })),
      record(json!({ "Id": "p0", "Type": "playlist", "ChildCount": 0 })),
    ];

    let ids: Vec<_> = visible(&items).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["f1", "s0", "m0"]);
  }
}
