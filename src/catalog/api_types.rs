//! Serde-deserializable types matching catalog API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use serde_json::Value;

use super::types::{CatalogRecord, ItemsPage};

// ============================================================================
// Items endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiItemsResponse {
  #[serde(rename = "Items", default)]
  pub items: Vec<Value>,
  #[serde(rename = "TotalRecordCount", default)]
  pub total_record_count: Option<u64>,
  #[serde(rename = "StartIndex", default)]
  pub start_index: u64,
}

impl ApiItemsResponse {
  /// Convert to a page, dropping records that carry no id.
  ///
  /// A missing `TotalRecordCount` is treated as "this page is everything".
  pub fn into_page(self) -> ItemsPage {
    let received = self.items.len() as u64;
    let items: Vec<CatalogRecord> = self
      .items
      .into_iter()
      .filter_map(CatalogRecord::from_value)
      .collect();

    if items.len() as u64 != received {
      tracing::debug!(
        dropped = received - items.len() as u64,
        "Dropped catalog records without an id"
      );
    }

    ItemsPage {
      total_count: self
        .total_record_count
        .unwrap_or(self.start_index + received),
      start_index: self.start_index,
      items,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_items_response() {
    let body = r#"{
      "Items": [{"Id": "a"}, {"Name": "no id"}, {"Id": "b", "Type": "Movie"}],
      "TotalRecordCount": 40,
      "StartIndex": 20
    }"#;
    let page = serde_json::from_str::<ApiItemsResponse>(body)
      .unwrap()
      .into_page();

    assert_eq!(page.total_count, 40);
    assert_eq!(page.start_index, 20);
    let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
  }

  #[test]
  fn missing_total_falls_back_to_received_count() {
    let page = serde_json::from_str::<ApiItemsResponse>(r#"{"Items": [{"Id": "x"}]}"#)
      .unwrap()
      .into_page();
    assert_eq!(page.total_count, 1);
  }
}
