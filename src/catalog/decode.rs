//! Size-gated decoding of items responses.
//!
//! Large bodies are parsed on the blocking pool so the control task keeps
//! handling events; small ones are parsed inline. The result is the same.

use tracing::trace;

use super::api_types::ApiItemsResponse;
use super::types::ItemsPage;
use crate::error::FetchError;

/// Bodies larger than this are decoded off the control task.
pub const ASYNC_DECODE_THRESHOLD: usize = 250 * 1024;

/// Parse an items response synchronously.
pub fn parse_page(body: &[u8]) -> Result<ItemsPage, FetchError> {
  serde_json::from_slice::<ApiItemsResponse>(body)
    .map(ApiItemsResponse::into_page)
    .map_err(|e| FetchError::ParseFailure(e.to_string()))
}

/// Parse an items response, offloading when `body` exceeds `threshold`.
pub async fn decode_page(body: Vec<u8>, threshold: usize) -> Result<ItemsPage, FetchError> {
  if body.len() <= threshold {
    return parse_page(&body);
  }

  trace!(bytes = body.len(), "Decoding response on blocking pool");
  tokio::task::spawn_blocking(move || parse_page(&body))
    .await
    .map_err(|e| FetchError::ParseFailure(format!("Decode worker failed: {}", e)))?
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::mock::items_body;

  #[tokio::test]
  async fn inline_and_offloaded_decode_agree() {
    let body = items_body(&["a", "b", "c"], 3, 0).to_string().into_bytes();

    let inline = decode_page(body.clone(), usize::MAX).await.unwrap();
    let offloaded = decode_page(body, 0).await.unwrap();

    assert_eq!(inline, offloaded);
    assert_eq!(inline.items.len(), 3);
  }

  #[tokio::test]
  async fn large_payload_uses_default_threshold() {
    let ids: Vec<String> = (0..20_000).map(|i| format!("item-{:05}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let body = items_body(&refs, 20_000, 0).to_string().into_bytes();
    assert!(body.len() > ASYNC_DECODE_THRESHOLD);

    let page = decode_page(body, ASYNC_DECODE_THRESHOLD).await.unwrap();
    assert_eq!(page.items.len(), 20_000);
    assert_eq!(page.items[19_999].id, "item-19999");
  }

  #[tokio::test]
  async fn malformed_body_is_parse_failure() {
    let err = decode_page(b"{not json".to_vec(), usize::MAX).await.unwrap_err();
    assert!(matches!(err, FetchError::ParseFailure(_)));

    let err = decode_page(b"{not json".to_vec(), 0).await.unwrap_err();
    assert!(matches!(err, FetchError::ParseFailure(_)));
  }
}
