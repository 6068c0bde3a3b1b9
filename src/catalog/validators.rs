//! Conditional-request validators, one pair per endpoint.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

use super::transport::TransportResponse;

/// Entity tag and last-modified tokens returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
  pub etag: Option<String>,
  pub last_modified: Option<String>,
}

impl Validator {
  /// Tokens carried by a response, if it carries any.
  pub fn from_response(response: &TransportResponse) -> Option<Self> {
    let validator = Self {
      etag: response.header("ETag").map(String::from),
      last_modified: response.header("Last-Modified").map(String::from),
    };
    (!validator.is_empty()).then_some(validator)
  }

  pub fn is_empty(&self) -> bool {
    self.etag.is_none() && self.last_modified.is_none()
  }

  /// Precondition headers for a conditional request.
  pub fn preconditions(&self) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(etag) = &self.etag {
      headers.push(("If-None-Match".to_string(), etag.clone()));
    }
    if let Some(modified) = &self.last_modified {
      headers.push(("If-Modified-Since".to_string(), modified.clone()));
    }
    headers
  }
}

/// Stable, fixed-length key for an endpoint (path plus sorted query).
pub fn endpoint_key(path: &str, query: &[(String, String)]) -> String {
  let mut pairs: Vec<_> = query.iter().collect();
  pairs.sort();

  let mut hasher = Sha256::new();
  hasher.update(path.as_bytes());
  for (k, v) in pairs {
    hasher.update(b"\0");
    hasher.update(k.as_bytes());
    hasher.update(b"=");
    hasher.update(v.as_bytes());
  }
  hex::encode(hasher.finalize())
}

/// Validators keyed by [`endpoint_key`].
#[derive(Debug, Default)]
pub struct ValidatorStore {
  entries: RwLock<HashMap<String, Validator>>,
}

impl ValidatorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<Validator> {
    self
      .entries
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(key)
      .cloned()
  }

  /// Replace the stored pair wholesale.
  pub fn store(&self, key: &str, validator: Validator) {
    self
      .entries
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key.to_string(), validator);
  }

  pub fn remove(&self, key: &str) {
    self
      .entries
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .remove(key);
  }

  pub fn clear(&self) {
    self
      .entries
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn key_ignores_query_order() {
    let a = endpoint_key("/Items", &query(&[("ParentId", "p"), ("Limit", "10")]));
    let b = endpoint_key("/Items", &query(&[("Limit", "10"), ("ParentId", "p")]));
    let c = endpoint_key("/Items", &query(&[("Limit", "20"), ("ParentId", "p")]));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn validator_from_response_headers() {
    let response = TransportResponse {
      status: 200,
      headers: vec![("etag".into(), "\"v1\"".into())],
      body: Vec::new(),
    };
    let validator = Validator::from_response(&response).unwrap();
    assert_eq!(validator.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
      validator.preconditions(),
      vec![("If-None-Match".to_string(), "\"v1\"".to_string())]
    );

    assert!(Validator::from_response(&TransportResponse::default()).is_none());
  }

  #[test]
  fn store_replaces_wholesale() {
    let store = ValidatorStore::new();
    store.store(
      "k",
      Validator {
        etag: Some("a".into()),
        last_modified: Some("yesterday".into()),
      },
    );
    store.store(
      "k",
      Validator {
        etag: Some("b".into()),
        last_modified: None,
      },
    );
    assert_eq!(store.get("k").unwrap().last_modified, None);
  }
}
