use serde_json::Value;

/// One entry of the remote catalog.
///
/// Only the fields the cache actually inspects are typed. Everything else the
/// server sent lives in `payload` and is passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
  pub id: String,
  pub kind: Option<String>,
  pub child_count: Option<u64>,
  /// The full record as received from the server
  pub payload: Value,
}

impl CatalogRecord {
  /// Build a record from a raw JSON object.
  ///
  /// Returns `None` when the object has no usable `Id`; such records are
  /// dropped on ingest.
  pub fn from_value(payload: Value) -> Option<Self> {
    let id = match payload.get("Id") {
      Some(Value::String(s)) if !s.is_empty() => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      _ => return None,
    };
    let kind = payload
      .get("Type")
      .and_then(Value::as_str)
      .map(String::from);
    let child_count = payload.get("ChildCount").and_then(Value::as_u64);

    Some(Self {
      id,
      kind,
      child_count,
      payload,
    })
  }

  /// Bytes stored in the persisted slice.
  pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&self.payload)
  }

  /// Inverse of [`CatalogRecord::to_bytes`].
  pub fn from_bytes(data: &[u8]) -> serde_json::Result<Option<Self>> {
    let value: Value = serde_json::from_slice(data)?;
    Ok(Self::from_value(value))
  }

  /// Convenience constructor used by tests and the CLI.
  pub fn with_id(id: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      payload: serde_json::json!({ "Id": id }),
      id,
      kind: None,
      child_count: None,
    }
  }
}

/// One page of children returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemsPage {
  pub items: Vec<CatalogRecord>,
  pub total_count: u64,
  pub start_index: u64,
}

/// A logical catalog-slice fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub parent_id: String,
  pub start_index: u64,
  pub limit: u64,
  pub fields: Vec<String>,
  /// Attach stored validators and accept a "not modified" answer
  pub use_cache_validation: bool,
}

impl PageRequest {
  pub fn new(parent_id: impl Into<String>, start_index: u64, limit: u64) -> Self {
    Self {
      parent_id: parent_id.into(),
      start_index,
      limit,
      fields: Vec::new(),
      use_cache_validation: false,
    }
  }

  pub fn with_fields(mut self, fields: Vec<String>) -> Self {
    self.fields = fields;
    self
  }

  pub fn with_cache_validation(mut self, enabled: bool) -> Self {
    self.use_cache_validation = enabled;
    self
  }
}
