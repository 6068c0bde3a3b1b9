//! Scripted transport for tests and offline demos.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};

type Scripted = Result<TransportResponse, TransportError>;

/// Transport that replays queued responses in order and records every request.
#[derive(Clone, Default)]
pub struct MockTransport {
  responses: Arc<Mutex<VecDeque<Scripted>>>,
  requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, response: Scripted) -> &Self {
    self
      .responses
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push_back(response);
    self
  }

  /// Queue a 200 response with a JSON body.
  pub fn push_json(&self, body: Value) -> &Self {
    self.push_json_with_headers(body, Vec::new())
  }

  pub fn push_json_with_headers(&self, body: Value, headers: Vec<(&str, &str)>) -> &Self {
    self.push(Ok(TransportResponse {
      status: 200,
      headers: headers
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
      body: body.to_string().into_bytes(),
    }))
  }

  /// Queue a bodiless response with the given status.
  pub fn push_status(&self, status: u16) -> &Self {
    self.push(Ok(TransportResponse {
      status,
      ..Default::default()
    }))
  }

  pub fn push_error(&self, error: TransportError) -> &Self {
    self.push(Err(error))
  }

  /// Every request seen so far.
  pub fn requests(&self) -> Vec<TransportRequest> {
    self
      .requests
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  pub fn attempts(&self) -> usize {
    self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}

impl Transport for MockTransport {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
    self
      .requests
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(request);
    self
      .responses
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .pop_front()
      .unwrap_or_else(|| Err(TransportError::Other("no scripted response".to_string())))
  }
}

/// Items response body in the server's format.
pub fn items_body(ids: &[&str], total: u64, start_index: u64) -> Value {
  let items: Vec<Value> = ids.iter().map(|id| serde_json::json!({ "Id": id })).collect();
  serde_json::json!({
    "Items": items,
    "TotalRecordCount": total,
    "StartIndex": start_index,
  })
}
