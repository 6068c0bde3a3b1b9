//! Authenticated transport seam used by [`super::CatalogClient`].
//!
//! The catalog client never talks to `reqwest` directly. It hands a
//! [`TransportRequest`] to a [`Transport`], which makes exactly one attempt and
//! classifies whatever went wrong.

use std::error::Error as _;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// One HTTP attempt, relative to the server base url.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportRequest {
  pub path: String,
  pub query: Vec<(String, String)>,
  pub headers: Vec<(String, String)>,
}

impl TransportRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// Raw server answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl TransportResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Failure to get any response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  #[error("Connection refused: {0}")]
  ConnectionRefused(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Host unreachable: {0}")]
  HostUnreachable(String),

  #[error("Network error: {0}")]
  UnknownNetwork(String),

  #[error("Transport error: {0}")]
  Other(String),
}

impl TransportError {
  /// Whether another attempt could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    !matches!(self, TransportError::Other(_))
  }
}

/// Makes a single request attempt.
pub trait Transport: Send + Sync + 'static {
  fn send(
    &self,
    request: TransportRequest,
  ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// Authentication collaborator.
pub trait SessionProvider: Send + Sync {
  fn is_authenticated(&self) -> bool;

  /// Attach credentials to an outgoing request.
  fn sign(&self, request: &mut TransportRequest);
}

/// Session backed by a fixed access token.
#[derive(Debug, Clone)]
pub struct StaticTokenSession {
  token: Option<String>,
  client_name: String,
}

impl StaticTokenSession {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: token.filter(|t| !t.is_empty()),
      client_name: env!("CARGO_PKG_NAME").to_string(),
    }
  }
}

impl SessionProvider for StaticTokenSession {
  fn is_authenticated(&self) -> bool {
    self.token.is_some()
  }

  fn sign(&self, request: &mut TransportRequest) {
    if let Some(token) = &self.token {
      request.headers.push((
        "Authorization".to_string(),
        format!(
          "MediaBrowser Client=\"{}\", Version=\"{}\", Token=\"{}\"",
          self.client_name,
          env!("CARGO_PKG_VERSION"),
          token
        ),
      ));
    }
  }
}

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
}

impl HttpTransport {
  pub fn new(base: Url) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .gzip(true)
      .build()
      .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client, base })
  }

  fn url_for(&self, request: &TransportRequest) -> Result<Url, TransportError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| TransportError::Other(format!("Invalid base url: {}", self.base)))?
      .pop_if_empty()
      .extend(request.path.trim_start_matches('/').split('/'));
    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
    let url = self.url_for(&request)?;
    let mut builder = self.client.get(url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(classify)?.to_vec();

    Ok(TransportResponse {
      status,
      headers,
      body,
    })
  }
}

/// Map a `reqwest` failure onto the transient kinds the retry policy knows.
fn classify(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    return TransportError::Timeout;
  }
  if e.is_connect() {
    let mut source = e.source();
    while let Some(err) = source {
      if let Some(io) = err.downcast_ref::<std::io::Error>() {
        match io.kind() {
          std::io::ErrorKind::ConnectionRefused => {
            return TransportError::ConnectionRefused(e.to_string())
          }
          std::io::ErrorKind::TimedOut => return TransportError::Timeout,
          _ => {}
        }
      }
      source = err.source();
    }
    return TransportError::HostUnreachable(e.to_string());
  }
  if e.is_request() || e.is_body() {
    return TransportError::UnknownNetwork(e.to_string());
  }
  TransportError::Other(e.to_string())
}
