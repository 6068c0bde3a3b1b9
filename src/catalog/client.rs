//! Catalog client: one logical fetch in, one outcome out.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::decode::{decode_page, ASYNC_DECODE_THRESHOLD};
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::transport::{SessionProvider, Transport, TransportRequest, TransportResponse};
use super::types::{ItemsPage, PageRequest};
use super::validators::{endpoint_key, Validator, ValidatorStore};
use crate::error::FetchError;

/// Successful outcome of a logical fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  Fresh(ItemsPage),
  /// The server confirmed the cached copy is still current
  NotModified,
}

/// Tunables for [`CatalogClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
  pub retry: RetryPolicy,
  pub items_path: String,
  pub decode_threshold: usize,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      items_path: "/Items".to_string(),
      decode_threshold: ASYNC_DECODE_THRESHOLD,
    }
  }
}

/// Aggregated result of [`CatalogClient::fetch_many`].
#[derive(Debug, Default)]
pub struct BatchReport {
  /// One entry per request, in request order
  pub outcomes: Vec<(PageRequest, Result<FetchOutcome, FetchError>)>,
}

impl BatchReport {
  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.len() - self.succeeded()
  }
}

struct ClientInner<T> {
  transport: T,
  session: Arc<dyn SessionProvider>,
  validators: ValidatorStore,
  options: ClientOptions,
}

/// Catalog API client with retry, conditional revalidation and size-gated decoding.
pub struct CatalogClient<T: Transport> {
  inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for CatalogClient<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Transport> CatalogClient<T> {
  pub fn new(transport: T, session: Arc<dyn SessionProvider>, options: ClientOptions) -> Self {
    Self {
      inner: Arc::new(ClientInner {
        transport,
        session,
        validators: ValidatorStore::new(),
        options,
      }),
    }
  }

  pub fn validators(&self) -> &ValidatorStore {
    &self.inner.validators
  }

  pub fn options(&self) -> &ClientOptions {
    &self.inner.options
  }

  fn build_request(&self, request: &PageRequest) -> TransportRequest {
    let mut query = vec![
      ("ParentId".to_string(), request.parent_id.clone()),
      ("StartIndex".to_string(), request.start_index.to_string()),
    ];
    if request.limit > 0 {
      query.push(("Limit".to_string(), request.limit.to_string()));
    }
    if !request.fields.is_empty() {
      query.push(("Fields".to_string(), request.fields.join(",")));
    }

    TransportRequest {
      path: self.inner.options.items_path.clone(),
      query,
      headers: Vec::new(),
    }
  }

  /// Fetch one page of children.
  ///
  /// Transient transport failures are retried with exponential backoff;
  /// everything else is terminal on the first attempt.
  pub async fn fetch_page(&self, request: &PageRequest) -> Result<FetchOutcome, FetchError> {
    let inner = &self.inner;
    if !inner.session.is_authenticated() {
      warn!(parent_id = %request.parent_id, "Fetch refused: not authenticated");
      return Err(FetchError::Unauthenticated);
    }

    let mut transport_request = self.build_request(request);
    let key = endpoint_key(&transport_request.path, &transport_request.query);
    inner.session.sign(&mut transport_request);
    if request.use_cache_validation {
      if let Some(validator) = inner.validators.get(&key) {
        transport_request.headers.extend(validator.preconditions());
      }
    }

    let mut retry = RetryState::new(inner.options.retry);
    loop {
      match inner.transport.send(transport_request.clone()).await {
        Ok(response) => return self.handle_response(&key, request, response).await,
        Err(e) => match retry.record_failure(e.is_transient()) {
          RetryDecision::Retry(delay) => {
            warn!(
              parent_id = %request.parent_id,
              attempt = retry.attempts(),
              max = inner.options.retry.max_retries,
              delay_ms = delay.as_millis() as u64,
              error = %e,
              "Retrying catalog fetch"
            );
            tokio::time::sleep(delay).await;
          }
          RetryDecision::GiveUp => {
            warn!(
              parent_id = %request.parent_id,
              attempts = retry.attempts(),
              error = %e,
              "Catalog fetch failed"
            );
            return Err(if e.is_transient() {
              FetchError::NetworkTransient {
                attempts: retry.attempts(),
                message: e.to_string(),
              }
            } else {
              // No HTTP status was received
              FetchError::NetworkClientError {
                status: 0,
                message: e.to_string(),
              }
            });
          }
        },
      }
    }
  }

  async fn handle_response(
    &self,
    key: &str,
    request: &PageRequest,
    response: TransportResponse,
  ) -> Result<FetchOutcome, FetchError> {
    match response.status {
      304 => {
        debug!(parent_id = %request.parent_id, "Catalog slice not modified");
        Ok(FetchOutcome::NotModified)
      }
      200..=299 => {
        if let Some(validator) = Validator::from_response(&response) {
          self.inner.validators.store(key, validator);
        }
        let page = decode_page(response.body, self.inner.options.decode_threshold).await?;
        debug!(
          parent_id = %request.parent_id,
          count = page.items.len(),
          total = page.total_count,
          "Fetched catalog page"
        );
        Ok(FetchOutcome::Fresh(page))
      }
      status => {
        let body = String::from_utf8_lossy(&response.body);
        let message: String = body.chars().take(200).collect();
        warn!(parent_id = %request.parent_id, status, "Catalog request rejected");
        Err(FetchError::NetworkClientError { status, message })
      }
    }
  }

  /// Fetch several pages one after another and aggregate the results.
  pub async fn fetch_many(&self, requests: Vec<PageRequest>) -> BatchReport {
    let outcomes: Vec<_> = stream::iter(requests)
      .then(|request| async move {
        let result = self.fetch_page(&request).await;
        (request, result)
      })
      .collect()
      .await;
    BatchReport { outcomes }
  }
}
