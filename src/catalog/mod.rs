//! Catalog API types and the request layer.

pub mod api_types;
mod client;
pub mod decode;
pub mod mock;
pub mod retry;
pub mod transport;
pub mod types;
pub mod validators;

pub use client::{BatchReport, CatalogClient, ClientOptions, FetchOutcome};
pub use mock::MockTransport;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use transport::{
  HttpTransport, SessionProvider, StaticTokenSession, Transport, TransportError, TransportRequest,
  TransportResponse,
};
pub use types::{CatalogRecord, ItemsPage, PageRequest};
pub use validators::{Validator, ValidatorStore};
