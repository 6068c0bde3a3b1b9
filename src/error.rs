//! Error taxonomy for catalog fetches and the persistent cache.
//!
//! `NotModified` is not an error but a successful outcome, see
//! [`crate::catalog::FetchOutcome`].

/// Terminal outcome of a logical fetch that produced no data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("Not authenticated")]
  Unauthenticated,

  #[error("Network unavailable after {attempts} attempts: {message}")]
  NetworkTransient { attempts: u32, message: String },

  #[error("Request failed ({status}): {message}")]
  NetworkClientError { status: u16, message: String },

  #[error("Failed to parse response: {0}")]
  ParseFailure(String),
}

impl FetchError {
  /// Whether offering the user a retry makes sense.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::NetworkTransient { .. })
  }
}

/// Persistent cache failure. Never fatal: callers fall back to memory-only.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("Failed to open cache database at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("Failed to create cache directory: {0}")]
  Directory(#[from] std::io::Error),

  #[error("Cache database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to serialize record: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_exhausted_transient_failures_are_retryable() {
    let transient = FetchError::NetworkTransient {
      attempts: 3,
      message: "timeout".into(),
    };
    assert!(transient.is_retryable());
    assert!(!FetchError::Unauthenticated.is_retryable());
    assert!(!FetchError::ParseFailure("eof".into()).is_retryable());
    assert!(!FetchError::NetworkClientError {
      status: 404,
      message: "missing".into()
    }
    .is_retryable());
  }
}
