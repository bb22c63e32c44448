//! Error types for remote queries.
//!
//! The retry and cache wrappers never invent errors of their own, with one
//! exception: the cache wrapper reports [`OfflineError`] when the runtime is
//! offline and nothing is cached. Callers plug that into their own error type
//! through `From<OfflineError>`.

use thiserror::Error;

/// Returned by the cache wrapper when offline with no cached value to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("offline and no cached data available")]
pub struct OfflineError;

/// Errors produced by a [`RemoteBackend`](crate::backend::RemoteBackend).
#[derive(Debug, Error)]
pub enum QueryError {
  /// Connection reset, timeout, DNS failure and friends
  #[error("transport error: {0}")]
  Transport(String),

  /// The backend answered with a non-success HTTP status
  #[error("backend returned {status}: {message}")]
  Status { status: u16, message: String },

  /// The payload did not have the expected shape
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The runtime is offline and no cached value could stand in
  #[error(transparent)]
  Offline(#[from] OfflineError),

  /// The query could not be built
  #[error("invalid query: {0}")]
  InvalidQuery(#[from] DescriptorError),
}

impl QueryError {
  pub fn status(status: u16, message: impl Into<String>) -> Self {
    Self::Status {
      status,
      message: message.into(),
    }
  }

  pub fn transport(message: impl Into<String>) -> Self {
    Self::Transport(message.into())
  }

  /// Whether a repeat of the same request could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Transport(_) => true,
      Self::Status { status, .. } => matches!(*status, 408 | 425 | 429 | 500..=599),
      Self::Decode(_) | Self::Offline(_) | Self::InvalidQuery(_) => false,
    }
  }
}

impl From<serde_json::Error> for QueryError {
  fn from(err: serde_json::Error) -> Self {
    Self::Decode(err.to_string())
  }
}

impl From<reqwest::Error> for QueryError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) => Self::status(status.as_u16(), err.to_string()),
      None if err.is_decode() => Self::Decode(err.to_string()),
      None => Self::Transport(err.to_string()),
    }
  }
}

/// Invalid query descriptor, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
  #[error("invalid identifier {0:?}: expected [A-Za-z0-9_]+")]
  InvalidIdentifier(String),

  #[error("filter on {0:?} uses `in` with no values")]
  EmptyInList(String),

  #[error("filter on {0:?} has a value of the wrong shape for its operator")]
  MismatchedValue(String),

  #[error("invalid page range {from}..={to}")]
  InvalidPage { from: u64, to: u64 },

  #[error("page {page} of {size} rows is out of range")]
  PageOutOfRange { page: u64, size: u64 },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retry_classification() {
    assert!(QueryError::transport("connection reset").is_retryable());
    assert!(QueryError::status(503, "unavailable").is_retryable());
    assert!(QueryError::status(429, "slow down").is_retryable());
    assert!(!QueryError::status(400, "bad filter").is_retryable());
    assert!(!QueryError::status(404, "no such table").is_retryable());
    assert!(!QueryError::Decode("missing field".into()).is_retryable());
    assert!(!QueryError::from(OfflineError).is_retryable());
  }
}
