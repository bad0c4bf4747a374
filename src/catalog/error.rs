//! Failures at the remote catalog boundary.

use thiserror::Error;

/// Errors returned by a [`RemoteSource`](super::client::RemoteSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Host could not be reached (DNS, refused connection, no network)
  #[error("network unreachable")]
  Unreachable,

  #[error("request timed out")]
  Timeout,

  /// The server answered with a non-success status other than 404
  #[error("HTTP status {0}")]
  Status(u16),

  /// The server answered 404 for a single resource
  #[error("not found")]
  NotFound,

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("{0}")]
  Other(String),
}

impl FetchError {
  /// Message suitable for showing to the user.
  pub fn user_message(&self) -> String {
    match self {
      FetchError::Unreachable => "No internet connection".to_string(),
      FetchError::Timeout => "Request timed out".to_string(),
      FetchError::Status(code) => format!("Network error {}", code),
      FetchError::NotFound => "Network error 404".to_string(),
      FetchError::Decode(msg) | FetchError::Other(msg) => {
        if msg.trim().is_empty() {
          "Unexpected error".to_string()
        } else {
          msg.clone()
        }
      }
    }
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      return FetchError::Timeout;
    }
    if err.is_connect() {
      return FetchError::Unreachable;
    }
    if let Some(status) = err.status() {
      return match status.as_u16() {
        404 => FetchError::NotFound,
        code => FetchError::Status(code),
      };
    }
    if err.is_decode() {
      return FetchError::Decode(err.to_string());
    }
    FetchError::Other(err.to_string())
  }
}
