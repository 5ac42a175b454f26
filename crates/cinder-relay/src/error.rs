//! Error types for the relay client.

use thiserror::Error;

use cinder_core::{ErrorKind, ValidationError};

/// Errors that can occur while talking to the helper cache.
///
/// Callers treat all of these as best-effort: the relay is a hint store.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("http error: {0}")]
    Http(String),

    /// Non-retryable status from the cache.
    #[error("helper cache returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Every attempt failed with a retryable status or transport error.
    #[error("helper cache unreachable after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Body did not decode.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RelayError {
    /// Taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Http(_) | RelayError::Status { .. } | RelayError::RetriesExhausted { .. } => {
                ErrorKind::Network
            }
            RelayError::Serialization(_) | RelayError::Validation(_) => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
