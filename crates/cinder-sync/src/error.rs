//! Error types for the sync module.

use thiserror::Error;

use cinder_core::{ErrorKind, ValidationError};

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote answered with an error.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The remote could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// Local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] cinder_store::StoreError),

    /// A remote payload failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A remote payload did not decode.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reconciliation was cancelled by shutdown.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote { .. } | SyncError::Unavailable(_) | SyncError::Cancelled => {
                ErrorKind::Network
            }
            SyncError::Store(e) => e.kind(),
            SyncError::Validation(_) | SyncError::Serialization(_) => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
