//! Error types for the token layer.

use thiserror::Error;

use cinder_core::{ErrorKind, Outpoint, ValidationError};

/// Errors that can occur while minting, burning, or redeeming tokens.
///
/// None of these are best-effort: they always propagate to the caller.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Malformed identifier or payload.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The signer does not control the token, or the DT does not belong to the CT.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The control token has been spent.
    #[error("control token {0} has been burned")]
    TokenBurned(Outpoint),

    /// No such output on the ledger.
    #[error("ledger output not found: {0}")]
    OutputNotFound(Outpoint),

    /// The ledger refused to sign.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Ledger or content store unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication tag mismatch or malformed wrapped key.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// CBOR/JSON encoding error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TokenError {
    /// Taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenError::Validation(_) | TokenError::Serialization(_) => ErrorKind::Validation,
            TokenError::AccessDenied(_) | TokenError::SigningFailed(_) => ErrorKind::AccessDenied,
            TokenError::TokenBurned(_) => ErrorKind::TokenBurned,
            TokenError::OutputNotFound(_) => ErrorKind::NotFound,
            TokenError::Network(_) => ErrorKind::Network,
            TokenError::Encryption(_) | TokenError::Decryption(_) => ErrorKind::Decryption,
        }
    }
}

/// Result type for token operations.
pub type Result<T> = std::result::Result<T, TokenError>;
