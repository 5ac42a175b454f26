//! Error types for Cinder Core.

use thiserror::Error;

/// Coarse classification shared by every error in the workspace.
///
/// Token mint/burn/redeem failures surface as `ValidationError`, `AccessDenied`,
/// `TokenBurned`, or `Decryption` and must propagate to the caller. Relay and
/// reconciliation failures surface as `Network` and are best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed hex, identifiers, or payloads.
    Validation,
    /// The signer does not control the token, or the thread forbids the action.
    AccessDenied,
    /// The control token has been spent.
    TokenBurned,
    /// Ledger, helper cache, or remote API unreachable.
    Network,
    /// Authentication tag mismatch while unwrapping or decrypting.
    Decryption,
    /// Local write failure.
    Persistence,
    /// A referenced thread, message, or ledger output does not exist.
    NotFound,
    /// The thread state machine rejected the event.
    InvalidTransition,
}

/// Validation errors for identifiers and on-chain payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: expected 64 hex characters, got {len}")]
    HexLength { field: &'static str, len: usize },

    #[error("{field}: contains non-hex characters")]
    NonHex { field: &'static str },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("vout must be a non-negative 32-bit integer, got {0}")]
    InvalidVout(i64),

    #[error("invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },

    #[error("malformed outpoint: {0}")]
    MalformedOutpoint(String),

    #[error("data token does not reference a control token")]
    MissingControlTokenRef,

    #[error("malformed token payload: {0}")]
    MalformedPayload(String),

    #[error("unknown control event: {0}")]
    UnknownEvent(String),
}

impl ValidationError {
    /// Taxonomy kind (always `Validation`).
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Core errors that can occur while encoding or decoding model types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    /// Taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::EncodingError(_) | CoreError::DecodingError(_) => ErrorKind::Validation,
        }
    }
}
