//! Error types for the thread engine.

use cinder_core::{ErrorKind, ThreadId, ThreadStatus, ValidationError};
use cinder_relay::RelayError;
use cinder_store::StoreError;
use cinder_sync::SyncError;
use cinder_tokens::TokenError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Token mint/burn/redeem failure. Always fatal.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Helper cache error.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Reconciliation error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Thread not found.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The state machine rejected the event.
    #[error("cannot apply {event} to a {from} thread")]
    InvalidTransition {
        from: ThreadStatus,
        event: &'static str,
    },

    /// The thread forbids the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Event transport failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// The engine is not running.
    #[error("engine stopped")]
    Stopped,
}

impl EngineError {
    /// Taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Token(e) => e.kind(),
            EngineError::Store(e) => e.kind(),
            EngineError::Relay(e) => e.kind(),
            EngineError::Sync(e) => e.kind(),
            EngineError::ThreadNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidTransition { .. } | EngineError::Stopped => {
                ErrorKind::InvalidTransition
            }
            EngineError::AccessDenied(_) => ErrorKind::AccessDenied,
            EngineError::Channel(_) => ErrorKind::Network,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
