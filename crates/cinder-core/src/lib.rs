//! # Cinder Core
//!
//! Pure types for disposable, capability-token-backed conversation threads.
//!
//! This crate contains no I/O, no storage, no networking. It defines the
//! identifiers that appear on the ledger and in the helper cache, the local
//! thread and message records, and the validators every other crate relies on.
//!
//! ## Key Types
//!
//! - [`Txid`] / [`Outpoint`] - Ledger output references (64-hex txid, `u32` vout)
//! - [`ContentHash`] - Blake3 digest of thread content, declared in the control token
//! - [`PublicKey`] - X25519 identity key used for key wrapping
//! - [`Thread`] - Local record of one conversation and its token state
//! - [`Message`] - One vault entry, idempotent by [`MessageId`]
//!
//! ## Error Taxonomy
//!
//! Every crate in the workspace maps its errors onto [`ErrorKind`], so callers
//! can distinguish revocation (`TokenBurned`) from transport trouble (`Network`)
//! without matching on crate-specific enums.

pub mod crypto;
pub mod error;
pub mod message;
pub mod thread;
pub mod time;
pub mod types;
pub mod validation;

pub use crypto::ContentHash;
pub use error::{CoreError, ErrorKind, ValidationError};
pub use message::{DeliveryStatus, Message, MessageBody, MessageDraft, MessagePatch, WriteOrigin};
pub use thread::{
    BlockedInviter, DataTokenPermissions, DataTokenRecord, IdentityKind, Thread, ThreadPolicy,
    ThreadStatus,
};
pub use time::now_millis;
pub use types::{MessageId, Outpoint, PublicKey, ThreadId, Txid};
pub use validation::{parse_hex32, require_non_empty, validate_hash_hex, validate_txid_hex, validate_vout};
