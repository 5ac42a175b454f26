//! Thread records and their token state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::ContentHash;
use crate::error::ValidationError;
use crate::types::{Outpoint, PublicKey, ThreadId};

/// Lifecycle status of a thread.
///
/// `pending -> active -> {blocked, burned, left}` with `blocked <-> active`.
/// `burned` and `left` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Pending,
    Active,
    Blocked,
    Burned,
    Left,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Pending => "pending",
            ThreadStatus::Active => "active",
            ThreadStatus::Blocked => "blocked",
            ThreadStatus::Burned => "burned",
            ThreadStatus::Left => "left",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadStatus::Burned | ThreadStatus::Left)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ThreadStatus::Pending),
            "active" => Ok(ThreadStatus::Active),
            "blocked" => Ok(ThreadStatus::Blocked),
            "burned" => Ok(ThreadStatus::Burned),
            "left" => Ok(ThreadStatus::Left),
            other => Err(ValidationError::MalformedPayload(format!(
                "unknown thread status {other:?}"
            ))),
        }
    }
}

/// Which kind of identity the local side uses in this thread.
///
/// A guest identity is a throwaway key; a holder identity is backed by the
/// wallet. Upgrading from guest to holder is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Holder,
    Guest,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Holder => "holder",
            IdentityKind::Guest => "guest",
        }
    }
}

impl FromStr for IdentityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holder" => Ok(IdentityKind::Holder),
            "guest" => Ok(IdentityKind::Guest),
            other => Err(ValidationError::MalformedPayload(format!(
                "unknown identity kind {other:?}"
            ))),
        }
    }
}

/// Permissions granted by a data token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTokenPermissions {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl DataTokenPermissions {
    /// Compact on-chain encoding (`"r"` or `"rw"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTokenPermissions::Read => "r",
            DataTokenPermissions::ReadWrite => "rw",
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, DataTokenPermissions::ReadWrite)
    }
}

impl Default for DataTokenPermissions {
    fn default() -> Self {
        DataTokenPermissions::ReadWrite
    }
}

impl FromStr for DataTokenPermissions {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(DataTokenPermissions::Read),
            "rw" => Ok(DataTokenPermissions::ReadWrite),
            other => Err(ValidationError::MalformedPayload(format!(
                "unknown permissions {other:?}"
            ))),
        }
    }
}

/// Per-thread policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPolicy {
    /// Permissions the local side holds (and grants when issuing data tokens).
    pub permissions: DataTokenPermissions,
    /// Whether undelivered messages may be parked in the helper cache.
    pub allow_offline_relay: bool,
    /// TTL for relayed pending messages, in milliseconds.
    pub relay_ttl_ms: u64,
}

impl Default for ThreadPolicy {
    fn default() -> Self {
        Self {
            permissions: DataTokenPermissions::ReadWrite,
            allow_offline_relay: true,
            relay_ttl_ms: 48 * 60 * 60 * 1000,
        }
    }
}

/// One data token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTokenRecord {
    pub outpoint: Outpoint,
    pub recipient: PublicKey,
    pub permissions: DataTokenPermissions,
    /// Content key wrapped to `recipient`. Erased on burn.
    pub wrapped_key: Option<Vec<u8>>,
    pub issued_at: i64,
}

/// An inviter whose threads are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedInviter {
    pub id: String,
    pub reason: Option<String>,
    pub blocked_at: i64,
}

/// Local record of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: ThreadId,
    pub identity_kind: IdentityKind,
    pub local_key: PublicKey,
    pub peer_key: Option<PublicKey>,
    /// Who created the thread. Used for the blocked-inviter cascade.
    pub inviter_id: Option<String>,
    pub policy: ThreadPolicy,
    pub status: ThreadStatus,
    /// The single active control token, if one has been minted.
    pub control_token: Option<Outpoint>,
    pub content_hash: Option<ContentHash>,
    pub hint_url: Option<String>,
    /// CT-level wrapped content key. Erased on burn.
    pub wrapped_key: Option<Vec<u8>>,
    pub data_tokens: Vec<DataTokenRecord>,
    pub peer_label: Option<String>,
    pub blocked_reason: Option<String>,
    pub created_at: i64,
    pub accepted_at: Option<i64>,
    pub updated_at: i64,
    pub burned_at: Option<i64>,
    pub left_at: Option<i64>,
    pub metadata_revision: u64,
    pub message_revision: u64,
}

impl Thread {
    /// A fresh pending thread with no tokens.
    pub fn new(
        thread_id: ThreadId,
        identity_kind: IdentityKind,
        local_key: PublicKey,
        policy: ThreadPolicy,
        now: i64,
    ) -> Self {
        Self {
            thread_id,
            identity_kind,
            local_key,
            peer_key: None,
            inviter_id: None,
            policy,
            status: ThreadStatus::Pending,
            control_token: None,
            content_hash: None,
            hint_url: None,
            wrapped_key: None,
            data_tokens: Vec::new(),
            peer_label: None,
            blocked_reason: None,
            created_at: now,
            accepted_at: None,
            updated_at: now,
            burned_at: None,
            left_at: None,
            metadata_revision: 0,
            message_revision: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The control token, unless the thread has burned.
    pub fn active_control_token(&self) -> Option<Outpoint> {
        match self.status {
            ThreadStatus::Burned => None,
            _ => self.control_token,
        }
    }

    /// Whether the local side may send in this thread right now.
    pub fn can_send(&self) -> bool {
        self.status == ThreadStatus::Active
            && self.policy.permissions.can_write()
            && self.control_token.is_some()
    }

    /// Null every field carrying key material.
    pub fn erase_key_material(&mut self) {
        self.wrapped_key = None;
        for dt in &mut self.data_tokens {
            dt.wrapped_key = None;
        }
    }

    /// Terminal burn: erases key material and drops the token reference.
    pub fn mark_burned(&mut self, at: i64) {
        self.erase_key_material();
        self.status = ThreadStatus::Burned;
        self.control_token = None;
        self.burned_at = Some(at);
        self.updated_at = at;
    }

    /// Whether any key material remains on the record.
    pub fn holds_key_material(&self) -> bool {
        self.wrapped_key.is_some() || self.data_tokens.iter().any(|dt| dt.wrapped_key.is_some())
    }

    /// Bump the metadata revision after a local change.
    pub fn bump_metadata(&mut self, now: i64) {
        self.metadata_revision += 1;
        self.updated_at = now;
    }
}
