//! Vault messages.
//!
//! Messages are keyed by [`MessageId`]; writing the same id twice replaces the
//! content but keeps the original insertion sequence, so ordering by
//! `(timestamp, seq)` is stable across upserts.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::types::{MessageId, PublicKey, ThreadId};

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(ValidationError::MalformedPayload(format!(
                "unknown delivery status {other:?}"
            ))),
        }
    }
}

/// Where a write came from.
///
/// Remote writes were produced by reconciliation and must not be uploaded
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOrigin {
    #[default]
    Local,
    Remote,
}

impl WriteOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOrigin::Local => "local",
            WriteOrigin::Remote => "remote",
        }
    }
}

impl FromStr for WriteOrigin {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(WriteOrigin::Local),
            "remote" => Ok(WriteOrigin::Remote),
            other => Err(ValidationError::MalformedPayload(format!(
                "unknown write origin {other:?}"
            ))),
        }
    }
}

/// Message content, either readable or still sealed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum MessageBody {
    Plaintext(String),
    Ciphertext(Bytes),
}

impl fmt::Debug for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageBody::Plaintext(s) => write!(f, "Plaintext({} chars)", s.chars().count()),
            MessageBody::Ciphertext(b) => write!(f, "Ciphertext({} bytes)", b.len()),
        }
    }
}

impl MessageBody {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageBody::Plaintext(s) => s.is_empty(),
            MessageBody::Ciphertext(b) => b.is_empty(),
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub author: PublicKey,
    pub body: MessageBody,
    pub delivery: DeliveryStatus,
    pub timestamp: i64,
    pub revision: u64,
    pub origin: WriteOrigin,
    /// Vault-assigned insertion sequence.
    pub seq: u64,
}

impl Message {
    /// Ordering key within a thread.
    pub fn order_key(&self) -> (i64, u64) {
        (self.timestamp, self.seq)
    }
}

/// A message before the vault has accepted it.
///
/// Missing fields are filled in on save: a random id, the current time,
/// `Sent` delivery and revision 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub id: Option<MessageId>,
    pub author: PublicKey,
    pub body: MessageBody,
    pub delivery: Option<DeliveryStatus>,
    pub timestamp: Option<i64>,
    pub revision: Option<u64>,
    pub origin: WriteOrigin,
}

impl MessageDraft {
    pub fn new(author: PublicKey, body: MessageBody) -> Self {
        Self {
            id: None,
            author,
            body,
            delivery: None,
            timestamp: None,
            revision: None,
            origin: WriteOrigin::Local,
        }
    }

    pub fn text(author: PublicKey, text: impl Into<String>) -> Self {
        Self::new(author, MessageBody::Plaintext(text.into()))
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryStatus) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_origin(mut self, origin: WriteOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Fill defaults and bind to a thread.
    pub fn into_message(self, thread_id: ThreadId, seq: u64, now: i64) -> Message {
        Message {
            id: self.id.unwrap_or_else(MessageId::generate),
            thread_id,
            author: self.author,
            body: self.body,
            delivery: self.delivery.unwrap_or(DeliveryStatus::Sent),
            timestamp: self.timestamp.unwrap_or(now),
            revision: self.revision.unwrap_or(1),
            origin: self.origin,
            seq,
        }
    }
}

/// A partial update to a stored message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub body: Option<MessageBody>,
    pub delivery: Option<DeliveryStatus>,
    pub revision: Option<u64>,
    pub origin: Option<WriteOrigin>,
}

impl MessagePatch {
    pub fn delivery(status: DeliveryStatus) -> Self {
        Self {
            delivery: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.delivery.is_none()
            && self.revision.is_none()
            && self.origin.is_none()
    }

    pub fn apply(&self, msg: &mut Message) {
        if let Some(body) = &self.body {
            msg.body = body.clone();
        }
        if let Some(delivery) = self.delivery {
            msg.delivery = delivery;
        }
        if let Some(revision) = self.revision {
            msg.revision = revision;
        }
        if let Some(origin) = self.origin {
            msg.origin = origin;
        }
    }
}
