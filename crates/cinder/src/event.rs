//! Control events and the frames that carry them.
//!
//! Events are written from the sender's point of view: keys in a payload
//! belong to whoever emitted the event. The receiving side interprets them
//! with [`Origin::Peer`].
//!
//! The set of control events is closed. Frames whose `type` tag is not one
//! of [`CONTROL_TAGS`] are rejected at decode time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cinder_core::{
    ContentHash, DataTokenPermissions, IdentityKind, MessageId, Outpoint, PublicKey, ThreadId,
    Txid, ValidationError,
};

/// Every control tag accepted on the wire.
pub const CONTROL_TAGS: [&str; 8] = [
    "leave",
    "burn",
    "block",
    "unblock",
    "link",
    "mint-ct",
    "mint-dt",
    "profile-update",
];

/// Who produced the event being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This device.
    Local,
    /// The other party, via the event channel.
    Peer,
}

/// A thread control event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlEvent {
    Leave {
        at: i64,
    },
    Burn {
        at: i64,
        #[serde(default)]
        burn_txid: Option<Txid>,
    },
    Block {
        at: i64,
        #[serde(default)]
        reason: Option<String>,
    },
    Unblock {
        at: i64,
    },
    /// An invite was accepted.
    Link {
        at: i64,
        accepter: PublicKey,
        inviter: PublicKey,
        #[serde(default)]
        label: Option<String>,
    },
    /// A control token was minted for the thread.
    MintCt {
        at: i64,
        control_token: Outpoint,
        content_hash: ContentHash,
        #[serde(default)]
        hint_url: Option<String>,
        minter: PublicKey,
        identity_kind: IdentityKind,
        /// Hex of the CT-level wrapped key. Only meaningful to the minter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wrapped_key: Option<String>,
    },
    /// A data token was issued against the thread's control token.
    MintDt {
        at: i64,
        data_token: Outpoint,
        control_token: Outpoint,
        recipient: PublicKey,
        permissions: DataTokenPermissions,
        /// Hex of the recipient's wrapped key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wrapped_key: Option<String>,
    },
    ProfileUpdate {
        at: i64,
        #[serde(default)]
        label: Option<String>,
    },
}

impl ControlEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            ControlEvent::Leave { .. } => "leave",
            ControlEvent::Burn { .. } => "burn",
            ControlEvent::Block { .. } => "block",
            ControlEvent::Unblock { .. } => "unblock",
            ControlEvent::Link { .. } => "link",
            ControlEvent::MintCt { .. } => "mint-ct",
            ControlEvent::MintDt { .. } => "mint-dt",
            ControlEvent::ProfileUpdate { .. } => "profile-update",
        }
    }

    pub fn at(&self) -> i64 {
        match self {
            ControlEvent::Leave { at }
            | ControlEvent::Burn { at, .. }
            | ControlEvent::Block { at, .. }
            | ControlEvent::Unblock { at }
            | ControlEvent::Link { at, .. }
            | ControlEvent::MintCt { at, .. }
            | ControlEvent::MintDt { at, .. }
            | ControlEvent::ProfileUpdate { at, .. } => *at,
        }
    }

    /// Copy safe to send to the peer: wrapped keys stripped.
    pub fn outbound(&self) -> ControlEvent {
        let mut event = self.clone();
        match &mut event {
            ControlEvent::MintCt { wrapped_key, .. } => *wrapped_key = None,
            ControlEvent::MintDt { wrapped_key, .. } => *wrapped_key = None,
            _ => {}
        }
        event
    }

    /// Decode one event, rejecting unknown tags.
    pub fn parse(value: Value) -> Result<Self, ValidationError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::MalformedPayload("control event without type".into()))?;
        if !CONTROL_TAGS.contains(&tag) {
            return Err(ValidationError::UnknownEvent(tag.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
    }
}

/// A control event addressed to one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub thread_id: ThreadId,
    pub from: PublicKey,
    pub event: ControlEvent,
}

/// An encrypted chat message in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub thread_id: ThreadId,
    pub id: MessageId,
    pub author: PublicKey,
    /// CBOR envelope sealed under the thread content key.
    #[serde(with = "hex::serde")]
    pub sealed: Vec<u8>,
    pub timestamp: i64,
}

/// Everything that travels on a thread topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    Control(ControlEnvelope),
    Message(SealedMessage),
}

impl Frame {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Frame::Control(env) => &env.thread_id,
            Frame::Message(msg) => &msg.thread_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ValidationError> {
        serde_json::to_vec(self).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
    }

    /// Decode a frame from the channel.
    pub fn decode(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
        if value.get("kind").and_then(Value::as_str) == Some("control") {
            if let Some(event) = value.get("event") {
                ControlEvent::parse(event.clone())?;
            }
        }
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
    }
}
