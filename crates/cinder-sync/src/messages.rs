//! Remote messaging API payloads.
//!
//! Every payload carries a `revision`. Thread metadata is a set of
//! [`Register`]s so that concurrent edits on different devices merge field
//! by field. Key material is never part of a remote payload.

use serde::{Deserialize, Serialize};
use tracing::warn;

use cinder_core::{
    ContentHash, DeliveryStatus, IdentityKind, Message, MessageBody, MessageDraft, MessageId,
    Outpoint, PublicKey, Thread, ThreadId, ThreadPolicy, ThreadStatus, WriteOrigin,
};

use crate::register::{MergeOutcome, Register};

/// One entry of `listThreads()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub metadata_revision: u64,
    /// Cursor of the newest message the remote holds for this thread.
    pub message_revision: u64,
}

/// Synchronized thread metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub thread_id: ThreadId,
    pub revision: u64,
    pub identity_kind: IdentityKind,
    pub local_key: PublicKey,
    pub created_at: i64,
    #[serde(default)]
    pub inviter_id: Option<String>,
    pub updated_at: i64,
    pub status: Register<ThreadStatus>,
    #[serde(default)]
    pub peer_key: Register<PublicKey>,
    #[serde(default)]
    pub peer_label: Register<String>,
    #[serde(default)]
    pub control_token: Register<Outpoint>,
    #[serde(default)]
    pub content_hash: Register<ContentHash>,
    #[serde(default)]
    pub hint_url: Register<String>,
    #[serde(default)]
    pub policy: Register<ThreadPolicy>,
    #[serde(default)]
    pub blocked_reason: Register<String>,
    #[serde(default)]
    pub accepted_at: Register<i64>,
}

/// Field-level result of merging remote metadata into a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMerge {
    pub adopted: Vec<&'static str>,
    pub ties: Vec<&'static str>,
    pub previous_revision: u64,
    pub revision: u64,
}

impl MetadataMerge {
    pub fn changed(&self) -> bool {
        !self.adopted.is_empty() || self.revision != self.previous_revision
    }
}

impl ThreadMetadata {
    /// Snapshot a local thread, every field at the thread's metadata revision.
    pub fn from_thread(thread: &Thread) -> Self {
        let rev = thread.metadata_revision;
        Self {
            thread_id: thread.thread_id.clone(),
            revision: rev,
            identity_kind: thread.identity_kind,
            local_key: thread.local_key,
            created_at: thread.created_at,
            inviter_id: thread.inviter_id.clone(),
            updated_at: thread.updated_at,
            status: Register::new(Some(thread.status), rev),
            peer_key: Register::new(thread.peer_key, rev),
            peer_label: Register::new(thread.peer_label.clone(), rev),
            control_token: Register::new(thread.control_token, rev),
            content_hash: Register::new(thread.content_hash, rev),
            hint_url: Register::new(thread.hint_url.clone(), rev),
            policy: Register::new(Some(thread.policy.clone()), rev),
            blocked_reason: Register::new(thread.blocked_reason.clone(), rev),
            accepted_at: Register::new(thread.accepted_at, rev),
        }
    }

    /// Build a local thread for a conversation first seen on the remote.
    pub fn to_thread(&self) -> Thread {
        let mut thread = Thread::new(
            self.thread_id.clone(),
            self.identity_kind,
            self.local_key,
            self.policy.value.clone().unwrap_or_default(),
            self.created_at,
        );
        thread.inviter_id = self.inviter_id.clone();
        self.merge_into(&mut thread);
        thread
    }

    /// Merge every register into a local thread.
    ///
    /// A terminal local status is never left. If the merged status is
    /// `Burned`, key material and the token reference are erased.
    pub fn merge_into(&self, thread: &mut Thread) -> MetadataMerge {
        let local_rev = thread.metadata_revision;
        let mut out = MetadataMerge {
            previous_revision: local_rev,
            ..Default::default()
        };

        fn field<T: Clone + PartialEq>(
            name: &'static str,
            slot: &mut Option<T>,
            local_rev: u64,
            remote: &Register<T>,
            out: &mut MetadataMerge,
        ) {
            let mut reg = Register::new(slot.take(), local_rev);
            match reg.merge(remote) {
                MergeOutcome::Adopted => out.adopted.push(name),
                MergeOutcome::TieKeptLocal => out.ties.push(name),
                MergeOutcome::KeptLocal => {}
            }
            *slot = reg.value;
        }

        field("peer_key", &mut thread.peer_key, local_rev, &self.peer_key, &mut out);
        field("peer_label", &mut thread.peer_label, local_rev, &self.peer_label, &mut out);
        field("hint_url", &mut thread.hint_url, local_rev, &self.hint_url, &mut out);
        field("blocked_reason", &mut thread.blocked_reason, local_rev, &self.blocked_reason, &mut out);
        field("accepted_at", &mut thread.accepted_at, local_rev, &self.accepted_at, &mut out);

        if !thread.is_terminal() {
            field("control_token", &mut thread.control_token, local_rev, &self.control_token, &mut out);
            field("content_hash", &mut thread.content_hash, local_rev, &self.content_hash, &mut out);
        }

        let mut policy = Some(thread.policy.clone());
        field("policy", &mut policy, local_rev, &self.policy, &mut out);
        if let Some(policy) = policy {
            thread.policy = policy;
        }

        if !thread.is_terminal() {
            let mut status = Some(thread.status);
            field("status", &mut status, local_rev, &self.status, &mut out);
            match status {
                Some(ThreadStatus::Burned) if thread.status != ThreadStatus::Burned => {
                    thread.mark_burned(self.updated_at);
                }
                Some(ThreadStatus::Left) if thread.status != ThreadStatus::Left => {
                    thread.status = ThreadStatus::Left;
                    thread.left_at = Some(self.updated_at);
                }
                Some(s) => thread.status = s,
                None => {}
            }
        }

        for name in &out.ties {
            warn!(
                thread_id = %thread.thread_id,
                field = *name,
                revision = local_rev,
                "equal revision with different content, keeping local value"
            );
        }

        thread.metadata_revision = local_rev.max(self.revision);
        if !out.adopted.is_empty() {
            thread.updated_at = thread.updated_at.max(self.updated_at);
        }
        out.revision = thread.metadata_revision;
        out
    }

    /// Merge another upload into this remote copy (remote-side semantics).
    pub fn absorb(&mut self, incoming: &ThreadMetadata) {
        self.status.merge(&incoming.status);
        self.peer_key.merge(&incoming.peer_key);
        self.peer_label.merge(&incoming.peer_label);
        self.control_token.merge(&incoming.control_token);
        self.content_hash.merge(&incoming.content_hash);
        self.hint_url.merge(&incoming.hint_url);
        self.policy.merge(&incoming.policy);
        self.blocked_reason.merge(&incoming.blocked_reason);
        self.accepted_at.merge(&incoming.accepted_at);
        if incoming.revision > self.revision {
            self.revision = incoming.revision;
            self.updated_at = incoming.updated_at;
        }
    }
}

/// A message as the remote stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub author: PublicKey,
    pub body: MessageBody,
    pub delivery: DeliveryStatus,
    pub timestamp: i64,
    /// Message-level revision.
    pub revision: u64,
    /// Per-thread position assigned by the remote on upload.
    #[serde(default)]
    pub cursor: u64,
}

impl RemoteMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            author: message.author,
            body: message.body.clone(),
            delivery: message.delivery,
            timestamp: message.timestamp,
            revision: message.revision,
            cursor: 0,
        }
    }

    /// Vault draft tagged as a remote write.
    pub fn to_draft(&self) -> MessageDraft {
        MessageDraft::new(self.author, self.body.clone())
            .with_id(self.id.clone())
            .with_timestamp(self.timestamp)
            .with_revision(self.revision)
            .with_delivery(self.delivery)
            .with_origin(WriteOrigin::Remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(rev: u64) -> Thread {
        let mut t = Thread::new(
            ThreadId::new("t1").unwrap(),
            IdentityKind::Holder,
            PublicKey::from_bytes([1; 32]),
            ThreadPolicy::default(),
            100,
        );
        t.metadata_revision = rev;
        t
    }

    #[test]
    fn test_newer_remote_status_adopted() {
        let mut local = thread(1);
        let mut remote_thread = thread(3);
        remote_thread.status = ThreadStatus::Active;
        remote_thread.peer_label = Some("bob".into());
        let remote = ThreadMetadata::from_thread(&remote_thread);

        let merge = remote.merge_into(&mut local);
        assert_eq!(local.status, ThreadStatus::Active);
        assert_eq!(local.peer_label.as_deref(), Some("bob"));
        assert_eq!(local.metadata_revision, 3);
        assert!(merge.adopted.contains(&"status"));
        assert!(merge.changed());
    }

    #[test]
    fn test_older_remote_does_not_regress() {
        let mut local = thread(5);
        local.status = ThreadStatus::Active;
        local.peer_label = Some("mine".into());
        let mut remote_thread = thread(2);
        remote_thread.peer_label = Some("theirs".into());

        ThreadMetadata::from_thread(&remote_thread).merge_into(&mut local);
        assert_eq!(local.status, ThreadStatus::Active);
        assert_eq!(local.peer_label.as_deref(), Some("mine"));
        assert_eq!(local.metadata_revision, 5);
    }

    #[test]
    fn test_tie_reported() {
        let mut local = thread(4);
        local.peer_label = Some("a".into());
        let mut remote_thread = thread(4);
        remote_thread.peer_label = Some("b".into());

        let merge = ThreadMetadata::from_thread(&remote_thread).merge_into(&mut local);
        assert_eq!(merge.ties, vec!["peer_label"]);
        assert_eq!(local.peer_label.as_deref(), Some("a"));
    }

    #[test]
    fn test_remote_burn_erases_keys() {
        let mut local = thread(1);
        local.status = ThreadStatus::Active;
        local.wrapped_key = Some(vec![9; 92]);
        local.control_token = Some(Outpoint::new(cinder_core::Txid::from_bytes([3; 32]), 0));
        let mut remote_thread = local.clone();
        remote_thread.metadata_revision = 2;
        remote_thread.mark_burned(500);

        ThreadMetadata::from_thread(&remote_thread).merge_into(&mut local);
        assert_eq!(local.status, ThreadStatus::Burned);
        assert!(!local.holds_key_material());
        assert!(local.control_token.is_none());
        assert_eq!(local.burned_at, Some(500));
    }

    #[test]
    fn test_terminal_local_never_revived() {
        let mut local = thread(1);
        local.mark_burned(10);
        let mut remote_thread = thread(9);
        remote_thread.status = ThreadStatus::Active;
        remote_thread.control_token = Some(Outpoint::new(cinder_core::Txid::from_bytes([3; 32]), 1));

        ThreadMetadata::from_thread(&remote_thread).merge_into(&mut local);
        assert_eq!(local.status, ThreadStatus::Burned);
        assert!(local.control_token.is_none());
    }

    #[test]
    fn test_stale_upload_does_not_restore_cleared_reason() {
        let mut blocked = thread(3);
        blocked.status = ThreadStatus::Blocked;
        blocked.blocked_reason = Some("spam".into());
        let mut unblocked = blocked.clone();
        unblocked.status = ThreadStatus::Active;
        unblocked.blocked_reason = None;
        unblocked.metadata_revision = 4;

        let mut remote = ThreadMetadata::from_thread(&unblocked);
        remote.absorb(&ThreadMetadata::from_thread(&blocked));
        assert_eq!(remote.revision, 4);
        assert_eq!(remote.status.value, Some(ThreadStatus::Active));
        assert!(!remote.blocked_reason.is_set());
    }

    #[test]
    fn test_remote_message_draft_is_remote_origin() {
        let msg = MessageDraft::text(PublicKey::from_bytes([2; 32]), "hi")
            .with_revision(3)
            .into_message(ThreadId::new("t1").unwrap(), 1, 50);
        let draft = RemoteMessage::from_message(&msg).to_draft();
        assert_eq!(draft.origin, WriteOrigin::Remote);
        assert_eq!(draft.revision, Some(3));
        assert_eq!(draft.id, Some(msg.id));
    }
}
