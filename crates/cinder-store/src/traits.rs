//! Storage traits.
//!
//! The engine is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (for tests).

use async_trait::async_trait;
use zeroize::Zeroizing;

use cinder_core::{
    BlockedInviter, Message, MessageDraft, MessageId, MessagePatch, Thread, ThreadId,
};

use crate::error::Result;

/// Durable local store of messages.
///
/// # Design Notes
///
/// - **Idempotent saves**: saving a draft whose id already exists replaces
///   the content and keeps the original insertion sequence.
/// - **Ordering**: `list_by_thread` returns messages by `(timestamp, seq)`.
/// - **Purge**: `purge_thread` removes every message of the thread and
///   returns how many were removed.
#[async_trait]
pub trait MessageVault: Send + Sync {
    /// Insert or replace a message. Generates an id if the draft has none.
    async fn save(&self, thread_id: &ThreadId, draft: MessageDraft) -> Result<Message>;

    /// Get a message by id.
    async fn get(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Apply a patch. `NotFound` if the id is unknown.
    async fn update(&self, id: &MessageId, patch: MessagePatch) -> Result<Message>;

    /// All messages of a thread in display order.
    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>>;

    /// Remove every message of a thread.
    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<usize>;
}

/// Persistence for thread records and blocked inviters.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Threads
    // ─────────────────────────────────────────────────────────────────────────

    async fn put_thread(&self, thread: &Thread) -> Result<()>;

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>>;

    async fn list_threads(&self) -> Result<Vec<Thread>>;

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Blocked inviters
    // ─────────────────────────────────────────────────────────────────────────

    async fn put_blocked_inviter(&self, inviter: &BlockedInviter) -> Result<()>;

    async fn remove_blocked_inviter(&self, id: &str) -> Result<bool>;

    async fn list_blocked_inviters(&self) -> Result<Vec<BlockedInviter>>;
}

/// Local per-thread content keys.
///
/// This is the only place raw key bytes are kept once data tokens exist.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn put_key(&self, thread_id: &ThreadId, key: &[u8; 32]) -> Result<()>;

    async fn get_key(&self, thread_id: &ThreadId) -> Result<Option<Zeroizing<[u8; 32]>>>;

    /// Overwrite and remove the key. Returns whether one existed.
    async fn erase_key(&self, thread_id: &ThreadId) -> Result<bool>;
}
