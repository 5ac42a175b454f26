//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use zeroize::{Zeroize, Zeroizing};

use cinder_core::{
    now_millis, BlockedInviter, Message, MessageDraft, MessageId, MessagePatch, Thread, ThreadId,
};

use crate::error::{Result, StoreError};
use crate::traits::{KeyStore, MessageVault, ThreadStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Messages indexed by id.
    messages: HashMap<MessageId, Message>,

    /// Next insertion sequence.
    next_seq: u64,

    threads: BTreeMap<ThreadId, Thread>,

    blocked: BTreeMap<String, BlockedInviter>,

    keys: HashMap<ThreadId, [u8; 32]>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Total number of stored messages, across threads.
    pub fn message_count(&self) -> usize {
        self.inner.read().map(|i| i.messages.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageVault for MemoryStore {
    async fn save(&self, thread_id: &ThreadId, mut draft: MessageDraft) -> Result<Message> {
        let mut inner = self.inner.write()?;

        let existing = draft
            .id
            .as_ref()
            .and_then(|id| inner.messages.get(id))
            .map(|m| (m.id.clone(), m.thread_id.clone(), m.seq, m.timestamp));
        let seq = match existing {
            Some((id, owner, _, _)) if &owner != thread_id => {
                return Err(StoreError::Conflict(format!(
                    "message {} belongs to thread {}",
                    id, owner
                )));
            }
            Some((_, _, seq, timestamp)) => {
                draft.timestamp.get_or_insert(timestamp);
                seq
            }
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };

        let message = draft.into_message(thread_id.clone(), seq, now_millis());
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.inner.read()?.messages.get(id).cloned())
    }

    async fn update(&self, id: &MessageId, patch: MessagePatch) -> Result<Message> {
        let mut inner = self.inner.write()?;
        let message = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
        patch.apply(message);
        Ok(message.clone())
    }

    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let inner = self.inner.read()?;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| &m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.order_key());
        Ok(messages)
    }

    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<usize> {
        let mut inner = self.inner.write()?;
        let before = inner.messages.len();
        inner.messages.retain(|_, m| &m.thread_id != thread_id);
        Ok(before - inner.messages.len())
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn put_thread(&self, thread: &Thread) -> Result<()> {
        self.inner
            .write()?
            .threads
            .insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        Ok(self.inner.read()?.threads.get(id).cloned())
    }

    async fn list_threads(&self) -> Result<Vec<Thread>> {
        Ok(self.inner.read()?.threads.values().cloned().collect())
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        Ok(self.inner.write()?.threads.remove(id).is_some())
    }

    async fn put_blocked_inviter(&self, inviter: &BlockedInviter) -> Result<()> {
        self.inner
            .write()?
            .blocked
            .insert(inviter.id.clone(), inviter.clone());
        Ok(())
    }

    async fn remove_blocked_inviter(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write()?.blocked.remove(id).is_some())
    }

    async fn list_blocked_inviters(&self) -> Result<Vec<BlockedInviter>> {
        Ok(self.inner.read()?.blocked.values().cloned().collect())
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn put_key(&self, thread_id: &ThreadId, key: &[u8; 32]) -> Result<()> {
        let mut inner = self.inner.write()?;
        if let Some(mut old) = inner.keys.insert(thread_id.clone(), *key) {
            old.zeroize();
        }
        Ok(())
    }

    async fn get_key(&self, thread_id: &ThreadId) -> Result<Option<Zeroizing<[u8; 32]>>> {
        Ok(self.inner.read()?.keys.get(thread_id).map(|k| Zeroizing::new(*k)))
    }

    async fn erase_key(&self, thread_id: &ThreadId) -> Result<bool> {
        let mut inner = self.inner.write()?;
        match inner.keys.remove(thread_id) {
            Some(mut key) => {
                key.zeroize();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
