//! Remote messaging API abstraction.
//!
//! The remote is the rendezvous point for a user's devices. Implementations
//! may use HTTP or anything else; [`MemoryRemote`] is shared between
//! in-process devices for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cinder_core::ThreadId;

use crate::error::{Result, SyncError};
use crate::messages::{RemoteMessage, ThreadMetadata, ThreadSummary};

/// The remote messaging API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Revision summary of every thread the remote knows.
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>>;

    /// Metadata if the remote copy is newer than `revision_since`.
    async fn fetch_metadata(
        &self,
        thread_id: &ThreadId,
        revision_since: u64,
    ) -> Result<Option<ThreadMetadata>>;

    /// Messages whose cursor is greater than `since_revision`, in cursor order.
    async fn fetch_messages(
        &self,
        thread_id: &ThreadId,
        since_revision: u64,
    ) -> Result<Vec<RemoteMessage>>;

    async fn upload_metadata(&self, thread_id: &ThreadId, metadata: &ThreadMetadata) -> Result<()>;

    /// Store a message. Returns the cursor the remote assigned.
    async fn upload_message(&self, thread_id: &ThreadId, message: &RemoteMessage) -> Result<u64>;

    /// Forget everything about a thread.
    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<()>;
}

#[derive(Default)]
struct RemoteThread {
    metadata: Option<ThreadMetadata>,
    messages: Vec<RemoteMessage>,
    cursor: u64,
}

/// In-memory remote shared by several devices.
#[derive(Default)]
pub struct MemoryRemote {
    threads: RwLock<HashMap<ThreadId, RemoteThread>>,
    offline: AtomicBool,
    metadata_uploads: AtomicUsize,
    message_uploads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call fail as if the remote were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn metadata_uploads(&self) -> usize {
        self.metadata_uploads.load(Ordering::SeqCst)
    }

    pub fn message_uploads(&self) -> usize {
        self.message_uploads.load(Ordering::SeqCst)
    }

    /// Current remote copy of a thread's metadata.
    pub async fn metadata(&self, thread_id: &ThreadId) -> Option<ThreadMetadata> {
        self.threads
            .read()
            .await
            .get(thread_id)
            .and_then(|t| t.metadata.clone())
    }

    pub async fn message_count(&self, thread_id: &ThreadId) -> usize {
        self.threads
            .read()
            .await
            .get(thread_id)
            .map(|t| t.messages.len())
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("remote offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        self.check_online()?;
        let threads = self.threads.read().await;
        let mut out: Vec<_> = threads
            .iter()
            .map(|(id, t)| ThreadSummary {
                thread_id: id.clone(),
                metadata_revision: t.metadata.as_ref().map(|m| m.revision).unwrap_or(0),
                message_revision: t.cursor,
            })
            .collect();
        out.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(out)
    }

    async fn fetch_metadata(
        &self,
        thread_id: &ThreadId,
        revision_since: u64,
    ) -> Result<Option<ThreadMetadata>> {
        self.check_online()?;
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .and_then(|t| t.metadata.clone())
            .filter(|m| m.revision > revision_since))
    }

    async fn fetch_messages(
        &self,
        thread_id: &ThreadId,
        since_revision: u64,
    ) -> Result<Vec<RemoteMessage>> {
        self.check_online()?;
        let threads = self.threads.read().await;
        let mut out: Vec<_> = threads
            .get(thread_id)
            .map(|t| {
                t.messages
                    .iter()
                    .filter(|m| m.cursor > since_revision)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|m| m.cursor);
        Ok(out)
    }

    async fn upload_metadata(&self, thread_id: &ThreadId, metadata: &ThreadMetadata) -> Result<()> {
        self.check_online()?;
        self.metadata_uploads.fetch_add(1, Ordering::SeqCst);
        let mut threads = self.threads.write().await;
        let entry = threads.entry(thread_id.clone()).or_default();
        match entry.metadata.as_mut() {
            Some(existing) => existing.absorb(metadata),
            None => entry.metadata = Some(metadata.clone()),
        }
        Ok(())
    }

    async fn upload_message(&self, thread_id: &ThreadId, message: &RemoteMessage) -> Result<u64> {
        self.check_online()?;
        self.message_uploads.fetch_add(1, Ordering::SeqCst);
        let mut threads = self.threads.write().await;
        let entry = threads.entry(thread_id.clone()).or_default();

        if let Some(existing) = entry.messages.iter().find(|m| m.id == message.id) {
            if existing.revision >= message.revision {
                return Ok(existing.cursor);
            }
        }

        entry.cursor += 1;
        let cursor = entry.cursor;
        let mut stored = message.clone();
        stored.cursor = cursor;
        entry.messages.retain(|m| m.id != message.id);
        entry.messages.push(stored);
        Ok(cursor)
    }

    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<()> {
        self.check_online()?;
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{
        DeliveryStatus, IdentityKind, MessageBody, MessageId, PublicKey, Thread, ThreadPolicy,
    };

    fn tid() -> ThreadId {
        ThreadId::new("t1").unwrap()
    }

    fn message(id: &str, revision: u64) -> RemoteMessage {
        RemoteMessage {
            id: MessageId::new(id).unwrap(),
            thread_id: tid(),
            author: PublicKey::from_bytes([1; 32]),
            body: MessageBody::Plaintext("x".into()),
            delivery: DeliveryStatus::Sent,
            timestamp: 1,
            revision,
            cursor: 0,
        }
    }

    #[tokio::test]
    async fn test_message_cursor_and_dedupe() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.upload_message(&tid(), &message("a", 1)).await.unwrap(), 1);
        assert_eq!(remote.upload_message(&tid(), &message("b", 1)).await.unwrap(), 2);
        assert_eq!(remote.upload_message(&tid(), &message("a", 1)).await.unwrap(), 1);
        assert_eq!(remote.upload_message(&tid(), &message("a", 2)).await.unwrap(), 3);

        let since_one = remote.fetch_messages(&tid(), 1).await.unwrap();
        let ids: Vec<_> = since_one.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(remote.message_count(&tid()).await, 2);

        let summary = remote.list_threads().await.unwrap();
        assert_eq!(summary[0].message_revision, 3);
    }

    #[tokio::test]
    async fn test_metadata_revision_filter() {
        let remote = MemoryRemote::new();
        let mut thread = Thread::new(
            tid(),
            IdentityKind::Holder,
            PublicKey::from_bytes([1; 32]),
            ThreadPolicy::default(),
            0,
        );
        thread.metadata_revision = 3;
        remote
            .upload_metadata(&tid(), &ThreadMetadata::from_thread(&thread))
            .await
            .unwrap();

        assert!(remote.fetch_metadata(&tid(), 1).await.unwrap().is_some());
        assert!(remote.fetch_metadata(&tid(), 3).await.unwrap().is_none());

        thread.metadata_revision = 2;
        remote
            .upload_metadata(&tid(), &ThreadMetadata::from_thread(&thread))
            .await
            .unwrap();
        assert_eq!(remote.metadata(&tid()).await.unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_offline_and_purge() {
        let remote = MemoryRemote::new();
        remote.upload_message(&tid(), &message("a", 1)).await.unwrap();
        remote.set_offline(true);
        assert!(matches!(
            remote.list_threads().await,
            Err(SyncError::Unavailable(_))
        ));
        remote.set_offline(false);
        remote.purge_thread(&tid()).await.unwrap();
        assert!(remote.list_threads().await.unwrap().is_empty());
    }
}
