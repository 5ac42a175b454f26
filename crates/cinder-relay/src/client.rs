//! Helper cache client.
//!
//! Entries are keyed by the control token outpoint (`txid:vout`). Pending
//! messages for an offline peer live under `txid:vout:messages`, each with
//! its own expiry. Nothing here is durable: the cache is a hint store and
//! callers treat every failure as best-effort, except that deletion on burn
//! is always attempted.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use cinder_core::{now_millis, MessageId, Outpoint, PublicKey, ThreadId};
use cinder_tokens::BurnListener;

use crate::backend::{CacheBackend, CacheEntry, CacheQuota, CacheStatus, PruneResult};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Entry format version written by [`HelperCache::enroll`].
pub const ENTRY_VERSION: u32 = 1;

const MESSAGES_SUFFIX: &str = ":messages";

/// Payload stored under a thread's cache id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub thread_id: ThreadId,
    pub payload: Value,
    pub enrolled_at: i64,
    pub version: u32,
    pub ttl_ms: u64,
}

/// One sealed message waiting for an offline peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: MessageId,
    pub author: PublicKey,
    /// Encrypted envelope bytes, hex in JSON.
    #[serde(with = "hex::serde")]
    pub sealed: Vec<u8>,
    pub timestamp: i64,
    #[serde(default)]
    pub stored_at: i64,
    #[serde(default)]
    pub expires_at: i64,
}

impl PendingMessage {
    pub fn new(id: MessageId, author: PublicKey, sealed: Vec<u8>, timestamp: i64) -> Self {
        Self {
            id,
            author,
            sealed,
            timestamp,
            stored_at: 0,
            expires_at: 0,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingList {
    #[serde(default)]
    messages: Vec<PendingMessage>,
}

/// Client for the helper cache.
#[derive(Clone)]
pub struct HelperCache {
    backend: Arc<dyn CacheBackend>,
    config: RelayConfig,
}

impl HelperCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: RelayConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Deterministic cache id for a control token: `txid:vout`, no hashing.
    pub fn cache_id(control_token: &Outpoint) -> String {
        format!("{}:{}", control_token.txid, control_token.vout)
    }

    /// Sub-key holding pending messages for a cache id.
    pub fn messages_key(cache_id: &str) -> String {
        format!("{}{}", cache_id, MESSAGES_SUFFIX)
    }

    /// Upload the thread payload under the control token's cache id.
    pub async fn enroll(
        &self,
        thread_id: &ThreadId,
        control_token: &Outpoint,
        payload: Value,
    ) -> Result<String> {
        let id = Self::cache_id(control_token);
        let record = EnrollmentRecord {
            thread_id: thread_id.clone(),
            payload,
            enrolled_at: now_millis(),
            version: ENTRY_VERSION,
            ttl_ms: self.config.pending_ttl.as_millis() as u64,
        };
        let entry = CacheEntry {
            id: id.clone(),
            payload: serde_json::to_value(&record)?,
        };
        self.backend.put(&entry).await?;
        debug!(cache_id = %id, thread_id = %thread_id, "enrolled thread in helper cache");
        Ok(id)
    }

    /// Fetch an enrollment. `None` if the cache has nothing for this id.
    pub async fn fetch(&self, cache_id: &str) -> Result<Option<EnrollmentRecord>> {
        match self.backend.get(cache_id).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.payload)?)),
            None => Ok(None),
        }
    }

    /// Append a pending message, dropping expired ones and duplicates by id.
    pub async fn put_pending_message(&self, cache_id: &str, mut message: PendingMessage) -> Result<()> {
        let key = Self::messages_key(cache_id);
        let now = now_millis();
        let mut list = self.load_pending(&key).await?;

        list.messages.retain(|m| !m.is_expired(now) && m.id != message.id);
        message.stored_at = now;
        message.expires_at = now.saturating_add(self.config.pending_ttl.as_millis() as i64);
        list.messages.push(message);

        let entry = CacheEntry {
            id: key.clone(),
            payload: serde_json::to_value(&list)?,
        };
        self.backend.put(&entry).await?;
        debug!(cache_id, pending = list.messages.len(), "stored pending message");
        Ok(())
    }

    /// Unexpired pending messages, oldest first.
    pub async fn get_pending_messages(&self, cache_id: &str) -> Result<Vec<PendingMessage>> {
        let now = now_millis();
        let mut messages = self.load_pending(&Self::messages_key(cache_id)).await?.messages;
        messages.retain(|m| !m.is_expired(now));
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Drop the pending list after the recipient imported it.
    pub async fn clear_pending_messages(&self, cache_id: &str) -> Result<bool> {
        self.backend.delete(&Self::messages_key(cache_id)).await
    }

    /// Delete the enrollment and the pending list.
    ///
    /// Both deletes are attempted even if the first fails; the first error
    /// is returned.
    pub async fn delete(&self, cache_id: &str) -> Result<()> {
        let entry = self.backend.delete(cache_id).await;
        let pending = self.backend.delete(&Self::messages_key(cache_id)).await;

        match (entry, pending) {
            (Ok(_), Ok(_)) => {
                info!(cache_id, "deleted helper cache entry");
                Ok(())
            }
            (Err(first), Err(second)) => {
                warn!(cache_id, error = %second, "pending list delete failed");
                Err(first)
            }
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        }
    }

    pub async fn prune(&self) -> Result<PruneResult> {
        self.backend.prune().await
    }

    pub async fn status(&self) -> Result<CacheStatus> {
        self.backend.status().await
    }

    pub async fn quota(&self) -> Result<CacheQuota> {
        self.backend.quota().await
    }

    async fn load_pending(&self, key: &str) -> Result<PendingList> {
        match self.backend.get(key).await? {
            Some(entry) => serde_json::from_value(entry.payload).map_err(RelayError::from),
            None => Ok(PendingList::default()),
        }
    }
}

#[async_trait]
impl BurnListener for HelperCache {
    async fn on_burn(&self, control_token: Outpoint) -> anyhow::Result<()> {
        self.delete(&Self::cache_id(&control_token)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCacheBackend;
    use cinder_core::Txid;
    use std::time::Duration;

    fn outpoint(byte: u8, vout: u32) -> Outpoint {
        Outpoint::new(Txid::from_bytes([byte; 32]), vout)
    }

    fn cache(backend: Arc<MemoryCacheBackend>) -> HelperCache {
        HelperCache::new(backend, RelayConfig::default())
    }

    fn pending(id: &str, ts: i64) -> PendingMessage {
        PendingMessage::new(
            MessageId::new(id).unwrap(),
            PublicKey::from_bytes([7u8; 32]),
            vec![1, 2, 3],
            ts,
        )
    }

    #[test]
    fn test_cache_id_is_txid_colon_vout() {
        let ct = outpoint(0xab, 3);
        let id = HelperCache::cache_id(&ct);
        assert_eq!(id, format!("{}:3", "ab".repeat(32)));
        assert_eq!(HelperCache::messages_key(&id), format!("{}:messages", id));
    }

    #[tokio::test]
    async fn test_enroll_and_fetch() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = cache(backend.clone());
        let thread = ThreadId::new("thread-1").unwrap();
        let ct = outpoint(1, 0);

        let id = cache
            .enroll(&thread, &ct, serde_json::json!({"hint": "mem://x"}))
            .await
            .unwrap();

        let record = cache.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.thread_id, thread);
        assert_eq!(record.version, ENTRY_VERSION);
        assert_eq!(record.payload["hint"], "mem://x");
        assert!(record.enrolled_at > 0);

        assert!(cache.fetch("nothing:0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_messages_dedupe_and_order() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = cache(backend);
        let id = HelperCache::cache_id(&outpoint(2, 0));

        cache.put_pending_message(&id, pending("m2", 20)).await.unwrap();
        cache.put_pending_message(&id, pending("m1", 10)).await.unwrap();
        cache.put_pending_message(&id, pending("m2", 20)).await.unwrap();

        let got = cache.get_pending_messages(&id).await.unwrap();
        let ids: Vec<_> = got.iter().map(|m| m.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(got.iter().all(|m| m.expires_at > m.stored_at));

        assert!(cache.clear_pending_messages(&id).await.unwrap());
        assert!(cache.get_pending_messages(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_pending_filtered() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = HelperCache::new(
            backend.clone(),
            RelayConfig::default().with_pending_ttl(Duration::ZERO),
        );
        let id = HelperCache::cache_id(&outpoint(3, 1));

        cache.put_pending_message(&id, pending("gone", 1)).await.unwrap();
        assert!(backend.contains(&HelperCache::messages_key(&id)).await);
        assert!(cache.get_pending_messages(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_both_keys() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = cache(backend.clone());
        let ct = outpoint(4, 0);
        let thread = ThreadId::new("t").unwrap();
        let id = cache.enroll(&thread, &ct, Value::Null).await.unwrap();
        cache.put_pending_message(&id, pending("m", 1)).await.unwrap();
        assert_eq!(backend.len().await, 2);

        cache.on_burn(ct).await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_attempts_both_when_offline() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = cache(backend.clone());
        backend.set_offline(true);

        let err = cache.delete("x:0").await.unwrap_err();
        assert_eq!(err.kind(), cinder_core::ErrorKind::Network);
        assert_eq!(backend.delete_calls(), 2);
    }
}
