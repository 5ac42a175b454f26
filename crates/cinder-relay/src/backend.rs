//! Helper cache storage surface.
//!
//! Mirrors the HTTP API: `PUT/GET/DELETE /cache/{id}`, `POST /cache/prune`,
//! `GET /status`, `GET /quota`. Bodies are JSON `{id, payload}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{RelayError, Result};

/// One cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub payload: Value,
}

/// `GET /status` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub entries: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
}

/// `GET /quota` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheQuota {
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
}

/// `POST /cache/prune` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    #[serde(default)]
    pub removed: u64,
}

/// The helper cache storage surface.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// `None` when the cache answers 404.
    async fn get(&self, id: &str) -> Result<Option<CacheEntry>>;

    /// Returns whether the entry existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Ask the cache to drop expired entries.
    async fn prune(&self) -> Result<PruneResult>;

    async fn status(&self) -> Result<CacheStatus>;

    async fn quota(&self) -> Result<CacheQuota>;
}

/// In-memory helper cache for tests.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
    offline: AtomicBool,
    deletes: AtomicUsize,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether an entry exists (bypasses the offline switch).
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of delete calls received, successful or not.
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RelayError::Http("helper cache unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.check_online()?;
        self.entries
            .write()
            .await
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        self.check_online()?;
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.entries.write().await.remove(id).is_some())
    }

    async fn prune(&self) -> Result<PruneResult> {
        self.check_online()?;
        Ok(PruneResult::default())
    }

    async fn status(&self) -> Result<CacheStatus> {
        self.check_online()?;
        Ok(CacheStatus {
            ok: true,
            entries: Some(self.entries.read().await.len() as u64),
            version: Some("memory".into()),
        })
    }

    async fn quota(&self) -> Result<CacheQuota> {
        self.check_online()?;
        let used = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.payload.to_string().len() as u64)
            .sum();
        Ok(CacheQuota {
            used_bytes: used,
            limit_bytes: u64::MAX,
        })
    }
}
