//! Where sealed thread content lives.
//!
//! A control token only carries a hint URL; the ciphertext itself is
//! published to a content store and fetched during redemption.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{Result, TokenError};

/// Publish/fetch seam for sealed content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return a hint URL that resolves them.
    async fn publish(&self, bytes: Bytes) -> Result<String>;

    /// Resolve a hint URL.
    async fn fetch(&self, hint_url: &str) -> Result<Bytes>;
}

const MEMORY_SCHEME: &str = "mem://";

/// Content-addressed in-memory store. Hints look like `mem://<blake3 hex>`.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn publish(&self, bytes: Bytes) -> Result<String> {
        let hint = format!("{}{}", MEMORY_SCHEME, blake3::hash(&bytes).to_hex());
        self.blobs.write().await.insert(hint.clone(), bytes);
        Ok(hint)
    }

    async fn fetch(&self, hint_url: &str) -> Result<Bytes> {
        if !hint_url.starts_with(MEMORY_SCHEME) {
            return Err(TokenError::Network(format!("unsupported hint url {}", hint_url)));
        }
        self.blobs
            .read()
            .await
            .get(hint_url)
            .cloned()
            .ok_or_else(|| TokenError::Network(format!("content not found at {}", hint_url)))
    }
}
