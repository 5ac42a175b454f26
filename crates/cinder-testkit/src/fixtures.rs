//! Test fixtures and helpers.
//!
//! A [`TestNet`] is one shared world: a ledger, a content store, a helper
//! cache and an event hub. Parties built on it each get their own local
//! stores and their own remote; devices of one party share that remote.
//! Several engines (people or devices) can talk to each other inside one
//! process.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cinder::{EngineConfig, EngineParts, Identity, MemoryEventHub, MessageView, ThreadEngine};
use cinder_core::{BlockedInviter, IdentityKind, PublicKey, Thread, ThreadId};
use cinder_relay::{MemoryCacheBackend, RelayConfig, RetryPolicy};
use cinder_store::{MemoryStore, StoreError, ThreadStore};
use cinder_sync::MemoryRemote;
use cinder_tokens::{IdentitySecret, MemoryChain, MemoryContentStore, MemoryWallet, TokenManager};

/// Engine configuration for tests: no background reconcile loop, no relay
/// retries.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_background_reconcile(false)
        .with_relay(RelayConfig::default().with_retry(RetryPolicy::none()))
}

/// Poll `check` until it holds, for up to two seconds.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Shared backends for a group of parties.
pub struct TestNet {
    pub chain: Arc<MemoryChain>,
    pub content: Arc<MemoryContentStore>,
    pub cache: Arc<MemoryCacheBackend>,
    pub hub: Arc<MemoryEventHub>,
}

impl TestNet {
    pub fn new() -> Self {
        Self {
            chain: MemoryChain::new(),
            content: Arc::new(MemoryContentStore::new()),
            cache: Arc::new(MemoryCacheBackend::new()),
            hub: MemoryEventHub::new(),
        }
    }

    /// Start building a party. Holder identity by default.
    pub fn party(&self) -> PartyBuilder<'_> {
        PartyBuilder {
            net: self,
            kind: IdentityKind::Holder,
            seed: rand::random(),
            holder_seed: None,
            threads: None,
            remote: None,
            config: test_config(),
        }
    }

    /// A started holder party.
    pub async fn holder(&self) -> Party {
        self.party().start().await
    }

    /// A started guest party that can upgrade to a holder identity.
    pub async fn guest(&self) -> Party {
        self.party().guest().start().await
    }

    /// A second device of `party`: same identities, fresh local stores.
    pub async fn device_of(&self, party: &Party) -> Party {
        PartyBuilder {
            net: self,
            kind: party.kind,
            seed: party.seed,
            holder_seed: party.holder_seed,
            threads: None,
            remote: Some(Arc::clone(&party.remote)),
            config: test_config(),
        }
        .start()
        .await
    }

    /// An identity with a wallet on the shared ledger.
    pub fn identity(&self, kind: IdentityKind, seed: [u8; 32]) -> Identity {
        let secret = IdentitySecret::from_bytes(seed);
        let wallet = MemoryWallet::new(Arc::clone(&self.chain), secret.public_key());
        let tokens = TokenManager::new(Arc::new(wallet), self.content.clone());
        Identity::new(kind, secret, tokens)
    }
}

impl Default for TestNet {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PartyBuilder<'a> {
    net: &'a TestNet,
    kind: IdentityKind,
    seed: [u8; 32],
    holder_seed: Option<[u8; 32]>,
    threads: Option<Arc<dyn ThreadStore>>,
    remote: Option<Arc<MemoryRemote>>,
    config: EngineConfig,
}

impl PartyBuilder<'_> {
    /// Use a guest identity and give the party a holder to upgrade to.
    pub fn guest(mut self) -> Self {
        self.kind = IdentityKind::Guest;
        self.holder_seed = Some(rand::random());
        self
    }

    /// Deterministic identity key.
    pub fn with_seed(mut self, seed: [u8; 32]) -> Self {
        self.seed = seed;
        self
    }

    /// Persist thread records somewhere other than the party's memory store.
    pub fn with_thread_store(mut self, threads: Arc<dyn ThreadStore>) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine without starting it.
    pub fn build(self) -> Party {
        let store = Arc::new(MemoryStore::new());
        let remote = self.remote.unwrap_or_else(MemoryRemote::new);
        let threads: Arc<dyn ThreadStore> = match self.threads {
            Some(threads) => threads,
            None => store.clone(),
        };
        let parts = EngineParts {
            identity: self.net.identity(self.kind, self.seed),
            holder: self
                .holder_seed
                .map(|seed| self.net.identity(IdentityKind::Holder, seed)),
            threads,
            vault: store.clone(),
            keys: store.clone(),
            cache: self.net.cache.clone(),
            remote: remote.clone(),
            channel: Arc::new(self.net.hub.connect()),
        };
        Party {
            engine: ThreadEngine::new(parts, self.config),
            store,
            remote,
            kind: self.kind,
            seed: self.seed,
            holder_seed: self.holder_seed,
        }
    }

    /// Build and start the engine.
    ///
    /// # Panics
    ///
    /// Panics if the engine fails to start.
    pub async fn start(self) -> Party {
        let party = self.build();
        party.engine.init().await.expect("engine should start");
        party
    }
}

/// One engine and its local stores.
pub struct Party {
    pub engine: Arc<ThreadEngine>,
    /// Vault and key store (and thread store unless overridden).
    pub store: Arc<MemoryStore>,
    /// Shared by every device of this party.
    pub remote: Arc<MemoryRemote>,
    pub kind: IdentityKind,
    pub seed: [u8; 32],
    pub holder_seed: Option<[u8; 32]>,
}

impl Party {
    pub fn key(&self) -> PublicKey {
        self.engine.public_key()
    }

    pub fn holder_key(&self) -> Option<PublicKey> {
        self.holder_seed
            .map(|seed| IdentitySecret::from_bytes(seed).public_key())
    }

    /// Wait until the thread exists and satisfies `check`.
    pub async fn wait_for_thread<F>(&self, thread_id: &ThreadId, check: F) -> Option<Thread>
    where
        F: Fn(&Thread) -> bool,
    {
        for _ in 0..200 {
            if let Some(thread) = self.engine.thread(thread_id).await {
                if check(&thread) {
                    return Some(thread);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    /// Wait until the thread holds at least `count` readable messages.
    pub async fn wait_for_messages(&self, thread_id: &ThreadId, count: usize) -> Vec<MessageView> {
        let mut last = Vec::new();
        for _ in 0..200 {
            if let Ok(messages) = self.engine.read_messages(thread_id).await {
                if messages.len() >= count {
                    return messages;
                }
                last = messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        last
    }
}

/// A thread store whose writes can be switched off.
pub struct FlakyThreadStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

impl FlakyThreadStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> cinder_store::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for FlakyThreadStore {
    async fn put_thread(&self, thread: &Thread) -> cinder_store::Result<()> {
        self.check()?;
        self.inner.put_thread(thread).await
    }

    async fn get_thread(&self, id: &ThreadId) -> cinder_store::Result<Option<Thread>> {
        self.inner.get_thread(id).await
    }

    async fn list_threads(&self) -> cinder_store::Result<Vec<Thread>> {
        self.inner.list_threads().await
    }

    async fn delete_thread(&self, id: &ThreadId) -> cinder_store::Result<bool> {
        self.check()?;
        self.inner.delete_thread(id).await
    }

    async fn put_blocked_inviter(&self, inviter: &BlockedInviter) -> cinder_store::Result<()> {
        self.check()?;
        self.inner.put_blocked_inviter(inviter).await
    }

    async fn remove_blocked_inviter(&self, id: &str) -> cinder_store::Result<bool> {
        self.check()?;
        self.inner.remove_blocked_inviter(id).await
    }

    async fn list_blocked_inviters(&self) -> cinder_store::Result<Vec<BlockedInviter>> {
        self.inner.list_blocked_inviters().await
    }
}
