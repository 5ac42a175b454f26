//! The thread engine: one API over tokens, storage, relay and sync.
//!
//! Every thread lives in an in-memory arena and changes only through
//! [`transition::apply`](crate::transition::apply). Each change is persisted
//! (falling back to the arena alone if the store refuses the write),
//! reflected in the [`Projection`], and, when it originated here, mirrored
//! to the peer on the thread topic.
//!
//! Token operations are fatal: if a mint, burn or redeem fails, the
//! operation fails and the thread is left as it was. Relay and remote work is
//! best-effort and goes through the [`TaskQueue`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cinder_core::{
    now_millis, BlockedInviter, DataTokenPermissions, DeliveryStatus, IdentityKind, Message,
    MessageBody, MessageDraft, Outpoint, PublicKey, Thread, ThreadId, ThreadPolicy, ThreadStatus,
    ValidationError,
};
use cinder_relay::{CacheBackend, HelperCache, PendingMessage};
use cinder_store::{KeyStore, MessageVault, ThreadStore};
use cinder_sync::{
    PushReport, ReconcileReport, ReconcileWorker, Reconciler, RemoteApi, SyncEvent, ThreadLocks,
};
use cinder_tokens::{
    wrap_key, BurnReceipt, ContentKey, EncryptedContent, IdentitySecret, TokenError,
    TokenManager, TokenStatus, WrapContext,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::{ControlEnvelope, ControlEvent, Frame, Origin, SealedMessage};
use crate::projection::{ConversationView, Projection};
use crate::subscription::{EventChannel, SubscriptionManager};
use crate::tasks::{TaskError, TaskQueue};
use crate::transition::apply;

/// Frames buffered between the forwarders and the dispatcher.
const INBOUND_CAPACITY: usize = 1024;

/// A signing identity and the token manager bound to its wallet.
#[derive(Clone)]
pub struct Identity {
    pub kind: IdentityKind,
    pub secret: Arc<IdentitySecret>,
    pub tokens: Arc<TokenManager>,
}

impl Identity {
    pub fn new(kind: IdentityKind, secret: IdentitySecret, tokens: TokenManager) -> Self {
        Self {
            kind,
            secret: Arc::new(secret),
            tokens: Arc::new(tokens),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }
}

/// Everything the engine is built from.
pub struct EngineParts {
    /// Identity new threads are created and accepted under.
    pub identity: Identity,
    /// Wallet-backed identity for guest-to-holder upgrades.
    pub holder: Option<Identity>,
    pub threads: Arc<dyn ThreadStore>,
    pub vault: Arc<dyn MessageVault>,
    pub keys: Arc<dyn KeyStore>,
    pub cache: Arc<dyn CacheBackend>,
    pub remote: Arc<dyn RemoteApi>,
    pub channel: Arc<dyn EventChannel>,
}

/// What a recipient needs to join a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub thread_id: ThreadId,
    pub control_token: Outpoint,
    pub data_token: Outpoint,
    pub inviter: PublicKey,
    pub inviter_kind: IdentityKind,
    pub inviter_id: String,
    pub permissions: DataTokenPermissions,
}

/// A vault message with its decrypted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message: Message,
    pub text: String,
}

/// The thread engine.
pub struct ThreadEngine {
    config: EngineConfig,
    identity: Identity,
    holder: Option<Identity>,
    threads: Arc<dyn ThreadStore>,
    vault: Arc<dyn MessageVault>,
    keys: Arc<dyn KeyStore>,
    cache: HelperCache,
    reconciler: Arc<Reconciler>,
    subscriptions: SubscriptionManager,
    projection: Projection,
    tasks: TaskQueue,
    arena: RwLock<HashMap<ThreadId, Thread>>,
    blocked: RwLock<HashMap<String, BlockedInviter>>,
    unpersisted: Mutex<HashSet<ThreadId>>,
    locks: ThreadLocks,
    profile_label: RwLock<Option<String>>,
    inbound: Mutex<Option<mpsc::Receiver<Frame>>>,
    worker: Mutex<Option<ReconcileWorker>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl ThreadEngine {
    pub fn new(parts: EngineParts, config: EngineConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let locks = ThreadLocks::new();
        let reconciler = Arc::new(
            Reconciler::new(
                parts.remote,
                Arc::clone(&parts.threads),
                Arc::clone(&parts.vault),
            )
            .with_locks(locks.clone()),
        );
        Arc::new(Self {
            cache: HelperCache::new(parts.cache, config.relay.clone()),
            tasks: TaskQueue::new(&config.tasks),
            subscriptions: SubscriptionManager::new(parts.channel, inbound_tx),
            projection: Projection::new(),
            identity: parts.identity,
            holder: parts.holder,
            threads: parts.threads,
            vault: parts.vault,
            keys: parts.keys,
            reconciler,
            arena: RwLock::new(HashMap::new()),
            blocked: RwLock::new(HashMap::new()),
            unpersisted: Mutex::new(HashSet::new()),
            locks,
            profile_label: RwLock::new(None),
            inbound: Mutex::new(Some(inbound_rx)),
            worker: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Load persisted state, subscribe live threads and start background work.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let stored = self.threads.list_threads().await?;
        let count = stored.len();
        for thread in stored {
            self.projection.upsert(&thread).await;
            if !thread.is_terminal() {
                self.subscribe(&thread.thread_id).await;
            }
            self.arena.write().await.insert(thread.thread_id.clone(), thread);
        }
        {
            let mut blocked = self.blocked.write().await;
            for inviter in self.threads.list_blocked_inviters().await? {
                blocked.insert(inviter.id.clone(), inviter);
            }
        }

        for identity in self.identities() {
            identity
                .tokens
                .add_burn_listener(Arc::new(self.cache.clone()))
                .await;
        }

        let mut background = self.background.lock().await;
        if let Some(rx) = self.inbound.lock().await.take() {
            background.push(tokio::spawn(dispatch(Arc::downgrade(self), rx)));
        }
        background.push(tokio::spawn(fold_sync_events(
            Arc::downgrade(self),
            self.reconciler.subscribe(),
        )));

        if self.config.background_reconcile {
            *self.worker.lock().await = Some(ReconcileWorker::spawn(
                Arc::clone(&self.reconciler),
                self.config.reconcile.clone(),
            ));
        }

        info!(
            key = %self.identity.public_key(),
            threads = count,
            "thread engine started"
        );
        Ok(())
    }

    /// Stop the reconcile worker, subscriptions and background tasks.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().await.take() {
            worker.shutdown().await;
        }
        self.subscriptions.shutdown().await;
        self.tasks.drain().await;
        self.tasks.shutdown().await;
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
        self.flush_unpersisted().await;
        info!("thread engine stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn helper_cache(&self) -> &HelperCache {
        &self.cache
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub async fn thread(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.arena.read().await.get(thread_id).cloned()
    }

    pub async fn threads(&self) -> Vec<Thread> {
        let mut out: Vec<_> = self.arena.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        out
    }

    pub async fn conversations(&self) -> Vec<ConversationView> {
        self.projection.list().await
    }

    pub async fn blocked_inviters(&self) -> Vec<BlockedInviter> {
        let mut out: Vec<_> = self.blocked.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Background failures since the last call.
    pub async fn task_errors(&self) -> Vec<TaskError> {
        self.tasks.take_errors().await
    }

    /// Wait for queued background work to finish.
    pub async fn settle(&self) {
        self.tasks.drain().await;
    }

    /// Decrypted messages of a thread in display order.
    pub async fn read_messages(&self, thread_id: &ThreadId) -> Result<Vec<MessageView>> {
        let thread = self.load(thread_id).await?;
        let messages = self.vault.list_by_thread(thread_id).await?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let key = self.content_key(&thread).await?;
        messages
            .into_iter()
            .map(|message| {
                let text = match &message.body {
                    MessageBody::Plaintext(text) => text.clone(),
                    MessageBody::Ciphertext(sealed) => open_text(sealed, &key)?,
                };
                Ok(MessageView { message, text })
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Thread creation and invites
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a thread and mint its control token.
    pub async fn create_thread(&self, policy: ThreadPolicy) -> Result<Thread> {
        let identity = &self.identity;
        let local_key = identity.public_key();
        let now = now_millis();
        let thread_id = ThreadId::generate();

        let mut thread = Thread::new(thread_id.clone(), identity.kind, local_key, policy, now);
        thread.inviter_id = Some(local_key.to_hex());

        let seed = json!({
            "thread_id": thread_id,
            "inviter": local_key,
            "created_at": now,
        })
        .to_string();
        let sealed = identity.tokens.seal_content(seed.as_bytes()).await?;
        let wrapped = wrap_key(&sealed.key, &local_key, WrapContext::ControlToken(sealed.hash))?;

        self.keys.put_key(&thread_id, sealed.key.as_bytes()).await?;
        let minted = match identity
            .tokens
            .mint_control_token(
                &sealed.hash.to_hex(),
                &wrapped.to_bytes(),
                Some(&sealed.hint_url),
                &thread.policy,
            )
            .await
        {
            Ok(minted) => minted,
            Err(e) => {
                if let Err(erase) = self.keys.erase_key(&thread_id).await {
                    warn!(thread_id = %thread_id, error = %erase, "failed to erase unused key");
                }
                return Err(e.into());
            }
        };

        let event = ControlEvent::MintCt {
            at: now,
            control_token: minted.outpoint,
            content_hash: sealed.hash,
            hint_url: Some(sealed.hint_url.clone()),
            minter: local_key,
            identity_kind: identity.kind,
            wrapped_key: Some(hex::encode(wrapped.to_bytes())),
        };
        thread = apply(&thread, &event, Origin::Local)?;
        let thread = self.commit(thread).await;

        self.subscribe(&thread_id).await;
        self.enroll_later(&thread).await;
        info!(thread_id = %thread_id, ct = %minted.outpoint, "created thread");
        Ok(thread)
    }

    /// Issue one data token per recipient and return their invites.
    pub async fn issue_data_tokens(
        &self,
        thread_id: &ThreadId,
        recipients: &[PublicKey],
        permissions: DataTokenPermissions,
    ) -> Result<Vec<Invite>> {
        let _guard = self.lock_thread(thread_id).await;
        let mut thread = self.load(thread_id).await?;
        let control_token = match thread.active_control_token() {
            Some(ct) if !thread.is_terminal() => ct,
            _ => {
                return Err(EngineError::InvalidTransition {
                    from: thread.status,
                    event: "mint-dt",
                })
            }
        };
        let identity = self.identity_for(&thread)?;
        let key = self.content_key(&thread).await?;

        let minted = identity
            .tokens
            .mint_data_tokens(control_token, recipients, &key, permissions)
            .await?;

        let now = now_millis();
        let mut events = Vec::with_capacity(minted.outputs.len());
        for issued in &minted.outputs {
            let event = ControlEvent::MintDt {
                at: now,
                data_token: issued.outpoint,
                control_token,
                recipient: issued.recipient,
                permissions: issued.permissions,
                wrapped_key: Some(hex::encode(&issued.wrapped_key)),
            };
            thread = apply(&thread, &event, Origin::Local)?;
            events.push(event);
        }
        let thread = self.commit(thread).await;
        for event in &events {
            self.publish_control(&thread, event).await;
        }

        let inviter_id = thread
            .inviter_id
            .clone()
            .unwrap_or_else(|| thread.local_key.to_hex());
        Ok(minted
            .outputs
            .into_iter()
            .map(|issued| Invite {
                thread_id: thread.thread_id.clone(),
                control_token,
                data_token: issued.outpoint,
                inviter: thread.local_key,
                inviter_kind: thread.identity_kind,
                inviter_id: inviter_id.clone(),
                permissions: issued.permissions,
            })
            .collect())
    }

    /// Redeem an invite and join the thread.
    pub async fn accept_invite(&self, invite: &Invite) -> Result<Thread> {
        if self.blocked.read().await.contains_key(&invite.inviter_id) {
            return Err(EngineError::AccessDenied(format!(
                "inviter {} is blocked",
                invite.inviter_id
            )));
        }
        let _guard = self.lock_thread(&invite.thread_id).await;
        if let Some(existing) = self.thread(&invite.thread_id).await {
            if existing.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    from: existing.status,
                    event: "link",
                });
            }
            return Ok(existing);
        }

        let identity = &self.identity;
        let local_key = identity.public_key();
        let redeemed = identity
            .tokens
            .redeem_data_token(invite.control_token, invite.data_token, &identity.secret)
            .await?;
        if !redeemed.hash_matches() {
            warn!(thread_id = %invite.thread_id, "invite content does not match declared hash");
        }

        let now = now_millis();
        let policy = ThreadPolicy {
            permissions: redeemed.permissions,
            ..ThreadPolicy::default()
        };
        let mut thread = Thread::new(invite.thread_id.clone(), identity.kind, local_key, policy, now);
        thread.inviter_id = Some(invite.inviter_id.clone());

        let label = self.profile_label.read().await.clone();
        let link = ControlEvent::Link {
            at: now,
            accepter: local_key,
            inviter: invite.inviter,
            label,
        };
        let peer_events = [
            ControlEvent::MintCt {
                at: now,
                control_token: invite.control_token,
                content_hash: redeemed.declared_hash,
                hint_url: redeemed.hint_url.clone(),
                minter: invite.inviter,
                identity_kind: invite.inviter_kind,
                wrapped_key: None,
            },
            ControlEvent::MintDt {
                at: now,
                data_token: invite.data_token,
                control_token: invite.control_token,
                recipient: local_key,
                permissions: redeemed.permissions,
                wrapped_key: None,
            },
        ];
        for event in &peer_events {
            thread = apply(&thread, event, Origin::Peer)?;
        }
        thread = apply(&thread, &link, Origin::Local)?;

        self.keys
            .put_key(&thread.thread_id, redeemed.content_key.as_bytes())
            .await?;
        let thread = self.commit(thread).await;

        self.subscribe(&thread.thread_id).await;
        self.publish_control(&thread, &link).await;
        if let Err(e) = self.import_pending(&thread.thread_id).await {
            warn!(thread_id = %thread.thread_id, error = %e, "pending import failed");
        }
        info!(thread_id = %thread.thread_id, inviter = %invite.inviter, "accepted invite");
        Ok(thread)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal, store and publish a message.
    pub async fn send_message(&self, thread_id: &ThreadId, text: &str) -> Result<Message> {
        if text.is_empty() {
            return Err(ValidationError::Empty("message").into());
        }
        let thread = self.load(thread_id).await?;
        if !thread.can_send() {
            return Err(EngineError::AccessDenied(send_refusal(&thread)));
        }

        if self.config.verify_on_send {
            self.verify_before_send(&thread).await?;
        }

        let key = self.content_key(&thread).await?;
        let sealed = EncryptedContent::seal(text.as_bytes(), &key)?.to_bytes()?;
        let now = now_millis();
        let message = self
            .vault
            .save(
                thread_id,
                MessageDraft::new(thread.local_key, MessageBody::Ciphertext(Bytes::from(sealed.clone())))
                    .with_timestamp(now),
            )
            .await?;

        let frame = Frame::Message(SealedMessage {
            thread_id: thread_id.clone(),
            id: message.id.clone(),
            author: thread.local_key,
            sealed: sealed.clone(),
            timestamp: message.timestamp,
        });
        if let Err(e) = self.subscriptions.publish(&frame).await {
            warn!(thread_id = %thread_id, error = %e, "live delivery failed");
        }

        if self.config.relay_pending_on_send && thread.policy.allow_offline_relay {
            if let Some(ct) = thread.control_token {
                let cache = self.cache.clone();
                let cache_id = HelperCache::cache_id(&ct);
                let fence = cache_id.clone();
                let pending = PendingMessage::new(message.id.clone(), thread.local_key, sealed, message.timestamp);
                self.relay_later(&fence, "relay pending message", async move {
                    cache
                        .put_pending_message(&cache_id, pending)
                        .await
                        .map_err(EngineError::from)
                })
                .await;
            }
        }

        self.projection.touch(thread_id, message.timestamp).await;
        debug!(thread_id = %thread_id, message_id = %message.id, "sent message");
        Ok(message)
    }

    /// Store a message received from the peer.
    ///
    /// Idempotent by message id. Fails with a decryption error if the body
    /// does not open under the thread key.
    pub async fn receive_message(&self, sealed: &SealedMessage) -> Result<Message> {
        let thread = self.load(&sealed.thread_id).await?;
        match thread.status {
            ThreadStatus::Pending | ThreadStatus::Active => {}
            status => {
                return Err(EngineError::AccessDenied(format!(
                    "thread is {}, not accepting messages",
                    status
                )))
            }
        }

        if let Some(existing) = self.vault.get(&sealed.id).await? {
            if existing.thread_id == sealed.thread_id {
                return Ok(existing);
            }
        }

        let key = self.content_key(&thread).await?;
        open_text(&sealed.sealed, &key)?;

        let message = self
            .vault
            .save(
                &sealed.thread_id,
                MessageDraft::new(sealed.author, MessageBody::Ciphertext(Bytes::from(sealed.sealed.clone())))
                    .with_id(sealed.id.clone())
                    .with_timestamp(sealed.timestamp)
                    .with_delivery(DeliveryStatus::Delivered),
            )
            .await?;
        self.projection.touch(&sealed.thread_id, message.timestamp).await;
        debug!(thread_id = %sealed.thread_id, message_id = %message.id, "received message");
        Ok(message)
    }

    /// Import messages parked in the helper cache while this side was offline.
    ///
    /// Relay trouble is logged and yields zero. Entries that fail to decrypt
    /// are skipped and logged.
    pub async fn import_pending(&self, thread_id: &ThreadId) -> Result<usize> {
        let thread = self.load(thread_id).await?;
        let Some(ct) = thread.active_control_token() else {
            return Ok(0);
        };
        let cache_id = HelperCache::cache_id(&ct);
        let pending = match self.cache.get_pending_messages(&cache_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "could not read pending messages");
                return Ok(0);
            }
        };

        let mut imported = 0;
        let mut remaining = 0;
        for entry in pending {
            if entry.author == thread.local_key {
                remaining += 1;
                continue;
            }
            let sealed = SealedMessage {
                thread_id: thread_id.clone(),
                id: entry.id,
                author: entry.author,
                sealed: entry.sealed,
                timestamp: entry.timestamp,
            };
            match self.receive_message(&sealed).await {
                Ok(_) => imported += 1,
                Err(e) => {
                    warn!(thread_id = %thread_id, message_id = %sealed.id, error = %e, "skipping pending message");
                }
            }
        }

        if imported > 0 && remaining == 0 {
            if let Err(e) = self.cache.clear_pending_messages(&cache_id).await {
                warn!(thread_id = %thread_id, error = %e, "could not clear pending messages");
            }
        }
        if imported > 0 {
            info!(thread_id = %thread_id, imported, "imported pending messages");
        }
        Ok(imported)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Spend the control token, revoking every data token.
    ///
    /// The ledger spend must succeed before anything local changes. The
    /// vault purge, key erasure and cache delete that follow are each
    /// attempted and logged on failure.
    pub async fn burn_thread(&self, thread_id: &ThreadId) -> Result<BurnReceipt> {
        let _guard = self.lock_thread(thread_id).await;
        let thread = self.load(thread_id).await?;
        let control_token = match thread.active_control_token() {
            Some(ct) => ct,
            None => {
                return Err(EngineError::InvalidTransition {
                    from: thread.status,
                    event: "burn",
                })
            }
        };
        let identity = self.identity_for(&thread)?;

        let receipt = identity.tokens.burn_control_token(control_token).await?;

        let event = ControlEvent::Burn {
            at: now_millis(),
            burn_txid: Some(receipt.burn_txid),
        };
        let burned = self.commit(apply(&thread, &event, Origin::Local)?).await;
        // Publish before tearing down so the peer still shares the topic.
        self.publish_control(&thread, &event).await;
        self.teardown(&burned, Some(control_token), true).await;
        info!(thread_id = %thread_id, burn_txid = %receipt.burn_txid, "burned thread");
        Ok(receipt)
    }

    /// Leave without spending the control token.
    pub async fn leave_thread(&self, thread_id: &ThreadId) -> Result<Thread> {
        let _guard = self.lock_thread(thread_id).await;
        let thread = self.load(thread_id).await?;
        let event = ControlEvent::Leave { at: now_millis() };
        let left = apply(&thread, &event, Origin::Local)?;
        if left == thread {
            return Ok(left);
        }
        let left = self.commit(left).await;
        self.publish_control(&left, &event).await;
        self.teardown(&left, thread.control_token, true).await;
        info!(thread_id = %thread_id, "left thread");
        Ok(left)
    }

    pub async fn block_thread(&self, thread_id: &ThreadId, reason: Option<String>) -> Result<Thread> {
        let event = ControlEvent::Block {
            at: now_millis(),
            reason,
        };
        self.local_transition(thread_id, event).await
    }

    pub async fn unblock_thread(&self, thread_id: &ThreadId) -> Result<Thread> {
        self.local_transition(thread_id, ControlEvent::Unblock { at: now_millis() })
            .await
    }

    /// Re-mint a guest thread's control token under the holder identity.
    ///
    /// The content key is kept, the peer's data token is reissued under the
    /// new token, and the old token is burned on a best-effort basis.
    pub async fn upgrade_identity(&self, thread_id: &ThreadId) -> Result<Thread> {
        let holder = self
            .holder
            .as_ref()
            .ok_or_else(|| EngineError::AccessDenied("no holder identity configured".into()))?;
        let _guard = self.lock_thread(thread_id).await;
        let thread = self.load(thread_id).await?;

        let invalid = || EngineError::InvalidTransition {
            from: thread.status,
            event: "mint-ct",
        };
        if thread.is_terminal() || thread.identity_kind != IdentityKind::Guest {
            return Err(invalid());
        }
        let (Some(old_ct), Some(hash)) = (thread.control_token, thread.content_hash) else {
            return Err(invalid());
        };
        let guest = self.identity_for(&thread)?;
        let key = self.content_key(&thread).await?;
        let holder_key = holder.public_key();

        let wrapped = wrap_key(&key, &holder_key, WrapContext::ControlToken(hash))?;
        let minted = holder
            .tokens
            .mint_control_token(
                &hash.to_hex(),
                &wrapped.to_bytes(),
                thread.hint_url.as_deref(),
                &thread.policy,
            )
            .await?;
        holder.tokens.remember_key(minted.outpoint, key.clone()).await;

        let now = now_millis();
        let mint_ct = ControlEvent::MintCt {
            at: now,
            control_token: minted.outpoint,
            content_hash: hash,
            hint_url: thread.hint_url.clone(),
            minter: holder_key,
            identity_kind: IdentityKind::Holder,
            wrapped_key: Some(hex::encode(wrapped.to_bytes())),
        };
        let mut upgraded = apply(&thread, &mint_ct, Origin::Local)?;
        let mut events = vec![mint_ct];

        if let Some(peer) = thread.peer_key {
            let permissions = thread
                .data_tokens
                .iter()
                .rev()
                .find(|dt| dt.recipient == peer)
                .map(|dt| dt.permissions)
                .unwrap_or_default();
            let reissued = holder
                .tokens
                .mint_data_tokens(minted.outpoint, &[peer], &key, permissions)
                .await?;
            for issued in reissued.outputs {
                let event = ControlEvent::MintDt {
                    at: now,
                    data_token: issued.outpoint,
                    control_token: minted.outpoint,
                    recipient: issued.recipient,
                    permissions: issued.permissions,
                    wrapped_key: Some(hex::encode(&issued.wrapped_key)),
                };
                upgraded = apply(&upgraded, &event, Origin::Local)?;
                events.push(event);
            }
        }

        let upgraded = self.commit(upgraded).await;
        for event in &events {
            self.publish_control(&thread, event).await;
        }

        if let Err(e) = guest.tokens.burn_control_token(old_ct).await {
            warn!(thread_id = %thread_id, ct = %old_ct, error = %e, "could not burn superseded control token");
        }
        self.enroll_later(&upgraded).await;
        info!(thread_id = %thread_id, ct = %minted.outpoint, "upgraded thread to holder identity");
        Ok(upgraded)
    }

    /// Set the label peers see and announce it on every live thread.
    pub async fn update_profile(&self, label: Option<String>) -> Result<usize> {
        *self.profile_label.write().await = label.clone();
        let event = ControlEvent::ProfileUpdate {
            at: now_millis(),
            label,
        };
        let live: Vec<_> = self
            .arena
            .read()
            .await
            .values()
            .filter(|t| !t.is_terminal() && t.peer_key.is_some())
            .cloned()
            .collect();
        for thread in &live {
            self.publish_control(thread, &event).await;
        }
        Ok(live.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blocked inviters
    // ─────────────────────────────────────────────────────────────────────────

    /// Block an inviter and remove every thread they created.
    ///
    /// Returns how many threads were removed.
    pub async fn block_inviter(&self, inviter_id: &str, reason: Option<String>) -> Result<usize> {
        cinder_core::require_non_empty("inviter_id", inviter_id.as_bytes())?;
        let record = BlockedInviter {
            id: inviter_id.to_string(),
            reason,
            blocked_at: now_millis(),
        };
        if let Err(e) = self.threads.put_blocked_inviter(&record).await {
            warn!(inviter = %record.id, error = %e, "could not persist blocked inviter");
        }
        self.blocked.write().await.insert(record.id.clone(), record);

        let doomed: Vec<_> = self
            .arena
            .read()
            .await
            .values()
            .filter(|t| t.inviter_id.as_deref() == Some(inviter_id))
            .cloned()
            .collect();

        for thread in &doomed {
            let _guard = self.lock_thread(&thread.thread_id).await;
            self.teardown(thread, thread.control_token, true).await;
            self.arena.write().await.remove(&thread.thread_id);
            self.unpersisted.lock().await.remove(&thread.thread_id);
            if let Err(e) = self.threads.delete_thread(&thread.thread_id).await {
                warn!(thread_id = %thread.thread_id, error = %e, "could not delete thread record");
            }
            self.projection.remove(&thread.thread_id).await;

            let reconciler = Arc::clone(&self.reconciler);
            let id = thread.thread_id.clone();
            self.background("purge remote thread", async move {
                reconciler.purge_remote(&id).await.map_err(EngineError::from)
            })
            .await;
        }

        info!(inviter = %inviter_id, removed = doomed.len(), "blocked inviter");
        Ok(doomed.len())
    }

    pub async fn unblock_inviter(&self, inviter_id: &str) -> Result<bool> {
        let removed = self.blocked.write().await.remove(inviter_id).is_some();
        if let Err(e) = self.threads.remove_blocked_inviter(inviter_id).await {
            warn!(inviter = %inviter_id, error = %e, "could not remove blocked inviter");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a frame received from the channel.
    pub async fn handle_inbound(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Message(sealed) => {
                if self.is_own_key(&sealed.author) {
                    return Ok(());
                }
                self.receive_message(&sealed).await.map(|_| ())
            }
            Frame::Control(envelope) => {
                if self.is_own_key(&envelope.from) {
                    return Ok(());
                }
                self.handle_control(envelope).await
            }
        }
    }

    async fn handle_control(&self, envelope: ControlEnvelope) -> Result<()> {
        let ControlEnvelope {
            thread_id,
            from,
            event,
        } = envelope;
        let _guard = self.lock_thread(&thread_id).await;
        let Some(thread) = self.thread(&thread_id).await else {
            debug!(thread_id = %thread_id, event = event.tag(), "control event for unknown thread");
            return Ok(());
        };

        match &event {
            ControlEvent::Link { accepter, .. } => {
                if !thread.data_tokens.is_empty()
                    && !thread.data_tokens.iter().any(|dt| dt.recipient == *accepter)
                {
                    return Err(EngineError::AccessDenied(format!(
                        "{} holds no data token for this thread",
                        accepter
                    )));
                }
            }
            ControlEvent::Burn { .. } => {
                if let Some(ct) = thread.active_control_token() {
                    let identity = self.identity_for(&thread)?;
                    match identity.tokens.verify_control_token(ct).await {
                        Ok(status) if status.status == TokenStatus::Active => {
                            return Err(EngineError::AccessDenied(format!(
                                "burn announced for unspent control token {}",
                                ct
                            )));
                        }
                        Ok(_) | Err(TokenError::TokenBurned(_)) | Err(TokenError::OutputNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            _ => {}
        }

        let next = apply(&thread, &event, Origin::Peer)?;
        if next == thread {
            return Ok(());
        }
        let next = self.commit(next).await;
        debug!(thread_id = %thread_id, event = event.tag(), from = %from, "applied peer event");

        match &event {
            ControlEvent::Burn { .. } => {
                self.teardown(&next, thread.control_token, true).await;
                info!(thread_id = %thread_id, "peer burned thread");
            }
            ControlEvent::Leave { .. } => {
                self.teardown(&next, thread.control_token, true).await;
                info!(thread_id = %thread_id, "peer left thread");
            }
            ControlEvent::MintDt {
                data_token,
                control_token,
                recipient,
                ..
            } if *recipient == next.local_key => {
                let identity = self.identity_for(&next)?;
                let redeemed = identity
                    .tokens
                    .redeem_data_token(*control_token, *data_token, &identity.secret)
                    .await?;
                self.keys
                    .put_key(&thread_id, redeemed.content_key.as_bytes())
                    .await?;
                debug!(thread_id = %thread_id, dt = %data_token, "redeemed reissued data token");
            }
            _ => {}
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Flush pending local writes and run one reconcile cycle now.
    pub async fn reconcile_now(&self) -> Result<(ReconcileReport, PushReport)> {
        self.flush_unpersisted().await;
        let reports = self.reconciler.run_cycle().await?;
        for thread in self.threads.list_threads().await? {
            self.fold_thread(thread).await;
        }
        Ok(reports)
    }

    /// Adopt a thread record written by the reconciler.
    async fn fold_thread(&self, thread: Thread) {
        let _guard = self.locks.lock(&thread.thread_id).await;
        self.fold_locked(thread).await;
    }

    async fn fold_locked(&self, thread: Thread) {
        let previous = self.thread(&thread.thread_id).await;
        if let Some(prev) = &previous {
            if prev.metadata_revision > thread.metadata_revision
                || (prev.metadata_revision == thread.metadata_revision
                    && prev.message_revision >= thread.message_revision)
            {
                return;
            }
        }
        let id = thread.thread_id.clone();
        let became_terminal =
            thread.is_terminal() && previous.as_ref().map_or(true, |p| !p.is_terminal());

        self.arena.write().await.insert(id.clone(), thread.clone());
        self.projection.upsert(&thread).await;

        if became_terminal {
            if previous.is_some() {
                let ct = previous.and_then(|p| p.control_token);
                self.teardown(&thread, ct, false).await;
            }
        } else if !thread.is_terminal() && previous.is_none() {
            self.subscribe(&id).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn identities(&self) -> impl Iterator<Item = &Identity> {
        std::iter::once(&self.identity).chain(self.holder.iter())
    }

    fn is_own_key(&self, key: &PublicKey) -> bool {
        self.identities().any(|i| i.public_key() == *key)
    }

    /// The identity whose key the thread is bound to.
    fn identity_for(&self, thread: &Thread) -> Result<&Identity> {
        self.identities()
            .find(|i| i.public_key() == thread.local_key)
            .ok_or_else(|| {
                EngineError::AccessDenied(format!(
                    "no local identity for key {}",
                    thread.local_key
                ))
            })
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Thread> {
        self.thread(thread_id)
            .await
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.clone()))
    }

    /// Lock a thread and catch the arena up with any newer record the
    /// reconciler stored while the lock was free.
    async fn lock_thread(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let guard = self.locks.lock(thread_id).await;
        if self.arena.read().await.contains_key(thread_id) {
            match self.threads.get_thread(thread_id).await {
                Ok(Some(stored)) => self.fold_locked(stored).await,
                Ok(None) => {}
                Err(e) => debug!(thread_id = %thread_id, error = %e, "could not read stored record"),
            }
        }
        guard
    }

    /// Put a record in the arena, persist it and refresh the projection.
    async fn commit(&self, thread: Thread) -> Thread {
        self.arena
            .write()
            .await
            .insert(thread.thread_id.clone(), thread.clone());
        match self.threads.put_thread(&thread).await {
            Ok(()) => {
                self.unpersisted.lock().await.remove(&thread.thread_id);
            }
            Err(e) => {
                warn!(thread_id = %thread.thread_id, error = %e, "persist failed, keeping in-memory record");
                self.unpersisted.lock().await.insert(thread.thread_id.clone());
            }
        }
        self.projection.upsert(&thread).await;
        thread
    }

    async fn flush_unpersisted(&self) {
        let pending: Vec<_> = self.unpersisted.lock().await.iter().cloned().collect();
        for id in pending {
            let Some(thread) = self.thread(&id).await else {
                self.unpersisted.lock().await.remove(&id);
                continue;
            };
            match self.threads.put_thread(&thread).await {
                Ok(()) => {
                    self.unpersisted.lock().await.remove(&id);
                    debug!(thread_id = %id, "flushed in-memory record");
                }
                Err(e) => warn!(thread_id = %id, error = %e, "persist still failing"),
            }
        }
    }

    async fn local_transition(&self, thread_id: &ThreadId, event: ControlEvent) -> Result<Thread> {
        let _guard = self.lock_thread(thread_id).await;
        let thread = self.load(thread_id).await?;
        let next = apply(&thread, &event, Origin::Local)?;
        if next == thread {
            return Ok(next);
        }
        let next = self.commit(next).await;
        self.publish_control(&next, &event).await;
        Ok(next)
    }

    /// Mirror a local event to the peer. Best-effort.
    async fn publish_control(&self, thread: &Thread, event: &ControlEvent) {
        let frame = Frame::Control(ControlEnvelope {
            thread_id: thread.thread_id.clone(),
            from: thread.local_key,
            event: event.outbound(),
        });
        if let Err(e) = self.subscriptions.publish(&frame).await {
            warn!(thread_id = %thread.thread_id, event = event.tag(), error = %e, "could not publish control event");
        }
    }

    async fn subscribe(&self, thread_id: &ThreadId) {
        if let Err(e) = self.subscriptions.subscribe(thread_id).await {
            warn!(thread_id = %thread_id, error = %e, "subscribe failed");
        }
    }

    /// Purge local traces of an ended thread. Each step runs regardless of
    /// the others.
    async fn teardown(&self, thread: &Thread, control_token: Option<Outpoint>, delete_cache: bool) {
        let id = &thread.thread_id;
        match self.vault.purge_thread(id).await {
            Ok(purged) => debug!(thread_id = %id, purged, "purged vault"),
            Err(e) => warn!(thread_id = %id, error = %e, "vault purge failed"),
        }
        if let Err(e) = self.keys.erase_key(id).await {
            warn!(thread_id = %id, error = %e, "key erase failed");
        }
        if let Some(ct) = control_token {
            for identity in self.identities() {
                identity.tokens.forget_key(ct).await;
            }
            if delete_cache {
                let cache_id = HelperCache::cache_id(&ct);
                self.tasks.revoke(&cache_id).await;
                if let Err(e) = self.cache.delete(&cache_id).await {
                    warn!(thread_id = %id, error = %e, "helper cache delete failed");
                }
            }
        }
        if let Err(e) = self.subscriptions.unsubscribe(id).await {
            warn!(thread_id = %id, error = %e, "unsubscribe failed");
        }
    }

    /// The thread's content key, recovered from the control token if the
    /// key store has lost it.
    async fn content_key(&self, thread: &Thread) -> Result<ContentKey> {
        if let Some(bytes) = self.keys.get_key(&thread.thread_id).await? {
            return Ok(ContentKey::from_bytes(*bytes));
        }
        let missing = || EngineError::AccessDenied("no content key for thread".into());
        let ct = thread.active_control_token().ok_or_else(missing)?;
        let identity = self.identity_for(thread)?;
        match identity.tokens.recover_content_key(ct, &identity.secret).await {
            Ok(key) => {
                self.keys.put_key(&thread.thread_id, key.as_bytes()).await?;
                debug!(thread_id = %thread.thread_id, "recovered content key from control token");
                Ok(key)
            }
            Err(TokenError::TokenBurned(ct)) => Err(TokenError::TokenBurned(ct).into()),
            Err(e) => {
                debug!(thread_id = %thread.thread_id, error = %e, "content key not recoverable");
                Err(missing())
            }
        }
    }

    async fn verify_before_send(&self, thread: &Thread) -> Result<()> {
        let Some(ct) = thread.control_token else {
            return Ok(());
        };
        let identity = self.identity_for(thread)?;
        let burned = match identity.tokens.verify_control_token(ct).await {
            Ok(status) => status.status == TokenStatus::Burned,
            Err(TokenError::TokenBurned(_)) => true,
            Err(e) => return Err(e.into()),
        };
        if burned {
            let _guard = self.lock_thread(&thread.thread_id).await;
            let event = ControlEvent::Burn {
                at: now_millis(),
                burn_txid: None,
            };
            let ended = self.commit(apply(thread, &event, Origin::Peer)?).await;
            self.teardown(&ended, Some(ct), true).await;
            warn!(thread_id = %thread.thread_id, ct = %ct, "control token burned, refusing send");
            return Err(TokenError::TokenBurned(ct).into());
        }
        Ok(())
    }

    async fn enroll_later(&self, thread: &Thread) {
        let Some(ct) = thread.control_token else {
            return;
        };
        let cache = self.cache.clone();
        let thread_id = thread.thread_id.clone();
        let payload = json!({
            "thread_id": thread.thread_id,
            "control_token": ct,
            "content_hash": thread.content_hash,
            "hint_url": thread.hint_url,
            "inviter": thread.local_key,
        });
        self.relay_later(&HelperCache::cache_id(&ct), "enroll thread", async move {
            cache
                .enroll(&thread_id, &ct, payload)
                .await
                .map(|_| ())
                .map_err(EngineError::from)
        })
        .await;
    }

    async fn background<F>(&self, label: &str, task: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if let Err(e) = self.tasks.spawn(label, task).await {
            warn!(task = label, error = %e, "background task not queued");
        }
    }

    /// Queue a helper cache write for `cache_id`. Writes still queued when
    /// the entry is deleted are dropped.
    async fn relay_later<F>(&self, cache_id: &str, label: &str, task: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if let Err(e) = self.tasks.spawn_fenced(cache_id, label, task).await {
            warn!(task = label, error = %e, "relay write not queued");
        }
    }
}

fn send_refusal(thread: &Thread) -> String {
    if thread.status != ThreadStatus::Active {
        format!("thread is {}", thread.status)
    } else if !thread.policy.permissions.can_write() {
        "data token is read-only".to_string()
    } else {
        "thread has no control token".to_string()
    }
}

fn open_text(sealed: &[u8], key: &ContentKey) -> Result<String> {
    let plaintext = EncryptedContent::from_bytes(sealed)?.open(key)?;
    String::from_utf8(plaintext)
        .map_err(|e| ValidationError::MalformedPayload(format!("message is not utf-8: {e}")).into())
}

/// Feed channel frames to the engine until the engine or the channel goes away.
async fn dispatch(engine: Weak<ThreadEngine>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        let thread_id = frame.thread_id().clone();
        if let Err(e) = engine.handle_inbound(frame).await {
            warn!(thread_id = %thread_id, error = %e, kind = ?e.kind(), "inbound frame rejected");
        }
    }
}

/// Fold reconciler notifications into the arena and projection.
async fn fold_sync_events(engine: Weak<ThreadEngine>, mut rx: broadcast::Receiver<SyncEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "sync events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match event {
            SyncEvent::ThreadMerged { thread, ties, .. } => {
                if !ties.is_empty() {
                    debug!(thread_id = %thread.thread_id, ties = ties.len(), "merged with ties");
                }
                engine.fold_thread(thread).await;
            }
            SyncEvent::ThreadDiscovered { thread } => engine.fold_thread(thread).await,
            SyncEvent::MessagesApplied { thread_id, .. } => {
                engine.projection.touch(&thread_id, now_millis()).await;
            }
            SyncEvent::CycleFailed { error } => debug!(%error, "reconcile cycle failed"),
        }
    }
}
