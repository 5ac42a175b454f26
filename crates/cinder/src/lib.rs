//! # Cinder
//!
//! Private, revocable conversation threads backed by capability tokens.
//!
//! ## Overview
//!
//! A thread is created by minting a **control token** (CT) that carries the
//! sealed thread content and a self-wrapped content key. Participants are
//! invited by issuing **data tokens** (DTs) that wrap the same key for each
//! recipient. Spending the CT ("burning") revokes every DT at once.
//!
//! This crate ties the component crates together:
//!
//! - **Engine**: thread lifecycle, message send/receive and invites
//! - **Control events**: the closed set of lifecycle events mirrored to peers
//! - **Transitions**: one total state machine over (status, event, origin)
//! - **Subscriptions**: per-thread topics over a pluggable event channel
//! - **Projection**: the observable conversation list
//!
//! ## Key Concepts
//!
//! - **Burn is final.** Once the CT is spent, no local or peer event can
//!   revive the thread.
//! - **Events are written from the sender's view.** The receiving side
//!   interprets them through [`Origin::Peer`].
//! - **Token work is fatal, relay work is not.** Ledger failures abort the
//!   operation; helper cache and remote writes are retried in the background.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cinder::{EngineConfig, EngineParts, Identity, MemoryEventHub, ThreadEngine};
//! use cinder::core::{DataTokenPermissions, IdentityKind, ThreadPolicy};
//! use cinder::relay::MemoryCacheBackend;
//! use cinder::store::SqliteStore;
//! use cinder::sync::MemoryRemote;
//! use cinder::tokens::{IdentitySecret, MemoryChain, MemoryContentStore, MemoryWallet, TokenManager};
//!
//! async fn example() -> cinder::Result<()> {
//!     let secret = IdentitySecret::generate();
//!     let wallet = MemoryWallet::new(MemoryChain::new(), secret.public_key());
//!     let tokens = TokenManager::new(Arc::new(wallet), Arc::new(MemoryContentStore::new()));
//!     let store = Arc::new(SqliteStore::open("cinder.db")?);
//!
//!     let engine = ThreadEngine::new(
//!         EngineParts {
//!             identity: Identity::new(IdentityKind::Holder, secret, tokens),
//!             holder: None,
//!             threads: store.clone(),
//!             vault: store.clone(),
//!             keys: store,
//!             cache: Arc::new(MemoryCacheBackend::new()),
//!             remote: MemoryRemote::new(),
//!             channel: Arc::new(MemoryEventHub::new().connect()),
//!         },
//!         EngineConfig::default(),
//!     );
//!     engine.init().await?;
//!
//!     let thread = engine.create_thread(ThreadPolicy::default()).await?;
//!     let friend = IdentitySecret::generate().public_key();
//!     let invites = engine
//!         .issue_data_tokens(&thread.thread_id, &[friend], DataTokenPermissions::ReadWrite)
//!         .await?;
//!     println!("invite: {}", serde_json::to_string(&invites[0]).unwrap());
//!
//!     engine.burn_thread(&thread.thread_id).await?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `cinder::core` - Identifiers, thread records, messages, errors
//! - `cinder::tokens` - Capability tokens, key wrapping, ledger seam
//! - `cinder::store` - Storage abstraction, SQLite and in-memory stores
//! - `cinder::relay` - Helper cache client
//! - `cinder::sync` - Remote reconciliation

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod projection;
pub mod subscription;
pub mod tasks;
pub mod transition;

// Re-export component crates
pub use cinder_core as core;
pub use cinder_relay as relay;
pub use cinder_store as store;
pub use cinder_sync as sync;
pub use cinder_tokens as tokens;

// Re-export main types for convenience
pub use config::{EngineConfig, TaskQueueConfig};
pub use engine::{EngineParts, Identity, Invite, MessageView, ThreadEngine};
pub use error::{EngineError, Result};
pub use event::{ControlEnvelope, ControlEvent, Frame, Origin, SealedMessage, CONTROL_TAGS};
pub use projection::{ConversationView, Projection};
pub use subscription::{EventChannel, MemoryEventChannel, MemoryEventHub, SubscriptionManager};
pub use tasks::{TaskError, TaskQueue};
pub use transition::apply;

// Re-export commonly used core types
pub use cinder_core::{
    DataTokenPermissions, ErrorKind, IdentityKind, Message, MessageId, Outpoint, PublicKey,
    Thread, ThreadId, ThreadPolicy, ThreadStatus,
};
