//! # Cinder Store
//!
//! Local persistence for threads, messages, and content keys.
//!
//! ## Overview
//!
//! Three traits cover what the engine persists:
//!
//! - [`MessageVault`]: messages keyed by id, idempotent upserts, per-thread
//!   purge that reports how many rows it removed
//! - [`ThreadStore`]: thread records and blocked inviters
//! - [`KeyStore`]: raw per-thread content keys, overwritten before deletion
//!
//! Both backends implement all three.
//!
//! ## Backends
//!
//! - [`SqliteStore`]: rusqlite with bundled SQLite, versioned migrations
//! - [`MemoryStore`]: same semantics, no persistence

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{KeyStore, MessageVault, ThreadStore};
