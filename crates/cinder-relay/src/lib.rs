//! # Cinder Relay
//!
//! Store-and-forward client for the helper cache.
//!
//! The helper cache is an external, TTL-garbage-collected key/value service.
//! Threads enroll under their control token outpoint (`txid:vout`) so an
//! offline recipient can find the thread payload, and senders append sealed
//! messages under `txid:vout:messages` for the peer to import later.
//!
//! ## Backends
//!
//! - [`HttpCacheBackend`]: reqwest over the `/cache/{id}` HTTP surface with
//!   bounded retry
//! - [`MemoryCacheBackend`]: in-process map for tests
//!
//! ## Revocation
//!
//! [`HelperCache`] implements [`cinder_tokens::BurnListener`], so registering
//! it with the token manager deletes both keys whenever a control token burns.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod http;

pub use backend::{CacheBackend, CacheEntry, CacheQuota, CacheStatus, MemoryCacheBackend, PruneResult};
pub use client::{EnrollmentRecord, HelperCache, PendingMessage, ENTRY_VERSION};
pub use config::{RelayConfig, RetryPolicy, RETRYABLE_STATUSES};
pub use error::{RelayError, Result};
pub use http::HttpCacheBackend;
