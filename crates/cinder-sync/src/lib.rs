//! # Cinder Sync
//!
//! Revision-based reconciliation of thread metadata and messages across a
//! user's devices.
//!
//! ## Overview
//!
//! Each thread's metadata and each message carries a monotonic `revision`.
//! A [`Reconciler`] pulls whatever the remote is ahead on, merges metadata
//! field by field through revision-tagged [`Register`]s, upserts messages by
//! id, and pushes local-origin writes back. Remote-origin writes are never
//! re-uploaded.
//!
//! ## Key Properties
//!
//! - **Idempotent**: applying the same remote message twice leaves one entry
//! - **Monotonic**: local revisions never move backward
//! - **Terminal-safe**: a burned or left thread is never revived by a merge
//! - **Best-effort**: failures surface as `Network` errors and the
//!   [`ReconcileWorker`] backs off (base 60s, doubling, capped at 5 minutes)
//!
//! ## Cycle
//!
//! ```text
//! Device                               Remote
//!   |-------- listThreads ------------->|
//!   |<------- summaries ----------------|
//!   |-------- fetchMetadata(since) ---->|   (metadata revision ahead)
//!   |-------- fetchMessages(since) ---->|   (message cursor ahead)
//!   |-------- uploadMetadata ---------->|   (local revision unseen)
//!   |-------- uploadMessage ----------->|   (local-origin only)
//! ```

pub mod backoff;
pub mod error;
pub mod http;
pub mod locks;
pub mod messages;
pub mod reconciler;
pub mod register;
pub mod remote;
pub mod worker;

pub use backoff::Backoff;
pub use error::{Result, SyncError};
pub use http::HttpRemote;
pub use locks::ThreadLocks;
pub use messages::{MetadataMerge, RemoteMessage, ThreadMetadata, ThreadSummary};
pub use reconciler::{PushReport, ReconcileReport, Reconciler, SyncEvent};
pub use register::{MergeOutcome, Register};
pub use remote::{MemoryRemote, RemoteApi};
pub use worker::{ReconcileConfig, ReconcileWorker};
