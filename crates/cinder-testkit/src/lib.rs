//! # Cinder Testkit
//!
//! Testing utilities for Cinder.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed token payloads and channel frames with the
//!   decoding each implementation must agree on
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A shared in-process network and party builders for
//!   multi-party and multi-device scenarios
//!
//! ## Golden Vectors
//!
//! ```rust
//! use cinder_testkit::vectors::{payload_vectors, check_payload_vector};
//!
//! for vector in payload_vectors() {
//!     assert!(check_payload_vector(&vector).is_ok(), "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cinder_testkit::generators::{control_event, thread, origin};
//!
//! proptest! {
//!     #[test]
//!     fn apply_never_panics(t in thread(), e in control_event(), o in origin()) {
//!         let _ = cinder::apply(&t, &e, o);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use cinder_testkit::fixtures::TestNet;
//!
//! async fn example() {
//!     let net = TestNet::new();
//!     let alice = net.holder().await;
//!     let bob = net.guest().await;
//!     let phone = net.device_of(&alice).await;
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{test_config, wait_until, FlakyThreadStore, Party, PartyBuilder, TestNet};
pub use vectors::{frame_vectors, payload_vectors, verify_all_vectors, FrameVector, PayloadVector};
