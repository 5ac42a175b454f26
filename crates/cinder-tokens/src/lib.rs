//! # Cinder Tokens
//!
//! Capability tokens anchored to ledger outputs.
//!
//! ## Overview
//!
//! A **control token** (CT) is an unspent output whose payload declares the
//! content hash, a hint URL for the sealed content, and the content key
//! wrapped to the minter. A **data token** (DT) references a CT outpoint and
//! carries the same content key wrapped to one recipient. Spending the CT to
//! an unspendable output revokes every DT that references it, because
//! redemption always checks CT spend status first.
//!
//! ## Encryption Model
//!
//! 1. **Content key**: ChaCha20-Poly1305 key sealing the thread content
//! 2. **Key wrap**: X25519 ECDH with an ephemeral key, Blake3-derived wrapping
//!    key bound to the token context, ChaCha20-Poly1305 over the content key
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinder_core::{DataTokenPermissions, ThreadPolicy};
//! use cinder_tokens::{
//!     wrap_key, IdentitySecret, MemoryChain, MemoryContentStore, MemoryWallet,
//!     TokenManager, WrapContext,
//! };
//!
//! # async fn demo() -> cinder_tokens::Result<()> {
//! let chain = MemoryChain::new();
//! let alice = IdentitySecret::generate();
//! let bob = IdentitySecret::generate();
//! let tokens = TokenManager::new(
//!     Arc::new(MemoryWallet::new(chain, alice.public_key())),
//!     Arc::new(MemoryContentStore::new()),
//! );
//!
//! let sealed = tokens.seal_content(b"hello").await?;
//! let wrapped = wrap_key(&sealed.key, &alice.public_key(), WrapContext::ControlToken(sealed.hash))?;
//! let ct = tokens
//!     .mint_control_token(&sealed.hash.to_hex(), &wrapped.to_bytes(), Some(&sealed.hint_url), &ThreadPolicy::default())
//!     .await?;
//! let dts = tokens
//!     .mint_data_tokens(ct.outpoint, &[bob.public_key()], &sealed.key, DataTokenPermissions::ReadWrite)
//!     .await?;
//! # let _ = dts;
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod payload;
pub mod wrap;

pub use content::{ContentStore, MemoryContentStore};
pub use crypto::{ContentKey, EncryptionNonce, EphemeralKeyPair, IdentitySecret, SharedKey};
pub use envelope::{EncryptedContent, EncryptionFormat};
pub use error::{Result, TokenError};
pub use ledger::{
    ActionResult, BroadcastMeta, CreateAction, KeyOptions, Ledger, LedgerOutput, LockingScript,
    MemoryChain, MemoryWallet, SignedTx, TxOutput,
};
pub use manager::{
    BurnListener, BurnReceipt, ControlTokenStatus, IssuedDataToken, MintedControlToken,
    MintedDataTokens, RedeemedContent, SealedContent, TokenManager, TokenStatus,
};
pub use payload::{ControlTokenPayload, DataTokenMode, DataTokenPayload, TokenPayload};
pub use wrap::{unwrap_key, wrap_key, WrapContext, WrappedKey, WRAPPED_KEY_LEN};
