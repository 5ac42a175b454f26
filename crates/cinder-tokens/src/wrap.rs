//! Key wrap primitive.
//!
//! A content key is wrapped to one recipient public key with a fresh
//! ephemeral X25519 key pair. The wrapping key is derived from the ECDH
//! secret and a context naming what the key is bound to, so a wrapped key
//! lifted from one token cannot be replayed under another.
//!
//! Wire layout: `ephemeral_public (32) || nonce (12) || ciphertext (48)`.

use cinder_core::{ContentHash, Outpoint, PublicKey};

use crate::crypto::{ContentKey, EncryptionNonce, EphemeralKeyPair, IdentitySecret};
use crate::error::{Result, TokenError};

/// Length of a serialized wrapped key (32-byte key plus 16-byte tag).
pub const WRAPPED_KEY_LEN: usize = 32 + 12 + 32 + 16;

/// What a wrapped key is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapContext {
    /// The CT-level self-wrap, bound to the declared content hash.
    ControlToken(ContentHash),
    /// A per-recipient wrap, bound to the CT it was issued under.
    DataToken(Outpoint),
    /// Wrapping outside any token (tests, local key export).
    Detached,
}

impl WrapContext {
    fn to_bytes(self) -> Vec<u8> {
        match self {
            WrapContext::ControlToken(hash) => {
                let mut out = b"ct:".to_vec();
                out.extend_from_slice(hash.as_bytes());
                out
            }
            WrapContext::DataToken(ct) => {
                let mut out = b"dt:".to_vec();
                out.extend_from_slice(ct.txid.as_bytes());
                out.extend_from_slice(&ct.vout.to_be_bytes());
                out
            }
            WrapContext::Detached => b"detached".to_vec(),
        }
    }
}

/// A content key encrypted for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ephemeral_public: PublicKey,
    pub nonce: EncryptionNonce,
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    /// Serialize to the fixed wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 12 + self.ciphertext.len());
        out.extend_from_slice(self.ephemeral_public.as_bytes());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the wire layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WRAPPED_KEY_LEN {
            return Err(TokenError::Decryption(format!(
                "wrapped key must be {} bytes, got {}",
                WRAPPED_KEY_LEN,
                bytes.len()
            )));
        }
        let (eph, rest) = bytes.split_at(32);
        let (nonce, ciphertext) = rest.split_at(12);

        let mut eph_arr = [0u8; 32];
        eph_arr.copy_from_slice(eph);
        let mut nonce_arr = [0u8; 12];
        nonce_arr.copy_from_slice(nonce);

        Ok(Self {
            ephemeral_public: PublicKey::from_bytes(eph_arr),
            nonce: EncryptionNonce::from_bytes(nonce_arr),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Wrap `key` so only the holder of `recipient`'s secret can recover it.
pub fn wrap_key(key: &ContentKey, recipient: &PublicKey, context: WrapContext) -> Result<WrappedKey> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.diffie_hellman(recipient);
    let wrapping_key = shared.derive_wrapping_key(&context.to_bytes());

    let nonce = EncryptionNonce::generate();
    let ciphertext = wrapping_key.encrypt(key.as_bytes(), &nonce)?;

    Ok(WrappedKey {
        ephemeral_public,
        nonce,
        ciphertext,
    })
}

/// Recover a wrapped key. A mismatched secret or context is a `Decryption` error.
pub fn unwrap_key(
    wrapped: &WrappedKey,
    secret: &IdentitySecret,
    context: WrapContext,
) -> Result<ContentKey> {
    let shared = secret.diffie_hellman(&wrapped.ephemeral_public);
    let wrapping_key = shared.derive_wrapping_key(&context.to_bytes());
    let key_bytes = zeroize::Zeroizing::new(wrapping_key.decrypt(&wrapped.ciphertext, &wrapped.nonce)?);
    ContentKey::from_slice(&key_bytes)
}
