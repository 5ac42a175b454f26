//! Encrypted content envelope.
//!
//! Thread content published behind a control token's hint URL, and message
//! bodies relayed through the helper cache, are sealed in this envelope.

use serde::{Deserialize, Serialize};

use crate::crypto::{ContentKey, EncryptionNonce};
use crate::error::{Result, TokenError};

/// Format identifier for encrypted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// Sealed content plus what is needed to open it (given the key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContent {
    pub format: EncryptionFormat,
    pub nonce: EncryptionNonce,
    /// Ciphertext including the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedContent {
    /// Encrypt plaintext with the given key.
    pub fn seal(plaintext: &[u8], key: &ContentKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;
        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with the given key.
    pub fn open(&self, key: &ContentKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| TokenError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| TokenError::Serialization(e.to_string()))
    }
}
