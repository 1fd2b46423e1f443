//! Record encryption at rest.
//!
//! A [`Cipher`] sits between the codec and the engine. It is chosen once
//! from the configured key material by [`cipher_for`]:
//!
//! - no key (or an empty one): [`PassthroughCipher`], bytes are stored as
//!   encoded, which keeps older plaintext stores readable
//! - any other key: [`AesGcmCipher`], AES-256-GCM with a key derived through
//!   HKDF-SHA256
//!
//! Sealed records are bound to their bucket and key through associated data,
//! so a ciphertext copied under another key fails to open.

mod aes;

pub use aes::{AesGcmCipher, DerivedKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while sealing or opening a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Encryption failed.
    #[error("encryption failed")]
    Seal,

    /// The cipher key could not be derived.
    #[error("key derivation failed")]
    KeyDerivation,

    /// Decryption or authentication failed.
    #[error("decryption failed: {0}")]
    Open(&'static str),
}

/// Seals and opens stored payloads.
pub trait Cipher: Send + Sync + fmt::Debug {
    /// Short algorithm name recorded in the store's cipher marker.
    fn name(&self) -> &'static str;

    /// Whether payloads are actually transformed.
    fn is_encrypting(&self) -> bool;

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Seal`] if the underlying primitive fails.
    fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypts a payload produced by [`seal`](Self::seal) with the same `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Open`] on a wrong key, tampered bytes, a
    /// mismatched `aad`, or a truncated payload.
    fn open(&self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Stores payloads unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl Cipher for PassthroughCipher {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_encrypting(&self) -> bool {
        false
    }

    fn seal(&self, _aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, _aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(sealed.to_vec())
    }
}

/// Picks the cipher for the given key material.
///
/// # Errors
///
/// Returns [`CipherError::KeyDerivation`] if a key cannot be derived.
pub fn cipher_for(key_material: Option<&[u8]>) -> Result<Arc<dyn Cipher>, CipherError> {
    let cipher: Arc<dyn Cipher> = match key_material {
        Some(material) if !material.is_empty() => {
            Arc::new(AesGcmCipher::new(&DerivedKey::derive(material)?))
        }
        _ => Arc::new(PassthroughCipher),
    };
    Ok(cipher)
}

/// Associated data binding a record payload to its location.
pub(crate) fn record_aad(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(bucket.len() + 1 + key.len());
    aad.extend_from_slice(bucket.as_bytes());
    aad.push(0);
    aad.extend_from_slice(key);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_is_identity() {
        let cipher = cipher_for(None).unwrap();
        assert!(!cipher.is_encrypting());
        assert_eq!(cipher.name(), "none");
        assert_eq!(cipher.seal(b"aad", b"payload").unwrap(), b"payload");
        assert_eq!(cipher.open(b"other", b"payload").unwrap(), b"payload");
    }

    #[test]
    fn empty_key_selects_passthrough() {
        assert!(!cipher_for(Some(b"")).unwrap().is_encrypting());
    }

    #[test]
    fn key_selects_aes() {
        let cipher = cipher_for(Some(b"hunter2")).unwrap();
        assert!(cipher.is_encrypting());
        assert_eq!(cipher.name(), "aes-256-gcm");

        let sealed = cipher.seal(b"a", b"payload").unwrap();
        assert_ne!(sealed, b"payload");
        assert_eq!(cipher.open(b"a", &sealed).unwrap(), b"payload");
    }

    #[test]
    fn aad_separates_bucket_from_key() {
        assert_ne!(record_aad("ab", b"c"), record_aad("a", b"bc"));
    }
}
