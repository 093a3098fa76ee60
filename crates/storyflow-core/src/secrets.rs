//! # Secrets
//!
//! Authenticated encryption for generator API keys.
//!
//! - ChaCha20-Poly1305 AEAD with a fresh 12-byte nonce per encryption
//! - 256-bit key derived from the configured secret with SHA-256
//! - Stored format: `enc2:base64(nonce || ciphertext)`

use crate::StoryflowError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix of every encrypted value.
const ENCRYPTED_PREFIX: &str = "enc2:";

/// Nonce length in bytes.
const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts settings secrets.
#[derive(Clone)]
pub struct SecretBox {
    cipher: ChaCha20Poly1305,
}

impl fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Create a box keyed by SHA-256 of `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            cipher: ChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Produce a fresh random secret suitable for a key file.
    #[must_use]
    pub fn generate_secret() -> String {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        BASE64.encode(key)
    }

    /// Encrypt `plaintext` into the `enc2:` format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, StoryflowError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| StoryflowError::ConfigurationError("encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(&combined)))
    }

    /// Decrypt a value produced by [`SecretBox::encrypt`].
    ///
    /// A wrong secret or a tampered value is a `ConfigurationError`: the
    /// stored key cannot be used with the running configuration.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, StoryflowError> {
        let encoded = encrypted.strip_prefix(ENCRYPTED_PREFIX).ok_or_else(|| {
            StoryflowError::ConfigurationError("stored API key has an unknown format".to_string())
        })?;

        let combined = BASE64.decode(encoded).map_err(|_| {
            StoryflowError::ConfigurationError("stored API key is not valid base64".to_string())
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(StoryflowError::ConfigurationError(
                "stored API key is truncated".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                StoryflowError::ConfigurationError(
                    "stored API key cannot be decrypted with the configured secret".to_string(),
                )
            })?;

        String::from_utf8(plaintext).map_err(|_| {
            StoryflowError::ConfigurationError("stored API key is not valid UTF-8".to_string())
        })
    }

    /// Whether `text` carries the encrypted-value prefix.
    #[must_use]
    pub fn is_encrypted(text: &str) -> bool {
        text.starts_with(ENCRYPTED_PREFIX)
    }
}
