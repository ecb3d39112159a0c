//! Symmetric encryption of stored credentials.
//!
//! Tokens are `base64(nonce || ciphertext)` sealed with XChaCha20-Poly1305
//! under a key derived from the configured master key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("no master key configured")]
    MissingKey,
    #[error("secret is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("secret token is too short")]
    Truncated,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("decrypted secret is not UTF-8")]
    NotUtf8,
}

/// Turns stored credential tokens back into plaintext and vice versa.
pub trait SecretStore: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;
    fn decrypt(&self, token: &str) -> Result<String, SecretError>;
}

pub struct CipherSecretStore {
    cipher: Option<XChaCha20Poly1305>,
}

impl CipherSecretStore {
    /// An empty master key yields a store that refuses every operation.
    pub fn new(master_key: &str) -> Self {
        if master_key.is_empty() {
            tracing::warn!("No master key configured, stored SSH credentials cannot be used");
            return Self { cipher: None };
        }

        let key = Sha256::digest(master_key.as_bytes());
        Self { cipher: Some(XChaCha20Poly1305::new(&key)) }
    }

    fn cipher(&self) -> Result<&XChaCha20Poly1305, SecretError> {
        self.cipher.as_ref().ok_or(SecretError::MissingKey)
    }
}

impl SecretStore for CipherSecretStore {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext =
            cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|_| SecretError::Encrypt)?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(token))
    }

    fn decrypt(&self, token: &str) -> Result<String, SecretError> {
        let cipher = self.cipher()?;
        let raw = STANDARD.decode(token.trim())?;
        if raw.len() <= NONCE_LEN {
            return Err(SecretError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| SecretError::NotUtf8)
    }
}
