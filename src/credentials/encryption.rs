//! AES-256-GCM encryption for stored OAuth tokens.
//!
//! A blob is laid out as `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! Every call to [`encrypt`] draws a fresh random nonce, so encrypting the same
//! token twice never yields the same blob.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Vault failures.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("encryption key is not valid base64")]
    KeyEncoding,

    #[error("encryption key must be {KEY_SIZE} bytes (256 bits), got {0} bytes")]
    KeyLength(usize),

    #[error("ciphertext is malformed: {0}")]
    Malformed(String),

    /// Tag check failed: wrong key, or the blob was altered.
    #[error("ciphertext failed authentication (wrong key or tampered data)")]
    Authentication,

    #[error("encryption failed")]
    Encryption,
}

/// A validated 256-bit key.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Decodes a base64 key and checks that it is exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| VaultError::KeyEncoding)?;

        let key: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::KeyLength(bytes.len()))?;

        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Encrypts `plaintext` under `key` with a random nonce.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, VaultError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext)
        .map_err(|_| VaultError::Encryption)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Authenticates and decrypts a blob produced by [`encrypt`].
///
/// Never returns plaintext for a blob that fails the tag check.
pub fn decrypt(blob: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, VaultError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::Malformed(format!(
            "expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            blob.len()
        )));
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::Authentication)
}

/// Symmetric authenticated cipher used by the token store.
///
/// The store only sees this seam, so the key (or the whole scheme) can be
/// swapped without touching storage code.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError>;
}

/// [`Cipher`] backed by AES-256-GCM and one configured key.
#[derive(Clone, Debug)]
pub struct Vault {
    key: EncryptionKey,
}

impl Vault {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl Cipher for Vault {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        encrypt(plaintext, &self.key)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        decrypt(ciphertext, &self.key)
    }
}
