//! End-to-end payload encryption. Only value payloads are encrypted; keys
//! and message headers stay in the clear so the relay can route and order
//! operations it cannot read.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Random nonce prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;
/// Poly1305 authentication tag appended by the AEAD.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Input shorter than a nonce plus a tag cannot be a valid ciphertext
    #[error("ciphertext of {len} bytes is shorter than nonce + tag")]
    TooShort { len: usize },

    /// Authentication failed: tampered data or a mismatched key
    #[error("payload failed authenticated decryption")]
    Unauthentic,

    /// The AEAD refused to encrypt (only possible on pathological input sizes)
    #[error("payload encryption failed")]
    EncryptFailed,
}

pub struct EncryptionAdapter {
    cipher: ChaCha20Poly1305,
    key_id: String,
}

impl EncryptionAdapter {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        // Stable identifier derived from the key, safe to exchange in the
        // clear: peers compare key ids to detect configuration mismatch
        // before shipping undecryptable ops at each other.
        let digest = Sha256::digest(key);
        let key_id = hex::encode(&digest[..8]);
        Self { cipher, key_id }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `nonce ∥ ciphertext ∥ tag` with a fresh random nonce per call, so
    /// encrypting the same plaintext twice yields different bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort { len: data.len() });
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Unauthentic)
    }
}
