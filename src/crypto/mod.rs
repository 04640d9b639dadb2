//! AES-256-GCM cipher for secrets at rest.
//!
//! Client secrets, access tokens and refresh tokens are encrypted before they
//! touch the database. Each value gets a fresh random nonce; the nonce is
//! prepended to the ciphertext and the whole blob is base64-encoded so an
//! encrypted value fits a single TEXT column.
//!
//! The master key comes from the environment: either a base64-encoded 32-byte
//! key, or an arbitrary passphrase from which a key is derived with
//! PBKDF2-HMAC-SHA256 (static salt, so derivation is deterministic across
//! restarts).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// PBKDF2 iteration count for passphrase-derived keys
const KDF_ITERATIONS: u32 = 100_000;

/// Static salt for deterministic passphrase derivation
const KDF_SALT: &[u8] = b"mailbridge_oauth_salt";

/// Symmetric cipher holding the process-wide master key.
///
/// Derived once at startup and shared via `Arc`.
pub struct SecretCipher {
    key: [u8; KEY_SIZE],
}

impl SecretCipher {
    /// Build a cipher from the raw key material supplied in the environment.
    ///
    /// If `key_material` base64-decodes to exactly 32 bytes it is used
    /// directly; anything else is treated as a passphrase and run through
    /// PBKDF2.
    pub fn from_key_material(key_material: &str) -> Result<Self> {
        if key_material.is_empty() {
            return Err(Error::Cipher("master key is empty".to_string()));
        }

        if let Ok(bytes) = BASE64.decode(key_material) {
            if bytes.len() == KEY_SIZE {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&bytes);
                return Ok(Self { key });
            }
        }

        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(key_material.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        Ok(Self { key })
    }

    /// Encrypt a plaintext value for storage.
    ///
    /// Empty input maps to empty output so optional fields round-trip
    /// without special casing.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Cipher(format!("failed to create cipher: {}", e)))?;

        // Random nonce, never reused
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Cipher(format!("encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&blob))
    }

    /// Decrypt a stored value.
    ///
    /// Fails if the blob is malformed or authentication fails (wrong key or
    /// tampered data). Empty input maps to empty output.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = BASE64
            .decode(encoded)
            .map_err(|e| Error::Cipher(format!("failed to decode ciphertext: {}", e)))?;

        if blob.len() <= NONCE_SIZE {
            return Err(Error::Cipher("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Cipher(format!("failed to create cipher: {}", e)))?;

        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Cipher("decryption failed (wrong key or corrupted data)".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Cipher("decrypted data is not valid UTF-8".to_string()))
    }
}
