//! Encryption for cookie values that must not be client-readable.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{AuthError, AuthResult};

/// AES-256-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Domain separator for key derivation.
const HKDF_SALT: &[u8] = b"fedauth-cookie-v1";

/// AES-256-GCM encryption for cookie values (single-sign-on target).
///
/// Output is base64url(nonce || ciphertext), safe to place in a cookie.
#[derive(Clone)]
pub struct EncryptionService {
    key: [u8; 32],
}

impl EncryptionService {
    /// Create from a base64-encoded 32-byte master key.
    pub fn from_base64(master_key_base64: &str) -> AuthResult<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(master_key_base64)
            .map_err(|e| AuthError::EncryptionError {
                operation: format!("invalid base64 key: {e}"),
            })?;
        if key_bytes.len() != 32 {
            return Err(AuthError::EncryptionError {
                operation: format!("master key must be 32 bytes, got {}", key_bytes.len()),
            });
        }

        // Derive the working key so the raw master key never touches the cipher.
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), &key_bytes);
        let mut key = [0u8; 32];
        hkdf.expand(b"cookie-encryption", &mut key)
            .map_err(|_| AuthError::EncryptionError {
                operation: "key derivation failed".to_string(),
            })?;

        Ok(Self { key })
    }

    /// Encrypt a value for storage in a cookie.
    pub fn encrypt(&self, plaintext: &str) -> AuthResult<String> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| AuthError::EncryptionError {
                operation: e.to_string(),
            })?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::EncryptionError {
                operation: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt a cookie value produced by [`EncryptionService::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> AuthResult<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| AuthError::EncryptionError {
                operation: format!("invalid base64 ciphertext: {e}"),
            })?;
        if bytes.len() <= NONCE_SIZE {
            return Err(AuthError::EncryptionError {
                operation: "ciphertext too short".to_string(),
            });
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| AuthError::EncryptionError {
                operation: e.to_string(),
            })?;
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext =
            cipher
                .decrypt(nonce, ciphertext)
                .map_err(|_| AuthError::EncryptionError {
                    operation: "decryption failed".to_string(),
                })?;
        String::from_utf8(plaintext).map_err(|_| AuthError::EncryptionError {
            operation: "plaintext is not valid UTF-8".to_string(),
        })
    }
}
