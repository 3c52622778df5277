//! Time-limited access tokens for stored objects.
//!
//! A token is the AES-256-GCM encryption of `bucket/key|expires_at`, with
//! the 12-byte nonce prepended and the whole hex-encoded. Only holders of
//! the key can mint a token, and any change to the token fails decryption.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::StorageError;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// What a valid token grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub bucket: String,
    pub key: String,
    pub expires_at: i64,
}

pub struct UrlSigner {
    cipher: Aes256Gcm,
}

impl UrlSigner {
    /// `key_hex` must be 64 hex characters (32 bytes).
    pub fn from_hex_key(key_hex: &SecretString) -> Result<Self, StorageError> {
        let key_bytes = hex_decode(key_hex.expose_secret().trim())
            .map_err(|e| StorageError::Signing(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(StorageError::Signing(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| StorageError::Signing(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    pub fn sign(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let plaintext = format!("{}/{}|{}", bucket, key, expires_at.timestamp());
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StorageError::Signing(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(hex_encode(&combined))
    }

    /// Decodes a token and checks it has not expired at `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Grant, StorageError> {
        let combined =
            hex_decode(token).map_err(|e| StorageError::Signing(format!("Invalid token: {}", e)))?;
        if combined.len() < NONCE_SIZE {
            return Err(StorageError::Signing("Token too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StorageError::Signing("Token signature mismatch".to_string()))?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| StorageError::Signing(format!("Invalid UTF-8: {}", e)))?;

        let (object, expires) = plaintext
            .rsplit_once('|')
            .ok_or_else(|| StorageError::Signing("Malformed token".to_string()))?;
        let (bucket, key) = object
            .split_once('/')
            .ok_or_else(|| StorageError::Signing("Malformed token".to_string()))?;
        let expires_at: i64 = expires
            .parse()
            .map_err(|_| StorageError::Signing("Malformed token expiry".to_string()))?;

        if now.timestamp() > expires_at {
            return Err(StorageError::Signing("Token expired".to_string()));
        }

        Ok(Grant {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires_at,
        })
    }
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err("Hex string must be ASCII with even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

fn rand_bytes<const N: usize>() -> Result<[u8; N], StorageError> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)
        .map_err(|e| StorageError::Signing(format!("Failed to generate random bytes: {}", e)))?;
    Ok(bytes)
}
