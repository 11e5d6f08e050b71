//! PrivacyAgent: field-level PII protection.
//!
//! Every contact field leaves this stage as an AES-256-GCM blob
//! (`nonce || ciphertext || tag`, base64), a salted SHA-256 hash over the
//! normalized representation (duplicate detection without plaintext), and
//! a display mask. Plaintext never continues past this stage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crosscheck::normalize::{normalize_email, normalize_phone};

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("encryption key must be base64 of exactly 32 bytes")]
    InvalidKey,

    #[error("crypto operation failed")]
    Crypto,

    #[error("ciphertext blob is malformed")]
    MalformedBlob,
}

/// Encrypted + hashed + masked rendering of one PII value
#[derive(Debug, Clone, PartialEq)]
pub struct SealedPii {
    pub encrypted: String,
    pub hash: Option<String>,
    pub masked: String,
}

pub struct PrivacyAgent {
    cipher: Aes256Gcm,
    salt: String,
}

impl PrivacyAgent {
    pub fn new(key_base64: &str, salt: &str) -> Result<Self, PrivacyError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|_| PrivacyError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(PrivacyError::InvalidKey);
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self {
            cipher,
            salt: salt.to_string(),
        })
    }

    /// base64( nonce || ciphertext || tag ); fresh random nonce per message
    pub fn encrypt(&self, plaintext: &str) -> Result<String, PrivacyError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PrivacyError::Crypto)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, blob_base64: &str) -> Result<String, PrivacyError> {
        let blob = BASE64
            .decode(blob_base64)
            .map_err(|_| PrivacyError::MalformedBlob)?;
        if blob.len() <= NONCE_LEN {
            return Err(PrivacyError::MalformedBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| PrivacyError::Crypto)?;
        String::from_utf8(plaintext).map_err(|_| PrivacyError::Crypto)
    }

    /// hex( SHA-256( salt || normalized ) )
    pub fn hash(&self, normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn seal_phone(&self, raw: &str) -> Result<SealedPii, PrivacyError> {
        Ok(SealedPii {
            encrypted: self.encrypt(raw)?,
            hash: Some(self.hash(&normalize_phone(raw))),
            masked: mask_phone(raw),
        })
    }

    pub fn seal_email(&self, raw: &str) -> Result<SealedPii, PrivacyError> {
        Ok(SealedPii {
            encrypted: self.encrypt(raw)?,
            hash: Some(self.hash(&normalize_email(raw))),
            masked: mask_email(raw),
        })
    }

    /// Addresses are encrypted and masked but not hashed — they are not
    /// part of duplicate detection
    pub fn seal_address(&self, raw: &str) -> Result<SealedPii, PrivacyError> {
        Ok(SealedPii {
            encrypted: self.encrypt(raw)?,
            hash: None,
            masked: mask_address(raw),
        })
    }
}

/// `010-1234-5678` → `010-****-5678`; anything with fewer than seven
/// digits masks entirely
pub fn mask_phone(raw: &str) -> String {
    let digits = normalize_phone(raw);
    if digits.len() < 7 {
        return "****".to_string();
    }
    let prefix = &digits[..3];
    let suffix = &digits[digits.len() - 4..];
    format!("{}-****-{}", prefix, suffix)
}

/// `jiwoo@example.com` → `j***@example.com`
pub fn mask_email(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Reduced to the first locality token
pub fn mask_address(raw: &str) -> String {
    raw.split_whitespace()
        .next()
        .unwrap_or("*")
        .to_string()
}
