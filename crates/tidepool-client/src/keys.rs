//! Key transformation applied before routing and storage.
//!
//! The cache protocol restricts keys to 250 bytes with no whitespace or
//! control characters. Callers with well-formed keys use the identity
//! transform; callers with arbitrary binary keys substitute the hashing
//! transform.

use sha2::{Digest, Sha256};

use crate::error::ClientError;

/// Longest key the cache protocol accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Rewrites caller keys into protocol-legal keys.
pub trait KeyTransformer: Send + Sync {
    fn transform(&self, key: &[u8]) -> Result<Vec<u8>, ClientError>;
}

/// Passes keys through untouched, enforcing the protocol rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityKeys;

impl KeyTransformer for IdentityKeys {
    fn transform(&self, key: &[u8]) -> Result<Vec<u8>, ClientError> {
        if key.is_empty() {
            return Err(ClientError::InvalidKey("key is empty".into()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(ClientError::InvalidKey(format!(
                "key is {} bytes, limit is {MAX_KEY_LEN}",
                key.len()
            )));
        }
        if let Some(bad) = key.iter().find(|&&b| b <= b' ' || b == 0x7F) {
            return Err(ClientError::InvalidKey(format!(
                "key contains illegal byte {bad:#04x}"
            )));
        }
        Ok(key.to_vec())
    }
}

/// Replaces every key with the lowercase hex SHA-256 of its bytes, making
/// any byte sequence a legal key at the cost of readability.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedKeys;

impl KeyTransformer for HashedKeys {
    fn transform(&self, key: &[u8]) -> Result<Vec<u8>, ClientError> {
        let digest = Sha256::digest(key);
        let mut hex = Vec::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.extend_from_slice(format!("{byte:02x}").as_bytes());
        }
        Ok(hex)
    }
}
