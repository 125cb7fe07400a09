//! Symmetric keys and key wrapping
//!
//! A wrapped key is a 32-byte key sealed under the key one level up:
//! `[24-byte nonce][32-byte ciphertext][16-byte tag]`, 72 bytes in all,
//! authenticated with a fixed label so it never opens as a chunk.

use rand::RngCore;
use zeroize::Zeroize;

use crate::seal::{open, seal};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const WRAP_LABEL: &[u8] = b"yvault/wrapped-key/v1";

/// Length of a wrapped key
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// A 256-bit user, folder, or item key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

pub fn generate_key() -> SecretKey {
    SecretKey::random()
}

/// Seal `key` under `parent`, the key of the folder (or user) above it.
pub fn wrap_key(parent: &SecretKey, key: &SecretKey) -> anyhow::Result<Vec<u8>> {
    seal(parent, key.as_bytes(), WRAP_LABEL).map_err(|e| anyhow::anyhow!("wrapping key: {e}"))
}

/// Recover a key sealed by [`wrap_key`].
pub fn unwrap_key(parent: &SecretKey, wrapped: &[u8]) -> anyhow::Result<SecretKey> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        anyhow::bail!("wrapped key is {} bytes, want {WRAPPED_KEY_SIZE}", wrapped.len());
    }
    let mut opened = open(parent, wrapped, WRAP_LABEL)
        .ok_or_else(|| anyhow::anyhow!("wrapped key does not open under this parent key"))?;

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&opened);
    opened.zeroize();
    Ok(SecretKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::decrypt_chunk;

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(generate_key().as_bytes(), generate_key().as_bytes());
    }

    #[test]
    fn test_wrapped_key_opens_under_parent_only() {
        let parent = generate_key();
        let item = generate_key();

        let wrapped = wrap_key(&parent, &item).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);
        assert_eq!(unwrap_key(&parent, &wrapped).unwrap().as_bytes(), item.as_bytes());
        assert!(unwrap_key(&generate_key(), &wrapped).is_err());
    }

    #[test]
    fn test_truncated_wrapped_key() {
        let key = generate_key();
        let wrapped = wrap_key(&key, &key).unwrap();
        let err = unwrap_key(&key, &wrapped[..40]).unwrap_err();
        assert!(err.to_string().contains("40 bytes"));
    }

    #[test]
    fn test_wrapped_key_is_not_a_chunk() {
        let parent = generate_key();
        let wrapped = wrap_key(&parent, &generate_key()).unwrap();
        assert!(decrypt_chunk(&parent, 0, &[0u8; 32], &wrapped).is_err());
    }

    #[test]
    fn test_debug_hides_bytes() {
        let key = SecretKey::from_bytes([0xAB; KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "SecretKey(..)");
    }
}
