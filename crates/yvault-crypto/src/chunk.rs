//! Per-chunk XChaCha20-Poly1305 sealing
//!
//! Sealed chunk format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = chunk_index (8 bytes, big-endian) || binding (32 bytes)
//! ```
//!
//! `binding` is the BLAKE3 hash of the item id, so a chunk cannot be replayed
//! at another position or under another item.

use crate::keys::SecretKey;
use crate::seal::{open, seal};
use crate::{NONCE_SIZE, TAG_SIZE};

/// AAD binding for an item id.
pub fn binding_for(item_id: &str) -> [u8; 32] {
    *blake3::hash(item_id.as_bytes()).as_bytes()
}

/// Seal one chunk. Returns `[nonce][ciphertext][tag]`.
pub fn encrypt_chunk(
    key: &SecretKey,
    chunk_index: u64,
    binding: &[u8; 32],
    plaintext: &[u8],
) -> anyhow::Result<Vec<u8>> {
    seal(key, plaintext, &build_aad(chunk_index, binding))
        .map_err(|e| anyhow::anyhow!("chunk {chunk_index}: {e}"))
}

/// Open a chunk produced by [`encrypt_chunk`].
pub fn decrypt_chunk(
    key: &SecretKey,
    chunk_index: u64,
    binding: &[u8; 32],
    sealed: &[u8],
) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "sealed chunk too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        );
    }
    open(key, sealed, &build_aad(chunk_index, binding))
        .ok_or_else(|| anyhow::anyhow!("chunk decryption failed: wrong key, index, or binding"))
}

fn build_aad(chunk_index: u64, binding: &[u8; 32]) -> [u8; 40] {
    let mut aad = [0u8; 40];
    aad[..8].copy_from_slice(&chunk_index.to_be_bytes());
    aad[8..].copy_from_slice(binding);
    aad
}
