//! `[nonce][ciphertext][tag]` framing shared by chunks and wrapped keys

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::keys::SecretKey;
use crate::{NONCE_SIZE, TAG_SIZE};

pub(crate) fn seal(key: &SecretKey, msg: &[u8], aad: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let body = XChaCha20Poly1305::new(key.as_bytes().into())
        .encrypt(XNonce::from_slice(&nonce), Payload { msg, aad })
        .map_err(|e| anyhow::anyhow!("seal: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + body.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    Ok(out)
}

/// `None` when the frame is too short or fails authentication.
pub(crate) fn open(key: &SecretKey, sealed: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return None;
    }
    let (nonce, msg) = sealed.split_at(NONCE_SIZE);
    XChaCha20Poly1305::new(key.as_bytes().into())
        .decrypt(XNonce::from_slice(nonce), Payload { msg, aad })
        .ok()
}
