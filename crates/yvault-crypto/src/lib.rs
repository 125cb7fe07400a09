//! yvault-crypto: client-side E2E encryption for the vault
//!
//! The server never sees any of this; it stores and returns wrapped keys and
//! sealed chunks as opaque bytes. Clients use this crate to build and walk the
//! key hierarchy:
//!
//! ```text
//! User Key (256-bit, held by the client)
//!   └── Folder Key (wrapped by user key at root, or by the parent folder key)
//!         └── ... Folder Key
//!               └── Item Key (wrapped by its containing folder key)
//!                     └── Chunk AEAD: XChaCha20-Poly1305 (nonce=random_192bit, AAD=chunk_idx||binding)
//! ```

pub mod chain;
pub mod chunk;
pub mod keys;
mod seal;

pub use chain::unwrap_chain;
pub use chunk::{binding_for, decrypt_chunk, encrypt_chunk};
pub use keys::{generate_key, unwrap_key, wrap_key, SecretKey, WRAPPED_KEY_SIZE};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed chunk carries beyond its plaintext
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
