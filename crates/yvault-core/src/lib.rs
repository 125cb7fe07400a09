//! yvault-core: types shared by every yvault crate
//!
//! The server never sees plaintext. Everything here describes ciphertext
//! positions, opaque wrapped keys, and who may touch which row.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{VaultError, VaultResult};
pub use ids::{GrantId, NodeId, SendId, UserId};
pub use types::{
    unix_now, FileContent, Meter, NodeContent, Parent, Projection, SendObject, ShareGrant,
    UploadState, Usage, User, VaultNode, UNLIMITED,
};
