//! yvault-storage: the bytes backend behind the transfer coordinator
//!
//! Ciphertext chunks land as numbered parts under `uploads/{upload_id}/`, are
//! concatenated into `objects/{object_id}` by the completing call, and are
//! then read back by byte range. The backend itself (local dir, S3, B2,
//! memory) is an OpenDAL operator chosen from config.

pub mod backend;
pub mod cache;
pub mod health;
pub mod operator;

pub use backend::{BackendStore, StoredObject};
pub use cache::HotCache;
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, S3Credentials};
