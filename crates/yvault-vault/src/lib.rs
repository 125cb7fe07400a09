//! yvault-vault: the access-control and key-hierarchy core
//!
//! Every node lives in exactly one owner's forest. Sharing never copies
//! content: it adds a shadow row that points at the canonical row by ref id
//! and carries the item key wrapped for the recipient. Access is resolved by
//! walking up from a node until a row owned by the caller (or the caller's
//! root) is found; key chains are resolved by the same walk, choosing the
//! caller's branch wherever shadows make it fork.

pub mod files;
pub mod folders;
pub mod keychain;
pub mod ownership;
pub mod sharing;
pub mod vault;

pub use files::FileView;
pub use folders::{DeleteSummary, FolderInfo, FolderListing, ListedItem};
pub use ownership::Ownership;
pub use sharing::ShareRequest;
pub use vault::Vault;
