//! yvault-state: the relational metadata store behind the vault core
//!
//! Holds four tables (users, vault nodes, share grants, send objects) plus the
//! queue of backend objects awaiting deletion. Callers see the `MetaStore`
//! trait: point lookups by id, by ref id, and by parent, and single-row
//! atomic updates. Ancestor walks are done by the callers on top of these
//! lookups.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{Consumed, MetaStore, ShareInsert};
