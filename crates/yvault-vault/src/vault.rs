use std::sync::Arc;

use yvault_core::{NodeId, VaultError, VaultNode, VaultResult};
use yvault_quota::QuotaMeter;
use yvault_state::MetaStore;

/// Attempts at minting a fresh node id before giving up
pub(crate) const ID_MINT_ATTEMPTS: usize = 8;

/// Vault service: one per process, shared by reference.
#[derive(Clone)]
pub struct Vault {
    pub(crate) store: Arc<dyn MetaStore>,
    pub(crate) quota: QuotaMeter,
    pub(crate) max_depth: usize,
}

impl Vault {
    pub fn new(store: Arc<dyn MetaStore>, quota: QuotaMeter, max_depth: usize) -> Self {
        Self {
            store,
            quota,
            max_depth: max_depth.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub fn quota(&self) -> &QuotaMeter {
        &self.quota
    }

    pub(crate) fn require_node(&self, id: &NodeId) -> VaultResult<VaultNode> {
        self.store
            .node(id)?
            .ok_or_else(|| VaultError::NotFound(format!("node {id}")))
    }

    pub fn require_canonical(&self, ref_id: &NodeId) -> VaultResult<VaultNode> {
        self.store
            .canonical(ref_id)?
            .ok_or_else(|| VaultError::NotFound(format!("canonical row of {ref_id}")))
    }

    /// Insert `build(id)` under a freshly minted id, retrying on collision.
    pub(crate) fn insert_minted(
        &self,
        mut build: impl FnMut(NodeId) -> VaultNode,
    ) -> VaultResult<VaultNode> {
        for _ in 0..ID_MINT_ATTEMPTS {
            let node = build(NodeId::random());
            if self.store.insert_node(node.clone())? {
                return Ok(node);
            }
            tracing::debug!(node = %node.id, "node id collision, minting another");
        }
        Err(VaultError::Integrity(
            "could not mint an unused node id".into(),
        ))
    }
}
