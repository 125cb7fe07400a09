//! Key-chain resolution
//!
//! Ascends from the target to a user root, one row per level. Wherever a ref
//! id has several rows (the canonical one plus shadows), the caller's own
//! row is taken, since only keys wrapped along the caller's branch can be
//! unwrapped by the caller.

use yvault_core::{NodeId, Parent, UserId, VaultError, VaultNode, VaultResult};

use crate::vault::Vault;

/// Pick the row of one level: the caller's when present, else the canonical
/// row, else the only row.
fn pick_branch(candidates: Vec<VaultNode>, caller: &UserId) -> Option<VaultNode> {
    if candidates.len() <= 1 {
        return candidates.into_iter().next();
    }
    let mut canonical = None;
    for row in candidates {
        if &row.owner_id == caller {
            return Some(row);
        }
        if row.is_canonical() {
            canonical = Some(row);
        }
    }
    canonical
}

impl Vault {
    /// Wrapped keys from the target's parent up to (not including) the
    /// caller's root, returned root-to-leaf. The target's own key is not
    /// part of the chain.
    pub fn resolve_key_chain(&self, target: &NodeId, caller: &UserId) -> VaultResult<Vec<Vec<u8>>> {
        let ownership = self.resolve_ownership(caller, target)?;
        let rows = self.key_chain_rows(&ownership.canonical_id, caller)?;
        Ok(rows.into_iter().map(|row| row.protected_key).collect())
    }

    /// The rows whose keys make up the chain, root-to-leaf.
    pub fn key_chain_rows(&self, target_ref: &NodeId, caller: &UserId) -> VaultResult<Vec<VaultNode>> {
        let mut current = pick_branch(self.store.nodes_by_ref(target_ref)?, caller)
            .ok_or_else(|| VaultError::NotFound(format!("node {target_ref}")))?;
        let mut chain = Vec::new();

        for _ in 0..self.max_depth {
            let parent_id = match &current.parent {
                Parent::Root(_) => {
                    chain.reverse();
                    tracing::debug!(target = %target_ref, caller = %caller, depth = chain.len(), "key chain resolved");
                    return Ok(chain);
                }
                Parent::Folder(id) => id.clone(),
            };

            let parent = self.store.node(&parent_id)?.ok_or_else(|| {
                VaultError::NotFound(format!("ancestor {parent_id} of {target_ref}"))
            })?;
            let candidates = self.store.nodes_by_ref(parent.ref_id())?;
            current = pick_branch(candidates, caller).unwrap_or(parent);
            chain.push(current.clone());
        }

        Err(VaultError::Integrity(format!(
            "key chain of {target_ref} exceeds {} levels",
            self.max_depth
        )))
    }
}
