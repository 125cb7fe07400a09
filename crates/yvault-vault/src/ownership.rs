//! Ownership & access resolution

use serde::Serialize;
use yvault_core::{NodeId, Parent, UserId, VaultError, VaultResult};

use crate::vault::Vault;

/// What a caller may do with a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ownership {
    /// The caller owns the canonical row of the node or of an ancestor
    pub is_owner: bool,
    pub can_modify: bool,
    /// Ref id of the requested node
    pub canonical_id: NodeId,
    /// The caller's row that granted access; `None` when granted through
    /// the caller's own root
    pub via: Option<NodeId>,
}

impl Ownership {
    pub fn require_modify(&self) -> VaultResult<()> {
        if self.can_modify {
            Ok(())
        } else {
            Err(VaultError::ReadOnly(format!("node {}", self.canonical_id)))
        }
    }

    pub fn require_owner(&self) -> VaultResult<()> {
        if self.is_owner {
            Ok(())
        } else {
            Err(VaultError::NotOwner(format!("node {}", self.canonical_id)))
        }
    }
}

impl Vault {
    /// Resolve the caller's effective permissions on `node_id`.
    ///
    /// `node_id` may name a canonical row or a shadow row. The walk checks,
    /// level by level, whether the caller owns any row of the current ref
    /// id; the first such row decides. A shadow's `can_modify` therefore
    /// caps everything beneath the shared item. Reaching a user root grants
    /// full access only when the root is the caller's.
    pub fn resolve_ownership(&self, caller: &UserId, node_id: &NodeId) -> VaultResult<Ownership> {
        let start = self.require_node(node_id)?;
        let canonical_id = start.ref_id().clone();
        let mut ref_id = canonical_id.clone();

        for _ in 0..self.max_depth {
            if let Some(row) = self.store.node_for_owner(&ref_id, caller)? {
                return Ok(Ownership {
                    is_owner: row.is_canonical(),
                    can_modify: row.can_modify(),
                    canonical_id,
                    via: Some(row.id),
                });
            }

            let canonical = self.require_canonical(&ref_id)?;
            match canonical.parent {
                Parent::Root(owner) if &owner == caller => {
                    return Ok(Ownership {
                        is_owner: true,
                        can_modify: true,
                        canonical_id,
                        via: None,
                    });
                }
                Parent::Root(_) => {
                    return Err(VaultError::Access(format!("node {canonical_id}")));
                }
                Parent::Folder(parent_id) => {
                    let parent = self.store.node(&parent_id)?.ok_or_else(|| {
                        VaultError::NotFound(format!("ancestor {parent_id} of {canonical_id}"))
                    })?;
                    ref_id = parent.ref_id().clone();
                }
            }
        }

        Err(VaultError::Integrity(format!(
            "ancestry of {canonical_id} exceeds {} levels",
            self.max_depth
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use yvault_core::{NodeContent, Projection, User, VaultNode, UNLIMITED};
    use yvault_quota::QuotaMeter;
    use yvault_state::{MemoryStore, MetaStore};

    use super::*;

    fn vault() -> (Vault, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for user in ["alice", "bob", "carol"] {
            store.insert_user(User::new(user, UNLIMITED, UNLIMITED)).unwrap();
        }
        let quota = QuotaMeter::new(store.clone());
        (Vault::new(store.clone(), quota, 16), store)
    }

    fn node(id: &str, owner: &str, parent: Parent) -> VaultNode {
        VaultNode {
            id: NodeId::new(id),
            owner_id: UserId::new(owner),
            parent,
            name: id.into(),
            protected_key: id.as_bytes().to_vec(),
            link_tag: None,
            modified_at: 0,
            projection: Projection::Canonical,
            content: NodeContent::Folder,
        }
    }

    fn under(id: &str) -> Parent {
        Parent::Folder(NodeId::new(id))
    }

    fn shadow(id: &str, ref_id: &str, owner: &str, can_modify: bool) -> VaultNode {
        let mut n = node(id, owner, Parent::Root(UserId::new(owner)));
        n.projection = Projection::Shadow {
            ref_id: NodeId::new(ref_id),
            can_modify,
            shared_by: "alice".into(),
        };
        n
    }

    #[test]
    fn test_owner_through_root() {
        let (vault, store) = vault();
        store.insert_node(node("f1", "alice", Parent::Root("alice".into()))).unwrap();
        store.insert_node(node("f2", "alice", under("f1"))).unwrap();

        let own = vault.resolve_ownership(&"alice".into(), &"f2".into()).unwrap();
        assert!(own.is_owner && own.can_modify);
        assert_eq!(own.canonical_id.as_str(), "f2");
    }

    #[test]
    fn test_stranger_is_denied() {
        let (vault, store) = vault();
        store.insert_node(node("f1", "alice", Parent::Root("alice".into()))).unwrap();
        store.insert_node(node("f2", "alice", under("f1"))).unwrap();

        let err = vault.resolve_ownership(&"bob".into(), &"f2".into()).unwrap_err();
        assert!(matches!(err, VaultError::Access(_)));
    }

    #[test]
    fn test_missing_node_and_ancestor() {
        let (vault, store) = vault();
        assert!(vault
            .resolve_ownership(&"alice".into(), &"nope".into())
            .unwrap_err()
            .is_not_found());

        store.insert_node(node("orphan", "alice", under("gone"))).unwrap();
        assert!(vault
            .resolve_ownership(&"alice".into(), &"orphan".into())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_read_only_share_caps_descendants() {
        let (vault, store) = vault();
        store.insert_node(node("f", "alice", Parent::Root("alice".into()))).unwrap();
        store.insert_node(node("child", "alice", under("f"))).unwrap();
        store.insert_node(node("grandchild", "alice", under("child"))).unwrap();
        store.insert_node(shadow("f-bob", "f", "bob", false)).unwrap();

        for id in ["f", "f-bob", "child", "grandchild"] {
            let own = vault.resolve_ownership(&"bob".into(), &id.into()).unwrap();
            assert!(!own.is_owner, "{id}");
            assert!(!own.can_modify, "{id}");
            assert_eq!(own.via.as_ref().map(|v| v.as_str()), Some("f-bob"));
        }
    }

    #[test]
    fn test_nearest_shadow_wins() {
        let (vault, store) = vault();
        store.insert_node(node("outer", "alice", Parent::Root("alice".into()))).unwrap();
        store.insert_node(node("inner", "alice", under("outer"))).unwrap();
        store.insert_node(node("leaf", "alice", under("inner"))).unwrap();
        store.insert_node(shadow("outer-bob", "outer", "bob", false)).unwrap();
        store.insert_node(shadow("inner-bob", "inner", "bob", true)).unwrap();

        let own = vault.resolve_ownership(&"bob".into(), &"leaf".into()).unwrap();
        assert!(own.can_modify);
        let own = vault.resolve_ownership(&"bob".into(), &"outer".into()).unwrap();
        assert!(!own.can_modify);
    }

    #[test]
    fn test_shadow_id_resolves_to_canonical() {
        let (vault, store) = vault();
        store.insert_node(node("f", "alice", Parent::Root("alice".into()))).unwrap();
        store.insert_node(shadow("f-bob", "f", "bob", true)).unwrap();

        let own = vault.resolve_ownership(&"alice".into(), &"f-bob".into()).unwrap();
        assert!(own.is_owner);
        assert_eq!(own.canonical_id.as_str(), "f");
    }

    #[test]
    fn test_cycle_is_integrity_error() {
        let (vault, store) = vault();
        store.insert_node(node("a", "alice", under("b"))).unwrap();
        store.insert_node(node("b", "alice", under("a"))).unwrap();

        let err = vault.resolve_ownership(&"bob".into(), &"a".into()).unwrap_err();
        assert!(matches!(err, VaultError::Integrity(_)));
    }
}
