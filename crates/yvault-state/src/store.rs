use yvault_core::{
    GrantId, Meter, NodeId, Parent, SendId, SendObject, ShareGrant, Usage, User, UserId,
    VaultNode, VaultResult,
};

/// Outcome of inserting a shadow row together with its grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareInsert {
    Inserted,
    /// The minted shadow id is already in use; mint another and retry
    IdTaken,
}

/// Outcome of counting one completed send download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// No download limit on this object
    Unlimited,
    Remaining(i32),
    /// The counter reached zero and the row was removed
    Exhausted(SendObject),
}

/// Trait for metadata store backends.
///
/// Every method is a single-row (or single-lock) operation; implementations
/// must make `apply_charge`, `insert_share`, and `consume_download` atomic
/// with respect to concurrent callers.
pub trait MetaStore: Send + Sync {
    // ── users ────────────────────────────────────────────────────────────

    fn user(&self, id: &UserId) -> VaultResult<Option<User>>;
    fn insert_user(&self, user: User) -> VaultResult<()>;
    /// `used = max(0, used + amount)` on one meter, returning the new pair.
    fn apply_charge(&self, id: &UserId, meter: Meter, amount: i64) -> VaultResult<Usage>;

    // ── vault nodes ──────────────────────────────────────────────────────

    fn node(&self, id: &NodeId) -> VaultResult<Option<VaultNode>>;
    /// The canonical row and every shadow of `ref_id`.
    fn nodes_by_ref(&self, ref_id: &NodeId) -> VaultResult<Vec<VaultNode>>;
    fn children(&self, parent: &Parent) -> VaultResult<Vec<VaultNode>>;
    /// Returns `false` without writing when `node.id` is already taken.
    fn insert_node(&self, node: VaultNode) -> VaultResult<bool>;
    /// Apply `f` to every row of `ref_id`, returning how many rows changed.
    fn update_ref(&self, ref_id: &NodeId, f: &mut dyn FnMut(&mut VaultNode)) -> VaultResult<usize>;
    /// Apply `f` to one row; `NotFound` if it does not exist.
    fn update_node(&self, id: &NodeId, f: &mut dyn FnMut(&mut VaultNode)) -> VaultResult<()>;
    fn remove_node(&self, id: &NodeId) -> VaultResult<Option<VaultNode>>;

    /// The row of `ref_id` owned by `owner`, if any.
    fn node_for_owner(&self, ref_id: &NodeId, owner: &UserId) -> VaultResult<Option<VaultNode>> {
        Ok(self
            .nodes_by_ref(ref_id)?
            .into_iter()
            .find(|n| &n.owner_id == owner))
    }

    /// The canonical row of `ref_id`.
    fn canonical(&self, ref_id: &NodeId) -> VaultResult<Option<VaultNode>> {
        Ok(self.node(ref_id)?.filter(|n| n.is_canonical()))
    }

    // ── share grants ─────────────────────────────────────────────────────

    /// Insert a shadow row and its grant under one lock.
    ///
    /// Fails with `AlreadyShared` when a grant for the same
    /// `(owner, item_ref, recipient)` exists.
    fn insert_share(&self, shadow: VaultNode, grant: ShareGrant) -> VaultResult<ShareInsert>;
    fn grant(
        &self,
        owner: &UserId,
        item_ref: &NodeId,
        recipient: &UserId,
    ) -> VaultResult<Option<ShareGrant>>;
    fn grants_for_item(&self, item_ref: &NodeId) -> VaultResult<Vec<ShareGrant>>;
    fn grants_by_owner(&self, owner: &UserId) -> VaultResult<Vec<ShareGrant>>;
    fn set_grant_permission(&self, id: &GrantId, can_modify: bool) -> VaultResult<()>;
    fn remove_grant(&self, id: &GrantId) -> VaultResult<Option<ShareGrant>>;

    // ── send objects ─────────────────────────────────────────────────────

    fn send(&self, id: &SendId) -> VaultResult<Option<SendObject>>;
    /// Returns `false` without writing when `send.id` is already taken.
    fn insert_send(&self, send: SendObject) -> VaultResult<bool>;
    fn update_send(&self, id: &SendId, f: &mut dyn FnMut(&mut SendObject)) -> VaultResult<()>;
    fn remove_send(&self, id: &SendId) -> VaultResult<Option<SendObject>>;
    /// Count one full download, removing the row when the budget runs out.
    fn consume_download(&self, id: &SendId) -> VaultResult<Consumed>;
    fn expired_sends(&self, now: u64) -> VaultResult<Vec<SendObject>>;

    // ── deletion queue ───────────────────────────────────────────────────

    fn queue_deletion(&self, object_id: String) -> VaultResult<()>;
    /// Drain the queue. Callers requeue whatever they fail to delete.
    fn take_deletions(&self) -> VaultResult<Vec<String>>;

    /// Persist pending changes.
    fn flush(&self) -> anyhow::Result<()>;
}
