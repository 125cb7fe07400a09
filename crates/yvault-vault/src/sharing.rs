//! Sharing engine
//!
//! A share is a shadow row in the recipient's forest plus a grant row on the
//! owner's side. The shadow carries the item key wrapped for the recipient;
//! the grant holds no key material and only exists for duplicate detection,
//! revocation, and permission changes.

use yvault_core::{
    unix_now, GrantId, NodeId, Parent, Projection, ShareGrant, UserId, VaultError, VaultNode,
    VaultResult,
};
use yvault_state::ShareInsert;

use crate::vault::{Vault, ID_MINT_ATTEMPTS};

/// Arguments of [`Vault::share`]
#[derive(Debug, Clone)]
pub struct ShareRequest {
    /// Canonical (or any) id of the item being shared
    pub item: NodeId,
    pub recipient: UserId,
    /// Item key wrapped under the recipient's key at the destination
    pub wrapped_key: Vec<u8>,
    pub can_modify: bool,
    /// Recipient folder to place the shadow in; their root when `None`
    pub destination: Option<NodeId>,
}

impl Vault {
    /// Share an item the caller truly owns with another user.
    ///
    /// Checks run in this order: root target, recipient, ownership, duplicate.
    pub fn share(&self, owner: &UserId, req: ShareRequest) -> VaultResult<GrantId> {
        if req.item.as_str() == owner.as_str() {
            return Err(VaultError::InvalidTarget("root folders cannot be shared".into()));
        }
        if req.recipient.is_empty() {
            return Err(VaultError::InvalidRecipient("recipient is empty".into()));
        }
        if &req.recipient == owner {
            return Err(VaultError::InvalidRecipient("cannot share with yourself".into()));
        }
        let recipient_user = self.store.user(&req.recipient)?.ok_or_else(|| {
            VaultError::InvalidRecipient(format!("unknown user {}", req.recipient))
        })?;

        let ownership = match self.resolve_ownership(owner, &req.item) {
            Ok(o) => o,
            Err(VaultError::Access(what)) => return Err(VaultError::NotOwner(what)),
            Err(e) => return Err(e),
        };
        ownership.require_owner()?;
        let item_ref = ownership.canonical_id;

        if self.store.grant(owner, &item_ref, &req.recipient)?.is_some() {
            return Err(VaultError::AlreadyShared);
        }

        let parent = match &req.destination {
            None => Parent::Root(recipient_user.id.clone()),
            Some(dest) => {
                let dest_own = self.resolve_ownership(&req.recipient, dest)?;
                dest_own.require_modify()?;
                let dest_node = self.require_canonical(&dest_own.canonical_id)?;
                if !dest_node.is_folder() {
                    return Err(VaultError::InvalidTarget(format!(
                        "destination {dest} is not a folder"
                    )));
                }
                Parent::Folder(dest_own.canonical_id)
            }
        };

        let canonical = self.require_canonical(&item_ref)?;
        let shared_by = self
            .store
            .user(owner)?
            .and_then(|u| u.public_name)
            .unwrap_or_else(|| owner.to_string());

        for _ in 0..ID_MINT_ATTEMPTS {
            let shadow = VaultNode {
                id: NodeId::random(),
                owner_id: req.recipient.clone(),
                parent: parent.clone(),
                name: canonical.name.clone(),
                protected_key: req.wrapped_key.clone(),
                link_tag: None,
                modified_at: unix_now(),
                projection: Projection::Shadow {
                    ref_id: item_ref.clone(),
                    can_modify: req.can_modify,
                    shared_by: shared_by.clone(),
                },
                content: canonical.content.clone(),
            };
            let grant = ShareGrant {
                id: GrantId::random(),
                owner_id: owner.clone(),
                recipient_id: req.recipient.clone(),
                item_ref: item_ref.clone(),
                is_folder: canonical.is_folder(),
                can_modify: req.can_modify,
            };
            let grant_id = grant.id.clone();
            let shadow_id = shadow.id.clone();

            match self.store.insert_share(shadow, grant)? {
                ShareInsert::Inserted => {
                    tracing::info!(
                        item = %item_ref,
                        owner = %owner,
                        recipient = %req.recipient,
                        shadow = %shadow_id,
                        can_modify = req.can_modify,
                        "item shared"
                    );
                    return Ok(grant_id);
                }
                ShareInsert::IdTaken => {
                    tracing::debug!(shadow = %shadow_id, "shadow id collision, minting another");
                }
            }
        }

        Err(VaultError::Integrity("could not mint an unused shadow id".into()))
    }

    /// Owner-initiated revocation: removes the recipient's shadow rows of the
    /// item and the grant.
    pub fn unshare(&self, owner: &UserId, item: &NodeId, recipient: &UserId) -> VaultResult<()> {
        let ownership = self.resolve_ownership(owner, item)?;
        ownership.require_owner()?;
        let item_ref = ownership.canonical_id;

        let grant = self.store.grant(owner, &item_ref, recipient)?.ok_or_else(|| {
            VaultError::NotFound(format!("share of {item_ref} with {recipient}"))
        })?;

        let removed = self.remove_shadows(&item_ref, recipient)?;
        self.store.remove_grant(&grant.id)?;
        tracing::info!(item = %item_ref, recipient = %recipient, shadows = removed, "share revoked");
        Ok(())
    }

    /// Recipient-initiated removal of their own shadow row. The canonical
    /// item and other recipients' shadows are left alone.
    pub fn remove_shared_copy(&self, caller: &UserId, shadow_id: &NodeId) -> VaultResult<()> {
        let shadow = self.require_node(shadow_id)?;
        if &shadow.owner_id != caller || shadow.is_canonical() {
            return Err(VaultError::InvalidTarget(format!(
                "{shadow_id} is not a shared copy owned by the caller"
            )));
        }
        let item_ref = shadow.ref_id().clone();

        self.store.remove_node(shadow_id)?;
        for grant in self.store.grants_for_item(&item_ref)? {
            if &grant.recipient_id == caller {
                self.store.remove_grant(&grant.id)?;
            }
        }
        tracing::info!(item = %item_ref, recipient = %caller, "shared copy removed");
        Ok(())
    }

    /// Change the permission of an existing share. Updates the grant and the
    /// recipient's shadow rows; never creates a share.
    pub fn set_permission(
        &self,
        owner: &UserId,
        item: &NodeId,
        recipient: &UserId,
        can_modify: bool,
    ) -> VaultResult<()> {
        let ownership = self.resolve_ownership(owner, item)?;
        ownership.require_owner()?;
        let item_ref = ownership.canonical_id;

        let grant = self.store.grant(owner, &item_ref, recipient)?.ok_or_else(|| {
            VaultError::NotFound(format!("share of {item_ref} with {recipient}"))
        })?;
        self.store.set_grant_permission(&grant.id, can_modify)?;
        self.store.update_ref(&item_ref, &mut |row: &mut VaultNode| {
            if &row.owner_id == recipient {
                if let Projection::Shadow { can_modify: flag, .. } = &mut row.projection {
                    *flag = can_modify;
                }
            }
        })?;
        tracing::info!(item = %item_ref, recipient = %recipient, can_modify, "share permission updated");
        Ok(())
    }

    /// Grants on one item, visible to its owner only.
    pub fn list_grants(&self, owner: &UserId, item: &NodeId) -> VaultResult<Vec<ShareGrant>> {
        let ownership = self.resolve_ownership(owner, item)?;
        ownership.require_owner()?;
        self.store.grants_for_item(&ownership.canonical_id)
    }

    /// Every grant the caller has handed out.
    pub fn shared_by(&self, owner: &UserId) -> VaultResult<Vec<ShareGrant>> {
        self.store.grants_by_owner(owner)
    }

    pub(crate) fn remove_shadows(&self, item_ref: &NodeId, recipient: &UserId) -> VaultResult<usize> {
        let mut removed = 0;
        for row in self.store.nodes_by_ref(item_ref)? {
            if !row.is_canonical() && &row.owner_id == recipient {
                self.store.remove_node(&row.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
