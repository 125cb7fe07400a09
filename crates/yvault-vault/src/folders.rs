//! Folder operations and cascading deletion

use serde::Serialize;
use yvault_core::{
    unix_now, NodeContent, NodeId, Parent, Projection, UploadState, UserId, VaultError, VaultNode,
    VaultResult,
};

use crate::ownership::Ownership;
use crate::vault::Vault;

/// One entry of a folder listing, with the caller's effective permissions
#[derive(Debug, Clone, Serialize)]
pub struct ListedItem {
    pub node: VaultNode,
    pub is_owner: bool,
    pub can_modify: bool,
    /// Number of grants on the item; `None` unless the caller owns it
    pub share_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderListing {
    /// `None` when listing the caller's root
    pub folder: Option<VaultNode>,
    pub ownership: Ownership,
    pub items: Vec<ListedItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderInfo {
    /// The caller's row of the folder when they hold one, else the canonical row
    pub folder: VaultNode,
    pub ownership: Ownership,
    /// Wrapped keys root-to-leaf, excluding the folder's own key
    pub key_chain: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub nodes_removed: usize,
    pub grants_removed: usize,
    pub bytes_released: u64,
    pub objects_queued: usize,
}

impl Vault {
    /// Create a folder under `parent`, or at the caller's root.
    ///
    /// Inside a folder the caller needs `can_modify`, and the new folder
    /// belongs to the owner of that tree so every user with access sees it.
    pub fn create_folder(
        &self,
        caller: &UserId,
        name: String,
        parent: Option<&NodeId>,
        wrapped_key: Vec<u8>,
    ) -> VaultResult<VaultNode> {
        let (owner, parent) = self.placement(caller, parent)?;
        let node = self.insert_minted(|id| VaultNode {
            id,
            owner_id: owner.clone(),
            parent: parent.clone(),
            name: name.clone(),
            protected_key: wrapped_key.clone(),
            link_tag: None,
            modified_at: unix_now(),
            projection: Projection::Canonical,
            content: NodeContent::Folder,
        })?;
        tracing::info!(folder = %node.id, owner = %node.owner_id, caller = %caller, "folder created");
        Ok(node)
    }

    /// Owner and parent link for a new node placed by `caller`.
    pub fn placement(
        &self,
        caller: &UserId,
        parent: Option<&NodeId>,
    ) -> VaultResult<(UserId, Parent)> {
        let Some(parent_id) = parent else {
            return Ok((caller.clone(), Parent::Root(caller.clone())));
        };
        let ownership = self.resolve_ownership(caller, parent_id)?;
        ownership.require_modify()?;
        let folder = self.require_canonical(&ownership.canonical_id)?;
        if !folder.is_folder() {
            return Err(VaultError::InvalidRequest(format!(
                "{parent_id} is not a folder"
            )));
        }
        Ok((folder.owner_id, Parent::Folder(ownership.canonical_id)))
    }

    /// Children of a folder (or of the caller's root).
    ///
    /// Inside a folder every child inherits the folder's resolved
    /// permissions. Share counts are only reported to owners.
    pub fn list_folder(&self, caller: &UserId, folder: Option<&NodeId>) -> VaultResult<FolderListing> {
        let Some(folder_id) = folder else {
            let items = self
                .store
                .children(&Parent::Root(caller.clone()))?
                .into_iter()
                .map(|node| -> VaultResult<ListedItem> {
                    let is_owner = node.is_canonical();
                    let share_count = if is_owner {
                        Some(self.store.grants_for_item(&node.id)?.len())
                    } else {
                        None
                    };
                    Ok(ListedItem {
                        is_owner,
                        can_modify: node.can_modify(),
                        share_count,
                        node,
                    })
                })
                .collect::<VaultResult<Vec<_>>>()?;
            return Ok(FolderListing {
                folder: None,
                ownership: Ownership {
                    is_owner: true,
                    can_modify: true,
                    canonical_id: NodeId::new(caller.as_str()),
                    via: None,
                },
                items,
            });
        };

        let ownership = self.resolve_ownership(caller, folder_id)?;
        let folder = self.caller_row(&ownership.canonical_id, caller)?;
        if !folder.is_folder() {
            return Err(VaultError::InvalidRequest(format!("{folder_id} is not a folder")));
        }

        let mut items = Vec::new();
        for node in self
            .store
            .children(&Parent::Folder(ownership.canonical_id.clone()))?
        {
            let share_count = if ownership.is_owner && node.is_canonical() {
                Some(self.store.grants_for_item(&node.id)?.len())
            } else {
                None
            };
            // a recipient's shadow placed here keeps its own flag
            let (is_owner, can_modify) = if node.is_canonical() {
                (ownership.is_owner, ownership.can_modify)
            } else {
                (false, node.can_modify())
            };
            items.push(ListedItem {
                node,
                is_owner,
                can_modify,
                share_count,
            });
        }

        Ok(FolderListing {
            folder: Some(folder),
            ownership,
            items,
        })
    }

    /// Folder metadata plus the key chain needed to unwrap its key.
    pub fn folder_info(&self, caller: &UserId, folder: &NodeId) -> VaultResult<FolderInfo> {
        let ownership = self.resolve_ownership(caller, folder)?;
        let row = self.caller_row(&ownership.canonical_id, caller)?;
        if !row.is_folder() {
            return Err(VaultError::InvalidRequest(format!("{folder} is not a folder")));
        }
        let key_chain = self
            .key_chain_rows(&ownership.canonical_id, caller)?
            .into_iter()
            .map(|r| r.protected_key)
            .collect();
        Ok(FolderInfo {
            folder: row,
            ownership,
            key_chain,
        })
    }

    /// Rename an item. The new (encrypted) name lands on every row of the ref.
    pub fn rename(&self, caller: &UserId, node: &NodeId, new_name: String) -> VaultResult<()> {
        let ownership = self.resolve_ownership(caller, node)?;
        ownership.require_modify()?;
        let now = unix_now();
        let changed = self.store.update_ref(&ownership.canonical_id, &mut |row: &mut VaultNode| {
            row.name = new_name.clone();
            row.modified_at = now;
        })?;
        tracing::info!(node = %ownership.canonical_id, rows = changed, "item renamed");
        Ok(())
    }

    /// Delete an item and everything beneath it.
    ///
    /// Requires true ownership. Every shadow and grant of every removed ref
    /// goes with it, the storage of completed files is released to the
    /// file's owner, and the backend objects are queued for deletion.
    pub fn delete(&self, caller: &UserId, node: &NodeId) -> VaultResult<DeleteSummary> {
        let ownership = self.resolve_ownership(caller, node)?;
        ownership.require_owner()?;

        let mut summary = DeleteSummary::default();
        let mut pending = vec![(ownership.canonical_id.clone(), 0usize)];
        let mut doomed = Vec::new();

        while let Some((ref_id, depth)) = pending.pop() {
            if depth >= self.max_depth {
                return Err(VaultError::Integrity(format!(
                    "subtree of {} exceeds {} levels",
                    ownership.canonical_id, self.max_depth
                )));
            }
            let canonical = self.require_canonical(&ref_id)?;
            if canonical.is_folder() {
                for child in self.store.children(&Parent::Folder(ref_id.clone()))? {
                    if child.is_canonical() {
                        pending.push((child.id.clone(), depth + 1));
                    } else {
                        // a shadow placed inside a deleted folder
                        self.store.remove_node(&child.id)?;
                        summary.nodes_removed += 1;
                        for grant in self.store.grants_for_item(child.ref_id())? {
                            if grant.recipient_id == child.owner_id {
                                self.store.remove_grant(&grant.id)?;
                                summary.grants_removed += 1;
                            }
                        }
                    }
                }
            }
            doomed.push(canonical);
        }

        for canonical in doomed {
            let ref_id = canonical.id.clone();
            for grant in self.store.grants_for_item(&ref_id)? {
                self.store.remove_grant(&grant.id)?;
                summary.grants_removed += 1;
            }
            for row in self.store.nodes_by_ref(&ref_id)? {
                self.store.remove_node(&row.id)?;
                summary.nodes_removed += 1;
            }
            if let Some(file) = canonical.file() {
                // pending uploads keep whatever their delivered chunks charged
                if file.state == UploadState::Ready && file.size > 0 {
                    let released = i64::try_from(file.size).unwrap_or(i64::MAX);
                    self.quota.charge_storage(&canonical.owner_id, -released)?;
                    summary.bytes_released += file.size;
                }
                if let Some(object_id) = &file.backend_object_id {
                    self.store.queue_deletion(object_id.clone())?;
                    summary.objects_queued += 1;
                }
            }
        }

        tracing::info!(
            node = %ownership.canonical_id,
            nodes = summary.nodes_removed,
            grants = summary.grants_removed,
            bytes = summary.bytes_released,
            "item deleted"
        );
        Ok(summary)
    }

    /// The caller's row of a ref when they hold one, else the canonical row.
    pub(crate) fn caller_row(&self, ref_id: &NodeId, caller: &UserId) -> VaultResult<VaultNode> {
        match self.store.node_for_owner(ref_id, caller)? {
            Some(row) => Ok(row),
            None => self.require_canonical(ref_id),
        }
    }
}
