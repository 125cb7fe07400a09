//! File rows: registration, completion, and metadata reads

use serde::Serialize;
use yvault_core::{
    unix_now, FileContent, NodeContent, NodeId, Projection, UploadState, UserId, VaultError,
    VaultNode, VaultResult,
};

use crate::ownership::Ownership;
use crate::vault::Vault;

#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    /// The caller's row when they hold one, else the canonical row
    pub file: VaultNode,
    pub ownership: Ownership,
}

impl FileView {
    pub fn content(&self) -> VaultResult<&FileContent> {
        self.file
            .file()
            .ok_or_else(|| VaultError::InvalidRequest(format!("{} is not a file", self.file.id)))
    }
}

impl Vault {
    /// Register a file row in the pending state. Quota admission is the
    /// caller's job; this only checks placement.
    pub fn register_file(
        &self,
        caller: &UserId,
        name: String,
        parent: Option<&NodeId>,
        wrapped_key: Vec<u8>,
        size: u64,
        chunk_count: u32,
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
            content: NodeContent::File(FileContent {
                size,
                chunk_count,
                ciphertext_len: 0,
                backend_object_id: None,
                state: UploadState::Pending,
            }),
        })?;
        tracing::info!(file = %node.id, owner = %node.owner_id, size, chunk_count, "file registered");
        Ok(node)
    }

    /// Record the assembled backend object on every row of the file and
    /// leave the pending state.
    pub fn finalize_file(
        &self,
        file_ref: &NodeId,
        object_id: &str,
        ciphertext_len: u64,
    ) -> VaultResult<()> {
        let now = unix_now();
        let changed = self.store.update_ref(file_ref, &mut |row: &mut VaultNode| {
            if let NodeContent::File(content) = &mut row.content {
                content.backend_object_id = Some(object_id.to_string());
                content.ciphertext_len = ciphertext_len;
                content.state = UploadState::Ready;
                row.modified_at = now;
            }
        })?;
        if changed == 0 {
            return Err(VaultError::NotFound(format!("file {file_ref}")));
        }
        tracing::info!(file = %file_ref, object = object_id, bytes = ciphertext_len, "file ready");
        Ok(())
    }

    /// Drop a file row whose upload never completed.
    pub fn discard_pending_file(&self, file_ref: &NodeId) -> VaultResult<()> {
        let canonical = self.require_canonical(file_ref)?;
        match canonical.file() {
            Some(content) if content.state == UploadState::Pending => {
                for row in self.store.nodes_by_ref(file_ref)? {
                    self.store.remove_node(&row.id)?;
                }
                tracing::info!(file = %file_ref, "pending file discarded");
                Ok(())
            }
            _ => Err(VaultError::InvalidRequest(format!(
                "{file_ref} is not a pending file"
            ))),
        }
    }

    /// File metadata as seen by `caller`, after an access check.
    pub fn file_metadata(&self, caller: &UserId, node: &NodeId) -> VaultResult<FileView> {
        let ownership = self.resolve_ownership(caller, node)?;
        let file = self.caller_row(&ownership.canonical_id, caller)?;
        if file.file().is_none() {
            return Err(VaultError::InvalidRequest(format!("{node} is not a file")));
        }
        Ok(FileView { file, ownership })
    }
}
