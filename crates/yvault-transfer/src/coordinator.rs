//! Server-side transfer coordinator
//!
//! Two kinds of resource flow through here:
//! - vault files: foldered, permission-checked, charged to the owner's
//!   storage meter, never counted on read
//! - send objects: flat, charged to the uploader's send meter, deleted once
//!   their download budget or lifetime runs out
//!
//! Uploads are stateless between chunks. Each sealed chunk is stored as a
//! backend part keyed by its number and charged once, when it first lands.
//! The final chunk is refused until every other part is stored; it then
//! assembles the object and flips the row out of pending.

use serde::Serialize;
use yvault_core::{
    unix_now, Meter, NodeId, SendId, SendObject, UploadState, UserId, VaultError, VaultNode,
    VaultResult,
};
use yvault_quota::QuotaMeter;
use yvault_state::{Consumed, MetaStore};
use yvault_storage::{BackendStore, HotCache, StoredObject};
use yvault_vault::Vault;

use crate::chunks::{ChunkLayout, ChunkRange};
use crate::send::SendLimits;

/// Attempts at minting a fresh send id before giving up
const SEND_MINT_ATTEMPTS: usize = 8;

/// What an upload writes into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UploadTarget {
    Vault(NodeId),
    Send(SendId),
}

impl UploadTarget {
    /// Backend id shared by the upload's parts and its assembled object
    pub fn upload_id(&self) -> String {
        match self {
            UploadTarget::Vault(id) => format!("vault-{id}"),
            UploadTarget::Send(id) => format!("send-{id}"),
        }
    }
}

/// Metadata of a new send object
#[derive(Debug, Clone)]
pub struct SendUpload {
    /// Encrypted name
    pub name: String,
    pub salt: Vec<u8>,
    /// Declared plaintext size
    pub size: u64,
    pub chunk_count: u32,
    /// Download budget; `-1` for unlimited where allowed
    pub downloads: i32,
    pub expiry_days: u32,
}

/// Public view of a send object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendInfo {
    pub id: SendId,
    pub name: String,
    pub salt: Vec<u8>,
    pub size: u64,
    pub chunk_count: u32,
    pub downloads_remaining: i32,
    pub expires_at: u64,
}

impl From<&SendObject> for SendInfo {
    fn from(send: &SendObject) -> Self {
        Self {
            id: send.id.clone(),
            name: send.name.clone(),
            salt: send.salt.clone(),
            size: send.size,
            chunk_count: send.chunk_count,
            downloads_remaining: send.downloads_remaining,
            expires_at: send.expires_at,
        }
    }
}

/// One sealed chunk read back from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedChunk {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// Outcome of one pass over the deletion queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub deleted: usize,
    /// Deletions that failed and went back on the queue
    pub requeued: usize,
}

/// Resolved bookkeeping for one incoming chunk
struct UploadPlan {
    upload_id: String,
    /// Declared plaintext size
    size: u64,
    chunk_count: u32,
    charge_to: UserId,
    meter: Meter,
}

pub struct TransferCoordinator {
    vault: Vault,
    backend: BackendStore,
    cache: Option<HotCache>,
    layout: ChunkLayout,
    limits: SendLimits,
}

impl TransferCoordinator {
    pub fn new(vault: Vault, backend: BackendStore, layout: ChunkLayout, limits: SendLimits) -> Self {
        Self {
            vault,
            backend,
            cache: None,
            layout,
            limits,
        }
    }

    /// Serve finished objects from `cache` when they fit.
    pub fn with_cache(mut self, cache: HotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    fn store(&self) -> &dyn MetaStore {
        self.vault.store().as_ref()
    }

    fn quota(&self) -> &QuotaMeter {
        self.vault.quota()
    }

    // ── upload ───────────────────────────────────────────────────────────

    /// Register a vault file for upload.
    ///
    /// The file belongs to whoever owns the destination tree, and that user's
    /// remaining storage must cover `size`.
    pub fn init_vault_upload(
        &self,
        caller: &UserId,
        name: String,
        parent: Option<&NodeId>,
        wrapped_key: Vec<u8>,
        size: u64,
        chunk_count: u32,
    ) -> VaultResult<VaultNode> {
        self.check_declared(size, chunk_count)?;
        let (owner, _) = self.vault.placement(caller, parent)?;
        self.quota().admit(&owner, Meter::Storage, size)?;
        self.vault
            .register_file(caller, name, parent, wrapped_key, size, chunk_count)
    }

    /// Register a send object for upload, charged to `owner`'s send meter.
    pub fn init_send_upload(&self, owner: &UserId, upload: SendUpload) -> VaultResult<SendObject> {
        self.check_declared(upload.size, upload.chunk_count)?;
        self.limits.validate_downloads(upload.downloads)?;
        self.limits.validate_expiry(upload.expiry_days)?;
        self.quota().admit(owner, Meter::Send, upload.size)?;

        let now = unix_now();
        for _ in 0..SEND_MINT_ATTEMPTS {
            let send = SendObject {
                id: SendId::random(),
                owner_id: owner.clone(),
                name: upload.name.clone(),
                salt: upload.salt.clone(),
                size: upload.size,
                chunk_count: upload.chunk_count,
                ciphertext_len: 0,
                backend_object_id: None,
                state: UploadState::Pending,
                downloads_remaining: upload.downloads,
                expires_at: SendLimits::expires_at(now, upload.expiry_days),
                created_at: now,
            };
            if self.store().insert_send(send.clone())? {
                tracing::info!(
                    send = %send.id,
                    owner = %owner,
                    size = send.size,
                    chunks = send.chunk_count,
                    downloads = send.downloads_remaining,
                    "send registered"
                );
                return Ok(send);
            }
        }
        Err(VaultError::Integrity("could not mint an unused send id".into()))
    }

    /// Store one sealed chunk and charge its plaintext size.
    ///
    /// Chunks below the last may arrive in any order, and resending one
    /// replaces it without a second charge. The last chunk is rejected until
    /// all others are stored; it assembles the backend object and returns
    /// its id.
    pub async fn upload_chunk(
        &self,
        caller: &UserId,
        target: &UploadTarget,
        chunk: u32,
        sealed: Vec<u8>,
    ) -> VaultResult<Option<String>> {
        let plan = self.plan_upload(caller, target)?;
        self.check_chunk(chunk, &plan, sealed.len() as u64)?;

        if chunk == plan.chunk_count {
            let missing = self
                .backend
                .missing_parts(&plan.upload_id, plan.chunk_count - 1)
                .await?;
            if !missing.is_empty() {
                return Err(VaultError::InvalidRequest(format!(
                    "final chunk arrived before chunks {missing:?}"
                )));
            }
        }

        let plaintext = self.layout.plaintext_len_of(sealed.len() as u64);
        let resent = self.backend.has_part(&plan.upload_id, chunk).await?;
        if resent {
            self.quota().require_within(&plan.charge_to, plan.meter)?;
        }
        self.backend.put_part(&plan.upload_id, chunk, sealed).await?;
        if resent {
            tracing::debug!(upload = %plan.upload_id, chunk, "chunk replaced");
        } else {
            self.quota().charge(
                &plan.charge_to,
                plan.meter,
                i64::try_from(plaintext).unwrap_or(i64::MAX),
            )?;
            tracing::debug!(upload = %plan.upload_id, chunk, bytes = plaintext, "chunk received");
        }

        if chunk < plan.chunk_count {
            return Ok(None);
        }

        let stored = self.backend.complete(&plan.upload_id, plan.chunk_count).await?;
        match target {
            UploadTarget::Vault(node) => {
                let ownership = self.vault.resolve_ownership(caller, node)?;
                self.vault
                    .finalize_file(&ownership.canonical_id, &stored.object_id, stored.len)?;
                self.populate_cache(&stored).await;
            }
            UploadTarget::Send(id) => {
                self.store().update_send(id, &mut |send: &mut SendObject| {
                    send.backend_object_id = Some(stored.object_id.clone());
                    send.ciphertext_len = stored.len;
                    send.state = UploadState::Ready;
                })?;
                tracing::info!(send = %id, bytes = stored.len, "send ready");
                self.populate_cache(&stored).await;
            }
        }
        Ok(Some(stored.object_id))
    }

    /// Drop an unfinished upload: its pending row and any stored parts.
    /// Charges already applied for delivered chunks stay in place.
    pub async fn abort_upload(&self, caller: &UserId, target: &UploadTarget) -> VaultResult<()> {
        let plan = self.plan_upload(caller, target)?;
        match target {
            UploadTarget::Vault(node) => {
                let ownership = self.vault.resolve_ownership(caller, node)?;
                self.vault.discard_pending_file(&ownership.canonical_id)?;
            }
            UploadTarget::Send(id) => {
                self.store().remove_send(id)?;
            }
        }
        self.backend.abort(&plan.upload_id, plan.chunk_count).await;
        tracing::info!(upload = %plan.upload_id, "upload aborted");
        Ok(())
    }

    fn plan_upload(&self, caller: &UserId, target: &UploadTarget) -> VaultResult<UploadPlan> {
        match target {
            UploadTarget::Vault(node) => {
                let ownership = self.vault.resolve_ownership(caller, node)?;
                ownership.require_modify()?;
                let file = self.vault.require_canonical(&ownership.canonical_id)?;
                let content = file.file().ok_or_else(|| {
                    VaultError::InvalidRequest(format!("{node} is not a file"))
                })?;
                if content.state != UploadState::Pending {
                    return Err(VaultError::InvalidRequest(format!(
                        "{node} is already uploaded"
                    )));
                }
                Ok(UploadPlan {
                    upload_id: UploadTarget::Vault(ownership.canonical_id.clone()).upload_id(),
                    size: content.size,
                    chunk_count: content.chunk_count,
                    charge_to: file.owner_id.clone(),
                    meter: Meter::Storage,
                })
            }
            UploadTarget::Send(id) => {
                let send = self.require_send(id)?;
                if &send.owner_id != caller {
                    return Err(VaultError::Access(format!("send {id}")));
                }
                if send.state != UploadState::Pending {
                    return Err(VaultError::InvalidRequest(format!(
                        "send {id} is already uploaded"
                    )));
                }
                Ok(UploadPlan {
                    upload_id: target.upload_id(),
                    size: send.size,
                    chunk_count: send.chunk_count,
                    charge_to: send.owner_id,
                    meter: Meter::Send,
                })
            }
        }
    }

    fn check_declared(&self, size: u64, chunk_count: u32) -> VaultResult<()> {
        let expected = self.layout.chunk_count(size);
        if chunk_count != expected {
            return Err(VaultError::InvalidRequest(format!(
                "{size} bytes need {expected} chunks, got {chunk_count}"
            )));
        }
        Ok(())
    }

    /// Every chunk must carry exactly the sealed length its slice of the
    /// declared size calls for.
    fn check_chunk(&self, chunk: u32, plan: &UploadPlan, sealed_len: u64) -> VaultResult<()> {
        if chunk == 0 || chunk > plan.chunk_count {
            return Err(VaultError::InvalidRequest(format!(
                "chunk {chunk} outside 1..={}",
                plan.chunk_count
            )));
        }
        match self.layout.sealed_len_of(chunk, plan.size) {
            Some(expected) if expected == sealed_len => Ok(()),
            Some(expected) => Err(VaultError::InvalidRequest(format!(
                "chunk {chunk} has {sealed_len} sealed bytes, expected {expected}"
            ))),
            None => Err(VaultError::InvalidRequest(format!(
                "chunk {chunk} does not fit a {} byte file",
                plan.size
            ))),
        }
    }

    // ── download ─────────────────────────────────────────────────────────

    /// Read one sealed chunk of a vault file the caller can reach.
    pub async fn download_vault_chunk(
        &self,
        caller: &UserId,
        node: &NodeId,
        chunk: u32,
    ) -> VaultResult<DownloadedChunk> {
        let ownership = self.vault.resolve_ownership(caller, node)?;
        let file = self.vault.require_canonical(&ownership.canonical_id)?;
        let content = file
            .file()
            .ok_or_else(|| VaultError::InvalidRequest(format!("{node} is not a file")))?;
        let object_id = match (&content.state, &content.backend_object_id) {
            (UploadState::Ready, Some(object_id)) => object_id.clone(),
            _ => {
                return Err(VaultError::InvalidRequest(format!(
                    "{node} is still uploading"
                )))
            }
        };
        let range = self.range_for(chunk, content.ciphertext_len)?;
        let data = self.read_range(&object_id, range).await?;
        Ok(DownloadedChunk {
            data,
            eof: range.eof,
        })
    }

    /// Read one sealed chunk of a send object.
    ///
    /// Reading the last chunk counts one download; the object is deleted
    /// when its budget runs out. Expired objects are deleted on sight.
    pub async fn download_send_chunk(&self, id: &SendId, chunk: u32) -> VaultResult<DownloadedChunk> {
        let send = self.live_send(id).await?;
        let object_id = match (&send.state, &send.backend_object_id) {
            (UploadState::Ready, Some(object_id)) => object_id.clone(),
            _ => {
                return Err(VaultError::InvalidRequest(format!(
                    "send {id} is still uploading"
                )))
            }
        };
        let range = self.range_for(chunk, send.ciphertext_len)?;
        let data = self.read_range(&object_id, range).await?;

        if range.eof {
            match self.store().consume_download(id)? {
                Consumed::Unlimited => {}
                Consumed::Remaining(left) => {
                    tracing::debug!(send = %id, left, "send download counted");
                }
                Consumed::Exhausted(_) => {
                    self.retire_object(&object_id).await?;
                    tracing::info!(send = %id, "send download budget spent, deleted");
                }
            }
        }
        Ok(DownloadedChunk {
            data,
            eof: range.eof,
        })
    }

    fn range_for(&self, chunk: u32, ciphertext_len: u64) -> VaultResult<ChunkRange> {
        self.layout
            .read_boundaries(chunk, ciphertext_len)
            .ok_or_else(|| {
                VaultError::InvalidRequest(format!(
                    "chunk {chunk} is outside a {ciphertext_len} byte object"
                ))
            })
    }

    async fn read_range(&self, object_id: &str, range: ChunkRange) -> VaultResult<Vec<u8>> {
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get_range(object_id, range.start, range.end).await {
                tracing::debug!(object = object_id, start = range.start, "served from hot cache");
                return Ok(bytes);
            }
        }
        self.backend
            .get_range(object_id, range.start, range.end)
            .await
    }

    async fn populate_cache(&self, stored: &StoredObject) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !cache.admits(stored.len) {
            return;
        }
        match self.backend.get_object(&stored.object_id).await {
            Ok(bytes) => match cache.put(&stored.object_id, &bytes).await {
                Ok(true) => tracing::debug!(object = %stored.object_id, "object cached"),
                Ok(false) => {}
                Err(e) => tracing::warn!(object = %stored.object_id, "failed to cache object: {e}"),
            },
            Err(e) => tracing::warn!(object = %stored.object_id, "failed to read object for cache: {e}"),
        }
    }

    // ── send lifecycle ───────────────────────────────────────────────────

    pub async fn send_info(&self, id: &SendId) -> VaultResult<SendInfo> {
        let send = self.live_send(id).await?;
        Ok(SendInfo::from(&send))
    }

    fn require_send(&self, id: &SendId) -> VaultResult<SendObject> {
        self.store()
            .send(id)?
            .ok_or_else(|| VaultError::NotFound(format!("send {id}")))
    }

    async fn live_send(&self, id: &SendId) -> VaultResult<SendObject> {
        let send = self.require_send(id)?;
        if send.is_expired(unix_now()) {
            self.expire(&send).await?;
            return Err(VaultError::Expired(format!("send {id}")));
        }
        Ok(send)
    }

    /// Delete every send object past its expiry. Returns how many went.
    pub async fn purge_expired(&self, now: u64) -> VaultResult<usize> {
        let expired = self.store().expired_sends(now)?;
        let count = expired.len();
        for send in &expired {
            self.expire(send).await?;
        }
        if count > 0 {
            tracing::info!(count, "expired sends purged");
        }
        Ok(count)
    }

    async fn expire(&self, send: &SendObject) -> VaultResult<()> {
        self.store().remove_send(&send.id)?;
        match &send.backend_object_id {
            Some(object_id) => self.retire_object(object_id).await?,
            None => {
                let upload_id = UploadTarget::Send(send.id.clone()).upload_id();
                self.backend.abort(&upload_id, send.chunk_count).await;
            }
        }
        tracing::info!(send = %send.id, "send expired");
        Ok(())
    }

    /// Queue a backend object for deletion and drop it from the hot cache.
    async fn retire_object(&self, object_id: &str) -> VaultResult<()> {
        self.store().queue_deletion(object_id.to_string())?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(object_id).await {
                tracing::warn!(object = object_id, "failed to evict from hot cache: {e}");
            }
        }
        Ok(())
    }

    /// Delete queued backend objects and their hot cache copies. Failures go
    /// back on the queue for the next pass.
    pub async fn flush_deletions(&self) -> VaultResult<FlushReport> {
        let mut report = FlushReport::default();
        for object_id in self.store().take_deletions()? {
            match self.backend.delete_object(&object_id).await {
                Ok(()) => {
                    report.deleted += 1;
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.remove(&object_id).await {
                            tracing::warn!(object = %object_id, "failed to evict from hot cache: {e}");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(object = %object_id, "backend deletion failed, requeued: {e}");
                    self.store().queue_deletion(object_id)?;
                    report.requeued += 1;
                }
            }
        }
        if report.deleted > 0 {
            tracing::debug!(deleted = report.deleted, "deletion queue flushed");
        }
        Ok(report)
    }
}
