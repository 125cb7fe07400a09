//! Multi-part object store over an OpenDAL operator
//!
//! Layout:
//! ```text
//! uploads/{upload_id}/{chunk:08}   one sealed chunk per part, 1-indexed
//! objects/{object_id}              parts concatenated in chunk order
//! ```

use opendal::{ErrorKind, Operator};
use yvault_core::{VaultError, VaultResult};

/// Result of completing a multi-part upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub object_id: String,
    /// Total ciphertext bytes in the assembled object
    pub len: u64,
}

#[derive(Clone)]
pub struct BackendStore {
    op: Operator,
}

impl BackendStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn part_key(upload_id: &str, chunk: u32) -> String {
        format!("uploads/{upload_id}/{chunk:08}")
    }

    fn object_key(object_id: &str) -> String {
        format!("objects/{object_id}")
    }

    /// Store one sealed chunk. Rewriting a part replaces it.
    pub async fn put_part(&self, upload_id: &str, chunk: u32, bytes: Vec<u8>) -> VaultResult<()> {
        let key = Self::part_key(upload_id, chunk);
        let len = bytes.len();
        self.op
            .write(&key, bytes)
            .await
            .map_err(|e| backend_err(&format!("put {key}"), e))?;
        tracing::debug!(upload = upload_id, chunk, bytes = len, "part stored");
        Ok(())
    }

    /// Concatenate parts `1..=chunk_count` into the final object and drop
    /// the parts. The upload id becomes the object id.
    pub async fn complete(&self, upload_id: &str, chunk_count: u32) -> VaultResult<StoredObject> {
        let object_key = Self::object_key(upload_id);
        let mut writer = self
            .op
            .writer(&object_key)
            .await
            .map_err(|e| backend_err(&format!("open writer {object_key}"), e))?;

        let mut len = 0u64;
        for chunk in 1..=chunk_count {
            let key = Self::part_key(upload_id, chunk);
            let part = self
                .op
                .read(&key)
                .await
                .map_err(|e| backend_err(&format!("read part {key}"), e))?
                .to_vec();
            len += part.len() as u64;
            writer
                .write(part)
                .await
                .map_err(|e| backend_err(&format!("append {key}"), e))?;
        }
        writer
            .close()
            .await
            .map_err(|e| backend_err(&format!("close {object_key}"), e))?;

        self.abort(upload_id, chunk_count).await;

        tracing::info!(object = upload_id, chunks = chunk_count, bytes = len, "object assembled");
        Ok(StoredObject {
            object_id: upload_id.to_string(),
            len,
        })
    }

    /// Whether chunk `chunk` of an upload is already stored.
    pub async fn has_part(&self, upload_id: &str, chunk: u32) -> VaultResult<bool> {
        let key = Self::part_key(upload_id, chunk);
        match self.op.stat(&key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(backend_err(&format!("stat {key}"), e)),
        }
    }

    /// Chunk numbers in `1..=chunk_count` that have no stored part.
    pub async fn missing_parts(&self, upload_id: &str, chunk_count: u32) -> VaultResult<Vec<u32>> {
        let mut missing = Vec::new();
        for chunk in 1..=chunk_count {
            if !self.has_part(upload_id, chunk).await? {
                missing.push(chunk);
            }
        }
        Ok(missing)
    }

    /// Best-effort removal of every part of an upload.
    pub async fn abort(&self, upload_id: &str, chunk_count: u32) {
        for chunk in 1..=chunk_count {
            let key = Self::part_key(upload_id, chunk);
            if let Err(e) = self.op.delete(&key).await {
                tracing::warn!(upload = upload_id, chunk, "failed to delete part: {e}");
            }
        }
    }

    /// Read bytes `start..=end` of an assembled object.
    pub async fn get_range(&self, object_id: &str, start: u64, end: u64) -> VaultResult<Vec<u8>> {
        if end < start {
            return Err(VaultError::InvalidRequest(format!(
                "empty range [{start},{end}] for {object_id}"
            )));
        }
        let key = Self::object_key(object_id);
        let buf = self
            .op
            .read_with(&key)
            .range(start..end + 1)
            .await
            .map_err(|e| backend_err(&format!("read {key} [{start},{end}]"), e))?;
        Ok(buf.to_vec())
    }

    /// Read a whole assembled object.
    pub async fn get_object(&self, object_id: &str) -> VaultResult<Vec<u8>> {
        let key = Self::object_key(object_id);
        let buf = self
            .op
            .read(&key)
            .await
            .map_err(|e| backend_err(&format!("read {key}"), e))?;
        Ok(buf.to_vec())
    }

    pub async fn object_len(&self, object_id: &str) -> VaultResult<u64> {
        let key = Self::object_key(object_id);
        let meta = self
            .op
            .stat(&key)
            .await
            .map_err(|e| backend_err(&format!("stat {key}"), e))?;
        Ok(meta.content_length())
    }

    /// Deleting an absent object succeeds.
    pub async fn delete_object(&self, object_id: &str) -> VaultResult<()> {
        let key = Self::object_key(object_id);
        self.op
            .delete(&key)
            .await
            .map_err(|e| backend_err(&format!("delete {key}"), e))
    }
}

fn backend_err(action: &str, e: opendal::Error) -> VaultError {
    if e.kind() == ErrorKind::NotFound {
        VaultError::NotFound(action.to_string())
    } else {
        VaultError::Backend(format!("{action}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> BackendStore {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        BackendStore::new(op)
    }

    #[tokio::test]
    async fn test_parts_assemble_in_chunk_order() {
        let store = memory_store();
        // out of order arrival
        store.put_part("up1", 2, b"bbbb".to_vec()).await.unwrap();
        store.put_part("up1", 1, b"aaaa".to_vec()).await.unwrap();
        store.put_part("up1", 3, b"cc".to_vec()).await.unwrap();

        let stored = store.complete("up1", 3).await.unwrap();
        assert_eq!(stored.len, 10);
        assert_eq!(store.get_object("up1").await.unwrap(), b"aaaabbbbcc");
        assert_eq!(store.object_len("up1").await.unwrap(), 10);
        assert_eq!(store.get_range("up1", 4, 7).await.unwrap(), b"bbbb");
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_fails() {
        let store = memory_store();
        store.put_part("up2", 1, b"a".to_vec()).await.unwrap();
        let err = store.complete("up2", 2).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_parts_lists_gaps() {
        let store = memory_store();
        store.put_part("up4", 1, b"a".to_vec()).await.unwrap();
        store.put_part("up4", 3, b"c".to_vec()).await.unwrap();
        assert_eq!(store.missing_parts("up4", 4).await.unwrap(), vec![2, 4]);
        assert!(store.has_part("up4", 3).await.unwrap());
        assert!(!store.has_part("up4", 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = memory_store();
        store.put_part("up3", 1, b"x".to_vec()).await.unwrap();
        store.complete("up3", 1).await.unwrap();
        store.delete_object("up3").await.unwrap();
        store.delete_object("up3").await.unwrap();
        assert!(store.get_object("up3").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let store = memory_store();
        let err = store.get_range("any", 5, 4).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidRequest(_)));
    }
}
