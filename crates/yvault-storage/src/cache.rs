//! Hot cache for small, finished send objects.
//!
//! Holds whole ciphertext objects keyed by backend object id. Entries are
//! written atomically (temp → rename) and evicted LRU-style when the cache
//! exceeds `max_bytes`. Objects larger than `max_entry_bytes` are never
//! admitted.
//!
//! Cache layout: `{cache_dir}/{last two chars of id}/{id}` (two-level sharding).

use anyhow::{Context, Result};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub struct HotCache {
    dir: PathBuf,
    max_bytes: u64,
    max_entry_bytes: u64,
}

impl HotCache {
    pub fn new(dir: PathBuf, max_bytes: u64, max_entry_bytes: u64) -> Self {
        HotCache {
            dir,
            max_bytes,
            max_entry_bytes,
        }
    }

    pub fn admits(&self, len: u64) -> bool {
        len <= self.max_entry_bytes && len <= self.max_bytes
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let prefix = match key.get(key.len().saturating_sub(2)..) {
            Some(tail) if tail.len() == 2 => tail,
            _ => "xx",
        };
        self.dir.join(prefix).join(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Read bytes `start..=end` of a cached object. `None` on miss or short file.
    pub async fn get_range(&self, key: &str, start: u64, end: u64) -> Option<Vec<u8>> {
        if end < start {
            return None;
        }
        let path = self.path_for(key);
        let mut file = fs::File::open(&path).await.ok()?;
        file.seek(SeekFrom::Start(start)).await.ok()?;
        let mut buf = vec![0u8; (end - start + 1) as usize];
        file.read_exact(&mut buf).await.ok()?;
        Some(buf)
    }

    /// Store an object. Objects over the entry limit are skipped.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<bool> {
        if !self.admits(data.len() as u64) {
            return Ok(false);
        }
        let path = self.path_for(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating cache dir: {}", parent.display()))?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)
            .await
            .with_context(|| format!("writing cache tmp: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming cache entry: {}", path.display()))?;

        if let Err(e) = self.evict_if_needed().await {
            tracing::warn!("hot cache eviction failed: {e}");
        }
        Ok(true)
    }

    /// Removing an absent entry succeeds.
    pub async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing cache entry {key}")),
        }
    }

    async fn evict_if_needed(&self) -> Result<()> {
        let mut entries: Vec<(PathBuf, u64, std::time::SystemTime)> = Vec::new();
        let mut total: u64 = 0;

        let mut top = fs::read_dir(&self.dir).await?;
        while let Some(shard) = top.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut inner = fs::read_dir(shard.path()).await?;
            while let Some(entry) = inner.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_file() && !entry.file_name().to_string_lossy().ends_with(".tmp") {
                    let atime = meta
                        .accessed()
                        .or_else(|_| meta.modified())
                        .unwrap_or(std::time::UNIX_EPOCH);
                    total += meta.len();
                    entries.push((entry.path(), meta.len(), atime));
                }
            }
        }

        if total <= self.max_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, atime)| *atime);
        for (path, size, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).await.is_ok() {
                tracing::debug!(path = %path.display(), bytes = size, "hot cache evicted");
                total = total.saturating_sub(size);
            }
        }

        Ok(())
    }
}
