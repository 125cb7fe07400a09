use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::UNLIMITED;

/// Top-level server configuration (loaded from yvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub transfer: TransferConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9110)
    pub metrics_addr: Option<String>,
    /// Seconds between sweeper passes (expired sends, idle visitors, deletions)
    pub sweep_interval_secs: u64,
}

/// Which bytes backend holds the ciphertext objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Server-local directory
    Local,
    /// Any S3-compatible endpoint (AWS, B2, SeaweedFS, MinIO)
    S3,
    /// Process memory; tests and throwaway instances
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory for the local backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Storage granted to new users in bytes (-1 = unlimited)
    pub default_user_storage: i64,
    /// Send allowance granted to new users in bytes (-1 = unlimited)
    pub default_user_send: i64,
    /// Upper bound on a send object's download count (-1 = unlimited)
    pub max_send_downloads: i32,
    /// Upper bound on a send object's lifetime in days (-1 = unlimited)
    pub max_send_expiry_days: i64,
    /// Refill period of the visitor limiter, in seconds
    pub limiter_seconds: u64,
    /// Burst size of the visitor limiter
    pub limiter_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext bytes per chunk
    pub chunk_size: u64,
    /// Bytes added to every sealed chunk (nonce + tag)
    pub overhead: u64,
    /// Width of the parallel upload pool
    pub workers: usize,
    /// Hot cache directory for small send objects
    pub cache_dir: Option<PathBuf>,
    /// Maximum hot cache size in MB
    pub cache_max_mb: u64,
    /// Objects larger than this are never cached
    pub cache_max_entry_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON state file holding users, nodes, grants, and send objects
    pub db_path: PathBuf,
    /// Ascents deeper than this are treated as a corrupt forest
    pub max_tree_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "json".into(),
            metrics_addr: Some("127.0.0.1:9110".into()),
            sweep_interval_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            root: PathBuf::from("/var/lib/yvault/objects"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "yvault".into(),
            enforce_tls: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_user_storage: UNLIMITED,
            default_user_send: UNLIMITED,
            max_send_downloads: 10,
            max_send_expiry_days: 30,
            limiter_seconds: 30,
            limiter_attempts: 6,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024 * 1024,
            overhead: 40,
            workers: 3,
            cache_dir: None,
            cache_max_mb: 1024,
            cache_max_entry_mb: 16,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/yvault/state.json"),
            max_tree_depth: 128,
        }
    }
}

/// Largest accepted plaintext chunk
pub const MAX_CHUNK_SIZE: u64 = 1 << 30;

impl VaultConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let max_downloads = self.limits.max_send_downloads;
        if max_downloads == 0 || max_downloads < -1 {
            bail!("limits.max_send_downloads must be -1 (unlimited) or greater than 0");
        }
        let max_expiry = self.limits.max_send_expiry_days;
        if max_expiry == 0 || max_expiry < -1 {
            bail!("limits.max_send_expiry_days must be -1 (unlimited) or greater than 0");
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            bail!("transfer.chunk_size must be between 1 and {MAX_CHUNK_SIZE} bytes");
        }
        if self.transfer.overhead > MAX_CHUNK_SIZE {
            bail!("transfer.overhead must be at most {MAX_CHUNK_SIZE} bytes");
        }
        if self.transfer.workers == 0 {
            bail!("transfer.workers must be at least 1");
        }
        if self.state.max_tree_depth == 0 {
            bail!("state.max_tree_depth must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
log_level = "debug"
log_format = "text"
metrics_addr = "0.0.0.0:9200"
sweep_interval_secs = 15

[storage]
backend = "s3"
endpoint = "https://s3.us-west-004.backblazeb2.com"
region = "us-west-004"
bucket = "vault-objects"
enforce_tls = true

[limits]
default_user_storage = 1073741824
default_user_send = 104857600
max_send_downloads = 5
max_send_expiry_days = 7

[transfer]
chunk_size = 5242880
workers = 6
cache_dir = "/var/cache/yvault"

[state]
db_path = "/tmp/yvault-state.json"
max_tree_depth = 64
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.sweep_interval_secs, 15);
        assert_eq!(config.storage.backend, BackendKind::S3);
        assert!(config.storage.enforce_tls);
        assert_eq!(config.limits.default_user_storage, 1 << 30);
        assert_eq!(config.limits.max_send_downloads, 5);
        assert_eq!(config.transfer.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.transfer.overhead, 40);
        assert_eq!(config.transfer.workers, 6);
        assert_eq!(
            config.transfer.cache_dir,
            Some(PathBuf::from("/var/cache/yvault"))
        );
        assert_eq!(config.state.max_tree_depth, 64);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.backend, BackendKind::Local);
        assert_eq!(config.limits.default_user_storage, UNLIMITED);
        assert_eq!(config.limits.max_send_downloads, 10);
        assert_eq!(config.limits.max_send_expiry_days, 30);
        assert_eq!(config.limits.limiter_seconds, 30);
        assert_eq!(config.limits.limiter_attempts, 6);
        assert_eq!(config.transfer.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.transfer.workers, 3);
        assert!(config.transfer.cache_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_downloads() {
        let mut config = VaultConfig::default();
        config.limits.max_send_downloads = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_send_downloads"));

        config.limits.max_send_downloads = -5;
        assert!(config.validate().is_err());

        config.limits.max_send_downloads = -1;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = VaultConfig::default();
        config.transfer.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_chunk_size() {
        let mut config = VaultConfig::default();
        config.transfer.chunk_size = MAX_CHUNK_SIZE;
        config.validate().unwrap();

        config.transfer.chunk_size = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VaultConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.state.db_path, parsed.state.db_path);
        assert_eq!(config.storage.bucket, parsed.storage.bucket);
        assert_eq!(config.transfer.chunk_size, parsed.transfer.chunk_size);
    }
}
