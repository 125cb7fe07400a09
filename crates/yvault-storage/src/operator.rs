//! OpenDAL Operator factory for yvault backends

use anyhow::{Context, Result};
use opendal::Operator;

use yvault_core::config::{BackendKind, StorageConfig};

/// S3 access credentials, never read from the config file
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    /// Read `YVAULT_ACCESS_KEY_ID`/`YVAULT_SECRET_ACCESS_KEY`, falling back
    /// to the standard `AWS_` variables.
    pub fn from_env() -> Result<Self> {
        let access_key_id = env_either("YVAULT_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID")
            .context("S3 access key id not set (YVAULT_ACCESS_KEY_ID or AWS_ACCESS_KEY_ID)")?;
        let secret_access_key = env_either("YVAULT_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY")
            .context(
                "S3 secret access key not set (YVAULT_SECRET_ACCESS_KEY or AWS_SECRET_ACCESS_KEY)",
            )?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

fn env_either(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .or_else(|| std::env::var(fallback).ok())
        .filter(|v| !v.is_empty())
}

/// Build the operator selected by `[storage]`.
///
/// `creds` is only consulted for the S3 backend. If `enforce_tls` is true
/// and the S3 endpoint uses HTTP, this returns an error; otherwise a warning
/// is logged for non-HTTPS endpoints.
pub fn build_operator(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let op = match storage.backend {
        BackendKind::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        BackendKind::Local => {
            let root = storage.root.to_str().with_context(|| {
                format!("storage root is not valid UTF-8: {}", storage.root.display())
            })?;
            Operator::new(opendal::services::Fs::default().root(root))
                .context("creating OpenDAL fs operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        BackendKind::S3 => {
            check_endpoint_tls(storage)?;
            let creds = creds.context("S3 backend selected but no credentials supplied")?;
            // path-style addressing is the default, required by MinIO/SeaweedFS
            let builder = opendal::services::S3::default()
                .endpoint(&storage.endpoint)
                .region(&storage.region)
                .bucket(&storage.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);
            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
    };

    tracing::info!(backend = ?storage.backend, "storage operator ready");
    Ok(op)
}

fn check_endpoint_tls(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
        );
    }
    Ok(())
}
