//! Operator commands that touch the state file and exit

use anyhow::{Context, Result};
use std::sync::Arc;
use yvault_core::config::VaultConfig;
use yvault_core::{Meter, UserId};
use yvault_quota::QuotaMeter;
use yvault_state::{MemoryStore, MetaStore};

fn open_store(config: &VaultConfig) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::open(&config.state.db_path)
        .with_context(|| format!("opening state store: {}", config.state.db_path.display()))?;
    Ok(Arc::new(store))
}

/// Create a user row unless one exists. Allowances default to `[limits]`.
pub fn add_user(
    config: &VaultConfig,
    id: &str,
    name: Option<String>,
    storage: Option<i64>,
    send: Option<i64>,
) -> Result<()> {
    let store = open_store(config)?;
    let quota = QuotaMeter::new(store.clone());
    let user = quota
        .ensure_user(
            &UserId::new(id),
            name,
            storage.unwrap_or(config.limits.default_user_storage),
            send.unwrap_or(config.limits.default_user_send),
        )
        .with_context(|| format!("provisioning user {id}"))?;
    store.flush().context("flushing state store")?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

/// Print storage and send usage of one user.
pub fn print_usage(config: &VaultConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let quota = QuotaMeter::new(store);
    let user = UserId::new(id);
    let storage = quota.usage(&user, Meter::Storage)?;
    let send = quota.usage(&user, Meter::Send)?;
    let report = serde_json::json!({
        "user": id,
        "storage": { "used": storage.used, "available": storage.available, "remaining": storage.remaining() },
        "send": { "used": send.used, "available": send.available, "remaining": send.remaining() },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
