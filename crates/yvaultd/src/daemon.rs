//! Daemon lifecycle: service construction, periodic sweeps, graceful shutdown

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use yvault_core::config::{BackendKind, VaultConfig};
use yvault_core::unix_now;
use yvault_quota::{QuotaMeter, VisitorLimiter};
use yvault_state::{MemoryStore, MetaStore};
use yvault_storage::{BackendStore, HotCache, S3Credentials};
use yvault_transfer::{ChunkLayout, SendLimits, TransferCoordinator};
use yvault_vault::Vault;

use crate::metrics::{DaemonMetrics, HealthState, Registry};

const MIB: u64 = 1024 * 1024;

/// Every long-lived service, built once at startup.
pub struct Services {
    pub store: Arc<MemoryStore>,
    pub operator: opendal::Operator,
    pub coordinator: Arc<TransferCoordinator>,
    pub limiter: Arc<VisitorLimiter>,
}

impl Services {
    pub fn build(config: &VaultConfig) -> Result<Self> {
        let creds = match config.storage.backend {
            BackendKind::S3 => Some(S3Credentials::from_env()?),
            BackendKind::Local | BackendKind::Memory => None,
        };
        let operator = yvault_storage::build_operator(&config.storage, creds.as_ref())
            .context("building storage operator")?;

        let store = Arc::new(
            MemoryStore::open(&config.state.db_path).with_context(|| {
                format!("opening state store: {}", config.state.db_path.display())
            })?,
        );
        let quota = QuotaMeter::new(store.clone());
        let vault = Vault::new(store.clone(), quota, config.state.max_tree_depth);

        let mut coordinator = TransferCoordinator::new(
            vault,
            BackendStore::new(operator.clone()),
            ChunkLayout::from_config(&config.transfer),
            SendLimits::from_config(&config.limits),
        );
        if let Some(dir) = &config.transfer.cache_dir {
            info!(dir = %dir.display(), max_mb = config.transfer.cache_max_mb, "hot cache enabled");
            coordinator = coordinator.with_cache(HotCache::new(
                dir.clone(),
                config.transfer.cache_max_mb * MIB,
                config.transfer.cache_max_entry_mb * MIB,
            ));
        }

        let limiter = Arc::new(VisitorLimiter::from_seconds(
            config.limits.limiter_seconds,
            config.limits.limiter_attempts,
        ));

        Ok(Self {
            store,
            operator,
            coordinator: Arc::new(coordinator),
            limiter,
        })
    }

    /// One sweeper pass: expired sends, idle visitors, the deletion queue,
    /// then a state flush.
    pub async fn sweep(&self, metrics: &DaemonMetrics) -> Result<()> {
        let purged = self
            .coordinator
            .purge_expired(unix_now())
            .await
            .context("purging expired sends")?;
        let idle = self.limiter.sweep(self.limiter.refill_window());
        let flushed = self
            .coordinator
            .flush_deletions()
            .await
            .context("flushing deletion queue")?;
        self.store.flush().context("flushing state store")?;

        metrics.sweeps.inc();
        metrics.sends_purged.inc_by(purged as u64);
        metrics.deletions_flushed.inc_by(flushed.deleted as u64);
        metrics.deletions_requeued.inc_by(flushed.requeued as u64);
        metrics.visitors_tracked.set(self.limiter.tracked() as i64);

        tracing::debug!(
            purged,
            idle_visitors = idle,
            deleted = flushed.deleted,
            requeued = flushed.requeued,
            "sweep complete"
        );
        Ok(())
    }
}

pub async fn run(config: VaultConfig) -> Result<()> {
    info!("daemon starting");

    let services = Arc::new(Services::build(&config)?);

    match yvault_storage::check_health(&services.operator).await {
        Ok(()) => info!(backend = ?config.storage.backend, "storage: connected"),
        Err(e) => warn!(backend = ?config.storage.backend, "storage: {e}"),
    }

    let mut registry = Registry::default();
    let metrics = DaemonMetrics::new(&mut registry);
    if let Some(addr) = config.server.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            operator: services.operator.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_loop(
        services.clone(),
        metrics,
        Duration::from_secs(config.server.sweep_interval_secs.max(1)),
        cancel.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!("sweeper task ended abnormally: {e}");
    }

    services.store.flush().context("final state flush")?;
    info!("daemon exiting cleanly");
    Ok(())
}

async fn sweep_loop(
    services: Arc<Services>,
    metrics: DaemonMetrics,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("sweeper cancelled");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = services.sweep(&metrics).await {
                    metrics.sweep_failures.inc();
                    warn!("sweep failed: {e:#}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yvault_core::{User, UserId, UNLIMITED};
    use yvault_transfer::{SendUpload, UploadTarget};

    fn memory_config(dir: &std::path::Path) -> VaultConfig {
        let mut config = VaultConfig::default();
        config.storage.backend = BackendKind::Memory;
        config.state.db_path = dir.join("state.json");
        config.transfer.chunk_size = 16;
        config
    }

    #[tokio::test]
    async fn test_sweep_purges_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let config = memory_config(dir.path());
        let services = Services::build(&config).unwrap();
        let mut registry = Registry::default();
        let metrics = DaemonMetrics::new(&mut registry);

        let alice = UserId::new("alice");
        services
            .store
            .insert_user(User::new("alice", UNLIMITED, UNLIMITED))
            .unwrap();
        let send = services
            .coordinator
            .init_send_upload(
                &alice,
                SendUpload {
                    name: "n".into(),
                    salt: Vec::new(),
                    size: 4,
                    chunk_count: 1,
                    downloads: 1,
                    expiry_days: 1,
                },
            )
            .unwrap();
        services
            .coordinator
            .upload_chunk(&alice, &UploadTarget::Send(send.id.clone()), 1, vec![0u8; 44])
            .await
            .unwrap();
        services
            .store
            .update_send(&send.id, &mut |s: &mut yvault_core::SendObject| s.expires_at = 0)
            .unwrap();

        services.sweep(&metrics).await.unwrap();

        assert!(services.store.send(&send.id).unwrap().is_none());
        assert_eq!(metrics.sweeps.get(), 1);
        assert_eq!(metrics.sends_purged.get(), 1);
        assert_eq!(metrics.deletions_flushed.get(), 1);
        assert!(dir.path().join("state.json").exists());
    }

    #[test]
    fn test_local_backend_builds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config(dir.path());
        config.storage.backend = BackendKind::Local;
        config.storage.root = dir.path().join("objects");
        assert!(Services::build(&config).is_ok());
    }
}
