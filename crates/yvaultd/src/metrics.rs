//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  liveness probe (always 200 while the process runs)
//!   GET /readyz   readiness probe (200 if the backend store answers)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry as PRegistry;
use std::sync::Arc;

pub type Registry = PRegistry;

/// Sweeper counters
#[derive(Clone, Default)]
pub struct DaemonMetrics {
    pub sweeps: Counter,
    pub sweep_failures: Counter,
    pub sends_purged: Counter,
    pub deletions_flushed: Counter,
    pub deletions_requeued: Counter,
    pub visitors_tracked: Gauge,
}

impl DaemonMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "yvault_sweeps",
            "Sweeper passes completed",
            metrics.sweeps.clone(),
        );
        registry.register(
            "yvault_sweep_failures",
            "Sweeper passes that returned an error",
            metrics.sweep_failures.clone(),
        );
        registry.register(
            "yvault_sends_purged",
            "Send objects deleted after expiry",
            metrics.sends_purged.clone(),
        );
        registry.register(
            "yvault_deletions_flushed",
            "Backend objects deleted from the deletion queue",
            metrics.deletions_flushed.clone(),
        );
        registry.register(
            "yvault_deletions_requeued",
            "Backend deletions that failed and were queued again",
            metrics.deletions_requeued.clone(),
        );
        registry.register(
            "yvault_visitors_tracked",
            "Visitor rate-limit buckets currently held",
            metrics.visitors_tracked.clone(),
        );
        metrics
    }
}

/// Shared state of the HTTP endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: opendal::Operator,
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9110")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if yvault_storage::is_healthy(&state.operator).await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable")
    }
}
