//! Health Check Server - Liveness, Readiness and Metrics
//!
//! Exposes /live, /ready and (optionally) /metrics via axum 0.7.
//! Readiness depends on repository health and on the desk still
//! accepting events (it flips to 503 during graceful shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use super::prometheus::MetricsRegistry;

/// Shared health state polled by readiness probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Last repository probe result.
    pub repository_healthy: Arc<AtomicBool>,
    /// Cleared once shutdown begins.
    pub accepting: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state (all healthy by default).
    pub fn new() -> Self {
        Self {
            repository_healthy: Arc::new(AtomicBool::new(true)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check if the desk is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        self.repository_healthy.load(Ordering::Relaxed) && self.accepting.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct AppState {
    health: Arc<HealthState>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    health: Arc<HealthState>,
    metrics: Option<Arc<MetricsRegistry>>,
    port: u16,
}

impl HealthServer {
    /// Create a new health server. `/metrics` is served only when a
    /// registry is given.
    pub fn new(health: Arc<HealthState>, metrics: Option<Arc<MetricsRegistry>>, port: u16) -> Self {
        Self {
            health,
            metrics,
            port,
        }
    }

    /// Build the router without binding, for tests and embedding.
    pub fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness));
        if self.metrics.is_some() {
            app = app.route("/metrics", get(Self::metrics));
        }
        app.with_state(AppState {
            health: Arc::clone(&self.health),
            metrics: self.metrics.clone(),
        })
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, metrics = self.metrics.is_some(), "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 200 only if the repository is healthy and the
    /// desk is not shutting down.
    async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
        if state.health.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
        let Some(metrics) = state.metrics else {
            return (StatusCode::NOT_FOUND, String::new());
        };
        match metrics.render() {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                warn!(error = %e, "Failed to render metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_requires_both_flags() {
        let health = HealthState::new();
        assert!(health.is_ready());

        health.repository_healthy.store(false, Ordering::Relaxed);
        assert!(!health.is_ready());

        health.repository_healthy.store(true, Ordering::Relaxed);
        health.accepting.store(false, Ordering::Relaxed);
        assert!(!health.is_ready());
    }
}
