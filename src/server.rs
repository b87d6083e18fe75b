//! # HTTP Server
//!
//! HTTP server for metrics and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (200 while the reconciliation loop runs)
//! - `/readyz` - Readiness probe (200 when Vault answers within the probe deadline)
//!
//! The server listens on port 8080 by default (configurable via `METRICS_PORT`).

use crate::health::HealthChecker;
use crate::observability::metrics::REGISTRY;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ServerState {
    pub health: HealthChecker,
    pub probe_timeout: Duration,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Bind the probe port on all interfaces
///
/// # Errors
///
/// Fails when the port cannot be bound.
pub async fn bind(port: u16) -> Result<TcpListener, anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    Ok(listener)
}

/// Serve probes and metrics on an already bound listener
///
/// # Errors
///
/// Fails when the server stops on an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.health.liveness() {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            debug!("Liveness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.health.readiness(state.probe_timeout).await {
        Ok(()) => (StatusCode::OK, String::from("ok")),
        Err(e) => {
            debug!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthError, StatusProbe};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    struct Probe(bool);

    #[async_trait]
    impl StatusProbe for Probe {
        async fn check(&self) -> Result<(), HealthError> {
            if self.0 {
                Ok(())
            } else {
                Err(HealthError::DeadlineExceeded(Duration::from_secs(1)))
            }
        }
    }

    fn app(alive: bool, ready: bool) -> Router {
        router(Arc::new(ServerState {
            health: HealthChecker::new(Arc::new(AtomicBool::new(alive)), Arc::new(Probe(ready))),
            probe_timeout: Duration::from_secs(1),
        }))
    }

    async fn status(app: Router, path: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_healthz_follows_loop_state() {
        assert_eq!(status(app(true, false), "/healthz").await, StatusCode::OK);
        assert_eq!(
            status(app(false, true), "/healthz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_readyz_follows_probe() {
        assert_eq!(status(app(true, true), "/readyz").await, StatusCode::OK);
        assert_eq!(
            status(app(true, false), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        assert_eq!(status(app(true, true), "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bound_listener_serves_probes() {
        crate::runtime::initialization::install_crypto_provider();
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            health: HealthChecker::new(Arc::new(AtomicBool::new(true)), Arc::new(Probe(true))),
            probe_timeout: Duration::from_secs(1),
        });
        let server = tokio::spawn(serve(listener, state));

        let response = reqwest::get(format!("http://127.0.0.1:{}/healthz", addr.port()))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        server.abort();
    }

    #[tokio::test]
    async fn test_taken_port_fails_bind() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(bind(port).await.is_err());
    }
}
