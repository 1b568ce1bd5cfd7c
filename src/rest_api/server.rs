//! Axum HTTP servers for probes and metrics

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    match encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {}", e),
        ),
    }
}

async fn ping() -> &'static str {
    "ok"
}

pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

pub fn probe_router() -> Router {
    Router::new()
        .route("/healthz", get(ping))
        .route("/readyz", get(ping))
}

async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error on {}: {}", addr, e)))
}

/// Run the metrics and health probe servers until one of them fails
pub async fn run_server(metrics_addr: SocketAddr, probe_addr: SocketAddr) -> Result<()> {
    info!("Metrics server listening on {}", metrics_addr);
    info!("Health probe server listening on {}", probe_addr);

    tokio::try_join!(
        serve(metrics_addr, metrics_router()),
        serve(probe_addr, probe_router())
    )?;

    Ok(())
}
