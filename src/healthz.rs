//! Minimal axum liveness/readiness server (SPEC_FULL.md §6), scoped to
//! health checks only — no REST surface for the reconciled resources.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Router};
use kube::Client;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

#[derive(Clone)]
struct AppState {
    client: Client,
}

/// Run the health server until `shutdown` fires. `/healthz` always reports
/// healthy once the process is up; `/readyz` additionally checks that the
/// Kubernetes API server is reachable.
pub async fn run(
    addr: SocketAddr,
    client: Client,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let state = AppState { client };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    let router = with_metrics_route(router);

    info!(%addr, "health server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind health server to {addr}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Config(format!("health server error: {e}")))?;

    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    match state.client.apiserver_version().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> String {
    crate::metrics::render()
}

#[cfg(feature = "metrics")]
fn with_metrics_route(router: Router) -> Router {
    router.route("/metrics", get(metrics_handler))
}

#[cfg(not(feature = "metrics"))]
fn with_metrics_route(router: Router) -> Router {
    router
}
