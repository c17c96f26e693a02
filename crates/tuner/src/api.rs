//! HTTP API for search progress and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};
use tuner_lib::ProgressBoard;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub progress: ProgressBoard,
}

impl AppState {
    pub fn new(progress: ProgressBoard) -> Self {
        Self { progress }
    }
}

/// 200 while the search is alive, 503 once it has failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.progress.snapshot().await;
    let status_code = if state.progress.is_healthy().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "phase": snapshot.phase,
            "message": snapshot.message,
        })),
    )
}

/// Full progress snapshot
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.progress.snapshot().await)
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
