use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the execution engine's event stream is connected.
    pub engine_connected: bool,
    /// Jobs waiting behind the running one.
    pub queue_length: usize,
    /// Id of the running job, if any.
    pub running: Option<String>,
}

/// GET /health -- returns service and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_connected = state.engine.is_connected();

    let status = if engine_connected { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        engine_connected,
        queue_length: state.broker.queue_len().await,
        running: state.broker.running_job_id().await.map(|id| id.to_string()),
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
