//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Liveness report with a summary of detection state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "uptime_seconds": 3600,
    "service_running": true,
    "detecting": true,
    "open_sessions": 2
}))]
pub struct HealthResponse {
    /// Always `ok` when the server answers.
    #[schema(example = "ok")]
    pub status: String,

    /// Crate version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Seconds since the server started.
    pub uptime_seconds: u64,

    /// Whether the detection service is started.
    pub service_running: bool,

    /// Whether transports are currently detecting.
    pub detecting: bool,

    /// Endpoint sessions currently open.
    pub open_sessions: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Report liveness.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let detection = state.controller().status();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        service_running: detection.service_running,
        detecting: detection.detecting,
        open_sessions: detection.open_sessions,
    })
}
