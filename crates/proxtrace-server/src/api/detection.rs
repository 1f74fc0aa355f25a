//! Detection duty cycle endpoints.
//!
//! Detection runs in windows. Starting the service opens the first window;
//! pushes and explicit extensions keep it open for at least their timeout,
//! and the window closes when the latest deadline passes.

use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use proxtrace_core::{DetectionStatus, SessionDuration, MAX_COUNTDOWN};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the detection router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_status))
        .route("/start", post(start_service))
        .route("/stop", post(stop_detection))
        .route("/extend", post(extend_window))
        .route("/push", post(push_received))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for extending the detection window.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "duration_secs": 300 }))]
pub struct ExtendRequest {
    /// Keep detecting for at least this many seconds from now.
    #[schema(example = 300, minimum = 1, maximum = 604_800)]
    pub duration_secs: u64,
}

/// Response after stopping detection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopDetectionResponse {
    /// Final durations of the sessions that were open.
    pub closed_sessions: Vec<SessionDuration>,

    /// State after stopping.
    pub status: DetectionStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the duty cycle state.
#[utoipa::path(
    get,
    path = "/api/detection",
    tag = "detection",
    operation_id = "getDetectionStatus",
    summary = "Get detection state",
    responses(
        (status = 200, description = "Current state", body = DetectionStatus)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<DetectionStatus> {
    Json(state.controller().status())
}

/// Start the detection service.
#[utoipa::path(
    post,
    path = "/api/detection/start",
    tag = "detection",
    operation_id = "startDetectionService",
    summary = "Start the detection service",
    description = "Marks the service running, switches transports on for the initial \
        timeout and sweeps expired contacts. Starting a running service only \
        extends the window.",
    responses(
        (status = 200, description = "Service running", body = DetectionStatus)
    )
)]
pub async fn start_service(State(state): State<SharedState>) -> Json<DetectionStatus> {
    Json(state.controller().start_service().await)
}

/// Stop detecting now.
#[utoipa::path(
    post,
    path = "/api/detection/stop",
    tag = "detection",
    operation_id = "stopDetection",
    summary = "Stop detection immediately",
    description = "Cancels the pending countdown, switches transports off and closes \
        every open session, storing final durations. The service stays running, so \
        a later push or extension starts detection again.",
    responses(
        (status = 200, description = "Detection stopped", body = StopDetectionResponse)
    )
)]
pub async fn stop_detection(State(state): State<SharedState>) -> Json<StopDetectionResponse> {
    let controller = state.controller();
    let closed_sessions = controller.stop_detection_now();
    Json(StopDetectionResponse {
        closed_sessions,
        status: controller.status(),
    })
}

/// Keep detecting for at least the given duration.
#[utoipa::path(
    post,
    path = "/api/detection/extend",
    tag = "detection",
    operation_id = "extendDetection",
    summary = "Extend the detection window",
    description = "Moves the deadline to the later of the current deadline and now plus \
        the requested duration. Shorter requests never cut a window short.",
    request_body = ExtendRequest,
    responses(
        (status = 200, description = "Window extended", body = DetectionStatus),
        (status = 400, description = "Duration is zero or longer than a week", body = ErrorResponse),
        (status = 409, description = "Service is not running", body = ErrorResponse)
    )
)]
pub async fn extend_window(
    State(state): State<SharedState>,
    Json(request): Json<ExtendRequest>,
) -> ApiResult<Json<DetectionStatus>> {
    let max_secs = MAX_COUNTDOWN.as_secs();
    if request.duration_secs == 0 || request.duration_secs > max_secs {
        return Err(ApiError::bad_request(
            "invalid_duration",
            format!("duration_secs must be between 1 and {max_secs}"),
        ));
    }
    let status = state
        .controller()
        .extend_detection_window(Duration::from_secs(request.duration_secs))?;
    Ok(Json(status))
}

/// A push message asked for detection.
#[utoipa::path(
    post,
    path = "/api/detection/push",
    tag = "detection",
    operation_id = "pushReceived",
    summary = "Handle a detection push",
    description = "Starts detection if needed and keeps it on for the configured push timeout.",
    responses(
        (status = 200, description = "Window extended", body = DetectionStatus),
        (status = 409, description = "Service is not running", body = ErrorResponse)
    )
)]
pub async fn push_received(State(state): State<SharedState>) -> ApiResult<Json<DetectionStatus>> {
    Ok(Json(state.controller().push_received()?))
}
