//! Endpoint visibility events.
//!
//! Transports report when a peer handle (MAC address, endpoint id) comes into
//! and goes out of range. Session durations computed from these events are
//! written back to the matching contact row.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use proxtrace_core::{SeenOutcome, SessionDuration, Timestamp};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the endpoints router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/seen", post(endpoint_seen))
        .route("/lost", post(endpoint_lost))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// An endpoint became visible.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "endpoint_key": "AA:BB:CC:DD:EE:FF",
    "identity": "nov20-abc123456789",
    "timestamp": 1_700_000_000_000_i64
}))]
pub struct EndpointSeenRequest {
    /// Transport-local handle.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub endpoint_key: String,

    /// Identity the endpoint resolved to.
    #[schema(example = "nov20-abc123456789")]
    pub identity: String,

    /// When it was seen (ms since epoch). Defaults to now.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// What happened to the endpoint's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionChange {
    /// A new session was opened.
    Opened,
    /// The session was already open for this identity.
    AlreadyOpen,
    /// The endpoint changed identity; the previous session was closed.
    Replaced,
}

/// Result of an endpoint-seen event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointSeenResponse {
    /// What happened to the session.
    pub session: SessionChange,

    /// The session closed because the endpoint changed identity.
    pub closed: Option<SessionDuration>,
}

/// An endpoint went out of range.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "endpoint_key": "AA:BB:CC:DD:EE:FF",
    "timestamp": 1_700_000_060_000_i64
}))]
pub struct EndpointLostRequest {
    /// Transport-local handle.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub endpoint_key: String,

    /// When it was lost (ms since epoch). Defaults to now.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Result of an endpoint-lost event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointLostResponse {
    /// The closed session, or null if none was open for the key.
    pub closed: Option<SessionDuration>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Record that an endpoint is visible.
#[utoipa::path(
    post,
    path = "/api/endpoints/seen",
    tag = "endpoints",
    operation_id = "endpointSeen",
    summary = "Report an endpoint as visible",
    description = "Opens a session for the endpoint key unless one is already open for \
        the same identity. If the key now resolves to a different identity, the \
        previous session is closed and its duration stored.",
    request_body = EndpointSeenRequest,
    responses(
        (status = 200, description = "Session updated", body = EndpointSeenResponse),
        (status = 400, description = "Identity is not well formed", body = ErrorResponse)
    )
)]
pub async fn endpoint_seen(
    State(state): State<SharedState>,
    Json(request): Json<EndpointSeenRequest>,
) -> ApiResult<Json<EndpointSeenResponse>> {
    let engine = state.engine();
    engine
        .validator()
        .check(&request.identity)
        .map_err(|reason| ApiError::bad_request("invalid_identity", reason.to_string()))?;

    let timestamp = request.timestamp.unwrap_or_else(|| engine.now());
    let outcome = engine
        .endpoint_seen(&request.endpoint_key, &request.identity, timestamp)
        .ok_or_else(|| ApiError::bad_request("invalid_identity", "identity is not well formed"))?;

    let response = match outcome {
        SeenOutcome::Opened => EndpointSeenResponse {
            session: SessionChange::Opened,
            closed: None,
        },
        SeenOutcome::AlreadyOpen => EndpointSeenResponse {
            session: SessionChange::AlreadyOpen,
            closed: None,
        },
        SeenOutcome::Replaced(previous) => EndpointSeenResponse {
            session: SessionChange::Replaced,
            closed: Some(previous),
        },
    };
    Ok(Json(response))
}

/// Record that an endpoint went out of range.
#[utoipa::path(
    post,
    path = "/api/endpoints/lost",
    tag = "endpoints",
    operation_id = "endpointLost",
    summary = "Report an endpoint as lost",
    description = "Closes the endpoint's session and stores its final duration on the \
        contact row recorded when the session opened. Unknown keys are not an error.",
    request_body = EndpointLostRequest,
    responses(
        (status = 200, description = "Session closed if one was open", body = EndpointLostResponse)
    )
)]
pub async fn endpoint_lost(
    State(state): State<SharedState>,
    Json(request): Json<EndpointLostRequest>,
) -> Json<EndpointLostResponse> {
    let engine = state.engine();
    let timestamp = request.timestamp.unwrap_or_else(|| engine.now());
    Json(EndpointLostResponse {
        closed: engine.endpoint_lost(&request.endpoint_key, timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_request_timestamp_is_optional() {
        let json = r#"{"endpoint_key": "endpoint-7", "identity": "nov20-abc123456789"}"#;
        let request: EndpointSeenRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.timestamp, None);
    }

    #[test]
    fn test_session_change_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionChange::AlreadyOpen).unwrap(),
            "\"already_open\""
        );
    }
}
