//! Sighting intake endpoint.
//!
//! Out-of-process transport adapters post every raw sighting here. The
//! response tells the adapter whether the identity was recognized, so it can
//! mark its own cache entry as confirmed even when the sighting was a
//! suppressed duplicate.
//!
//! Adapters that only need fire-and-forget delivery post batches to
//! `/api/sightings/batch` instead; those go through the bounded intake queue
//! and are answered before the engine sees them.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use proxtrace_core::{DetectionResult, ProxtraceError, Sighting};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the sightings router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(report_sighting))
        .route("/batch", post(queue_sightings))
}

/// Sightings to queue, processed in order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SightingBatch {
    /// Sightings in the order the transport observed them.
    pub sightings: Vec<Sighting>,
}

/// How much of a batch was queued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchQueuedResponse {
    /// Number of sightings accepted into the queue.
    pub queued: usize,
}

/// Report one sighting.
#[utoipa::path(
    post,
    path = "/api/sightings",
    tag = "sightings",
    operation_id = "reportSighting",
    summary = "Report a raw sighting",
    description = "Validates the identity, applies the per-source duplicate window and \
        appends a contact row for every fresh sighting. Invalid identities and \
        duplicates are ordinary results, not errors. A sighting carrying an \
        `endpoint_key` also opens a visibility session for that key.",
    request_body = Sighting,
    responses(
        (status = 200, description = "Sighting processed", body = DetectionResult)
    )
)]
pub async fn report_sighting(
    State(state): State<SharedState>,
    Json(sighting): Json<Sighting>,
) -> Json<DetectionResult> {
    Json(state.engine().report_sighting(sighting).await)
}

/// Queue a batch of sightings for background processing.
#[utoipa::path(
    post,
    path = "/api/sightings/batch",
    tag = "sightings",
    operation_id = "queueSightings",
    summary = "Queue sightings",
    description = "Hands every sighting to the bounded intake queue without waiting for \
        the engine. When the queue fills up, the sightings before the failing one stay \
        queued and the rest of the batch is dropped.",
    request_body = SightingBatch,
    responses(
        (status = 202, description = "Whole batch queued", body = BatchQueuedResponse),
        (status = 503, description = "Queue full or closed", body = ErrorResponse)
    )
)]
pub async fn queue_sightings(
    State(state): State<SharedState>,
    Json(batch): Json<SightingBatch>,
) -> ApiResult<(StatusCode, Json<BatchQueuedResponse>)> {
    let intake = state.context().intake();
    let total = batch.sightings.len();
    for (queued, sighting) in batch.sightings.into_iter().enumerate() {
        if let Err(e) = intake.submit(sighting) {
            tracing::warn!(queued, total, error = %e, "Sighting batch cut short");
            return Err(ProxtraceError::from(e).into());
        }
    }
    Ok((StatusCode::ACCEPTED, Json(BatchQueuedResponse { queued: total })))
}
