//! OpenAPI specification generation for the proxtrace API.
//!
//! The generated document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for transport adapter authors.

use axum::Json;
use utoipa::OpenApi;

use proxtrace_core::{
    ContactRecord, DetectionResult, DetectionStatus, IdentityRejection, SessionDuration,
    Sighting, SightingSource,
};

use super::contacts::{ContactsResponse, SweepResponse, WipeResponse};
use super::detection::{ExtendRequest, StopDetectionResponse};
use super::endpoints::{
    EndpointLostRequest, EndpointLostResponse, EndpointSeenRequest, EndpointSeenResponse,
    SessionChange,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::sightings::{BatchQueuedResponse, SightingBatch};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for proxtrace.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxtrace API",
        version = "0.1.0",
        description = r#"
# proxtrace API

proxtrace turns noisy, repeated proximity sightings from several radio
transports into a deduplicated, duration-annotated contact history.

## Overview

Transport adapters (Bluetooth, BLE, beacons, peer-to-peer messaging) run out of
process and feed this API:

1. **Sightings**: every raw observation of a remote identity. Invalid identities
   are rejected, repeats from the same source within 30 seconds are suppressed,
   and everything else becomes a contact row.
2. **Endpoints**: enter and exit events for transport-local handles, used to
   compute how long a peer stayed in range.
3. **Detection**: the duty cycle deciding when transports should be scanning.

## Timestamps

All timestamps are milliseconds since the Unix epoch.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local proxtrace server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "sightings", description = "Raw sighting intake"),
        (name = "endpoints", description = "Endpoint visibility sessions"),
        (name = "contacts", description = "Recorded contact history, retention and wipe"),
        (name = "detection", description = "Detection duty cycle")
    ),
    paths(
        super::health::health_check,
        super::sightings::report_sighting,
        super::sightings::queue_sightings,
        super::endpoints::endpoint_seen,
        super::endpoints::endpoint_lost,
        super::contacts::list_contacts,
        super::contacts::recent_contacts,
        super::contacts::sweep_contacts,
        super::contacts::wipe_contacts,
        super::detection::get_status,
        super::detection::start_service,
        super::detection::stop_detection,
        super::detection::extend_window,
        super::detection::push_received,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            Sighting,
            SightingSource,
            DetectionResult,
            IdentityRejection,
            SightingBatch,
            BatchQueuedResponse,
            EndpointSeenRequest,
            EndpointSeenResponse,
            EndpointLostRequest,
            EndpointLostResponse,
            SessionChange,
            SessionDuration,
            ContactRecord,
            ContactsResponse,
            SweepResponse,
            WipeResponse,
            DetectionStatus,
            ExtendRequest,
            StopDetectionResponse,
        )
    )
)]
pub struct ApiDoc;
