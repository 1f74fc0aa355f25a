//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `sightings` - Raw sighting intake
//! - `endpoints` - Endpoint seen/lost events and session durations
//! - `contacts` - Contact history, retention sweep, and wipe
//! - `detection` - Detection duty cycle
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod contacts;
pub mod detection;
pub mod endpoints;
pub mod error;
pub mod health;
pub mod openapi;
pub mod sightings;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /sightings         - Report a raw sighting
/// ├── /endpoints         - Endpoint seen / lost
/// ├── /contacts          - List, recent, sweep, wipe
/// ├── /detection         - Status, start, stop, extend, push
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/sightings", sightings::router())
                .nest("/endpoints", endpoints::router())
                .nest("/contacts", contacts::router())
                .nest("/detection", detection::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::state::{test_state, test_state_with_intake_capacity};

    const ID: &str = "nov20-abc123456789";

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(test_state());
        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_sighting_flow() {
        let router = create_router(test_state());
        let sighting = |timestamp: i64| {
            json!({ "identity": ID, "source": "ble_client", "timestamp": timestamp })
        };

        let (status, body) =
            call(&router, Method::POST, "/api/sightings", Some(sighting(1_000))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "result": "accepted", "is_new_contact": true }));

        let (_, body) =
            call(&router, Method::POST, "/api/sightings", Some(sighting(5_000))).await;
        assert_eq!(body["result"], "suppressed_duplicate");

        let (_, body) =
            call(&router, Method::POST, "/api/sightings", Some(sighting(40_000))).await;
        assert_eq!(body, json!({ "result": "accepted", "is_new_contact": false }));

        let (_, body) = call(
            &router,
            Method::POST,
            "/api/sightings",
            Some(json!({ "identity": "nov20-x", "timestamp": 1 })),
        )
        .await;
        assert_eq!(body, json!({ "result": "rejected", "reason": "too_short" }));
    }

    #[tokio::test]
    async fn test_sighting_batch_is_queued_and_processed() {
        let state = test_state();
        let router = create_router(state.clone());
        let batch = json!({ "sightings": [
            { "identity": ID, "source": "ble_name", "timestamp": 1_000 },
            { "identity": ID, "source": "nearby_messages", "timestamp": 2_000 },
            { "identity": "nov20-x", "timestamp": 3_000 }
        ]});

        let (status, body) = call(&router, Method::POST, "/api/sightings/batch", Some(batch)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queued"], 3);

        let mut stored = 0;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            state.engine().wait_for_writes().await;
            let (_, body) = call(&router, Method::GET, "/api/contacts", None).await;
            stored = body["count"].as_u64().unwrap();
            if stored == 2 {
                break;
            }
        }
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn test_full_sighting_queue_is_unavailable() {
        let router = create_router(test_state_with_intake_capacity(1));
        let batch = json!({ "sightings": [
            { "identity": ID, "timestamp": 1_000 },
            { "identity": ID, "timestamp": 40_000 }
        ]});

        let (status, body) = call(&router, Method::POST, "/api/sightings/batch", Some(batch)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "intake_full");
    }

    #[tokio::test]
    async fn test_endpoint_session_updates_contact_row() {
        let state = test_state();
        let router = create_router(state.clone());

        call(
            &router,
            Method::POST,
            "/api/sightings",
            Some(json!({
                "identity": ID,
                "source": "nearby_connections",
                "timestamp": 1_000,
                "endpoint_key": "endpoint-7"
            })),
        )
        .await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/endpoints/lost",
            Some(json!({ "endpoint_key": "endpoint-7", "timestamp": 31_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["closed"]["duration"], 30_000);

        state.engine().wait_for_writes().await;
        let (_, body) = call(&router, Method::GET, "/api/contacts?since_ms=0", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["contacts"][0]["duration"], 30_000);
    }

    #[tokio::test]
    async fn test_endpoint_seen_rejects_bad_identity() {
        let router = create_router(test_state());
        let (status, body) = call(
            &router,
            Method::POST,
            "/api/endpoints/seen",
            Some(json!({ "endpoint_key": "AA:BB", "identity": "someone-else-entirely" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_identity");

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/endpoints/seen",
            Some(json!({ "endpoint_key": "AA:BB", "identity": ID, "timestamp": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"], "opened");
    }

    #[tokio::test]
    async fn test_detection_lifecycle() {
        let router = create_router(test_state());

        let (status, body) = call(&router, Method::POST, "/api/detection/push", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "service_not_running");

        let (status, body) = call(&router, Method::POST, "/api/detection/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service_running"], true);
        assert_eq!(body["detecting"], true);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/detection/extend",
            Some(json!({ "duration_secs": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/detection/extend",
            Some(json!({ "duration_secs": u64::MAX })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_duration");

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/detection/extend",
            Some(json!({ "duration_secs": 604_800 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let remaining_ms = body["remaining_ms"].as_u64().unwrap();
        assert!(remaining_ms > 600_000_000 && remaining_ms <= 604_800_000);

        let (status, body) = call(&router, Method::POST, "/api/detection/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["detecting"], false);
        assert_eq!(body["status"]["remaining_ms"], Value::Null);

        let (_, body) = call(&router, Method::GET, "/api/detection", None).await;
        assert_eq!(body["service_running"], true);
    }

    #[tokio::test]
    async fn test_wipe_and_sweep() {
        let state = test_state();
        let router = create_router(state.clone());
        call(
            &router,
            Method::POST,
            "/api/sightings",
            Some(json!({ "identity": ID, "timestamp": 1_000 })),
        )
        .await;
        state.engine().wait_for_writes().await;

        let (status, body) = call(&router, Method::POST, "/api/contacts/sweep", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 0);

        let (status, body) = call(&router, Method::DELETE, "/api/contacts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wiped"], true);

        let (_, body) = call(&router, Method::GET, "/api/contacts", None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_openapi_route() {
        let router = create_router(test_state());
        let (status, body) = call(&router, Method::GET, "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "proxtrace API");
    }
}
