//! Contact history endpoints.
//!
//! The contact history is an append log: one row per accepted sighting, with a
//! duration filled in once the sighting's session closes. Rows older than the
//! retention period are removed by the sweep, which also runs whenever the
//! detection service starts.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use proxtrace_core::{ContactRecord, Timestamp};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the contacts router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_contacts).delete(wipe_contacts))
        .route("/recent", get(recent_contacts))
        .route("/sweep", post(sweep_contacts))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing contacts.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ContactsQuery {
    /// Only rows seen strictly after this time (ms since epoch).
    /// Defaults to the beginning of time.
    #[param(example = 1_700_000_000_000_i64)]
    pub since_ms: Option<Timestamp>,
}

/// A list of contact rows, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContactsResponse {
    /// Number of rows returned.
    #[schema(example = 1)]
    pub count: usize,

    /// The rows, newest first.
    pub contacts: Vec<ContactRecord>,
}

impl From<Vec<ContactRecord>> for ContactsResponse {
    fn from(contacts: Vec<ContactRecord>) -> Self {
        Self {
            count: contacts.len(),
            contacts,
        }
    }
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    /// Rows deleted.
    #[schema(example = 12)]
    pub removed: usize,
}

/// Result of a full wipe.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WipeResponse {
    /// Whether all contact data was removed.
    #[schema(example = true)]
    pub wiped: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List contact rows.
#[utoipa::path(
    get,
    path = "/api/contacts",
    tag = "contacts",
    operation_id = "listContacts",
    summary = "List recorded contacts",
    params(ContactsQuery),
    responses(
        (status = 200, description = "Contact rows", body = ContactsResponse),
        (status = 500, description = "Store could not be read", body = ErrorResponse)
    )
)]
pub async fn list_contacts(
    State(state): State<SharedState>,
    Query(query): Query<ContactsQuery>,
) -> ApiResult<Json<ContactsResponse>> {
    let since = query.since_ms.unwrap_or(Timestamp::MIN);
    let contacts = state.engine().contacts_since(since).await?;
    Ok(Json(contacts.into()))
}

/// List contact rows inside the report window.
#[utoipa::path(
    get,
    path = "/api/contacts/recent",
    tag = "contacts",
    operation_id = "recentContacts",
    summary = "List contacts in the report window",
    description = "Returns the rows a self-report would upload: everything seen within \
        the configured report window (3 days by default).",
    responses(
        (status = 200, description = "Contact rows", body = ContactsResponse),
        (status = 500, description = "Store could not be read", body = ErrorResponse)
    )
)]
pub async fn recent_contacts(
    State(state): State<SharedState>,
) -> ApiResult<Json<ContactsResponse>> {
    let contacts = state.engine().recent_contacts().await?;
    Ok(Json(contacts.into()))
}

/// Delete rows older than the retention period.
#[utoipa::path(
    post,
    path = "/api/contacts/sweep",
    tag = "contacts",
    operation_id = "sweepContacts",
    summary = "Run the retention sweep",
    responses(
        (status = 200, description = "Sweep finished", body = SweepResponse),
        (status = 500, description = "Store could not be written", body = ErrorResponse)
    )
)]
pub async fn sweep_contacts(State(state): State<SharedState>) -> ApiResult<Json<SweepResponse>> {
    let removed = state.engine().sweep_retention().await?;
    Ok(Json(SweepResponse { removed }))
}

/// Forget every contact.
#[utoipa::path(
    delete,
    path = "/api/contacts",
    tag = "contacts",
    operation_id = "wipeContacts",
    summary = "Wipe all contact data",
    description = "Deletes every stored row and forgets duplicate and new-contact state, \
        so the next sighting of any identity counts as a new contact again.",
    responses(
        (status = 200, description = "All contact data removed", body = WipeResponse),
        (status = 500, description = "Store could not be wiped", body = ErrorResponse)
    )
)]
pub async fn wipe_contacts(State(state): State<SharedState>) -> ApiResult<Json<WipeResponse>> {
    state.engine().wipe_all().await?;
    Ok(Json(WipeResponse { wiped: true }))
}
