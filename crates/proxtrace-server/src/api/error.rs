//! API error type and its JSON rendering.
//!
//! Handlers fail with an [`ApiError`]: a status code plus a machine-readable
//! code. Core errors convert through their own status and code classification,
//! so the mapping lives in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use proxtrace_core::ProxtraceError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// An error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "service_not_running",
    "message": "Detection service is not running"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_identity").
    #[schema(example = "service_not_running")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Detection service is not running")]
    pub message: String,
}

impl ApiError {
    /// An error with an explicit status.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// 400 with the given code.
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                code = %self.code,
                message = %self.message,
                "Request failed"
            );
        }
        let body = ErrorResponse {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ProxtraceError> for ApiError {
    fn from(err: ProxtraceError) -> Self {
        let status = StatusCode::from_u16(err.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.error_code().to_ascii_lowercase(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("invalid_identity", "Identity is too short");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("invalid_identity"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err = ApiError::from(ProxtraceError::ServiceNotRunning);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "service_not_running");

        let err = ApiError::from(ProxtraceError::IntakeFull);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(ProxtraceError::StorageError("disk full".into()));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "invalid_duration".to_string(),
            message: "duration_secs must be greater than zero".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\":\"invalid_duration\""));
    }
}
