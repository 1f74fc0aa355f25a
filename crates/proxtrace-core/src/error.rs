//! Unified error types for the proxtrace core library.
//!
//! This module provides a unified error type [`ProxtraceError`] covering the
//! failure modes that can surface from the crate's fallible entry points. Each
//! module also has its own specific error type (`ConfigError`, `StoreError`,
//! `IntakeError`) for internal use.
//!
//! The sighting hot path never returns any of these: invalid identities and
//! duplicates are ordinary [`DetectionResult`](crate::types::DetectionResult)
//! values, and storage failures inside background writes are logged.
//!
//! # Example
//!
//! ```rust
//! use proxtrace_core::error::{ProxtraceError, Result};
//! use std::path::PathBuf;
//!
//! fn require_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(ProxtraceError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all proxtrace operations.
#[derive(Debug, Error)]
pub enum ProxtraceError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A collaborator required at build time was not supplied.
    #[error("Missing dependency: {0} must be configured before detection can start")]
    MissingDependency(&'static str),

    /// Timers and background writes need a Tokio runtime.
    #[error("No Tokio runtime is available. Build the detection context from within a runtime.")]
    NoRuntime,

    // =========================================================================
    // STORAGE ERRORS
    // =========================================================================
    /// The contact store failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    // =========================================================================
    // INTAKE ERRORS
    // =========================================================================
    /// The sighting queue is full.
    #[error("Sighting intake queue is full; the sighting was dropped")]
    IntakeFull,

    /// The sighting worker has shut down.
    #[error("Sighting intake is closed")]
    IntakeClosed,

    // =========================================================================
    // DETECTION LIFECYCLE
    // =========================================================================
    /// Detection was requested while the service is stopped.
    #[error("Detection service is not running. Start the service first.")]
    ServiceNotRunning,

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for proxtrace operations.
pub type Result<T> = std::result::Result<T, ProxtraceError>;

impl ProxtraceError {
    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::MissingDependency(_)
                | Self::NoRuntime
        )
    }

    /// Returns `true` if this error is related to storage or I/O.
    #[inline]
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(self, Self::StorageError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error is related to the sighting intake.
    #[inline]
    #[must_use]
    pub const fn is_intake_error(&self) -> bool {
        matches!(self, Self::IntakeFull | Self::IntakeClosed)
    }

    /// Returns `true` if this error represents an expected operational state.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::ServiceNotRunning)
    }

    /// Returns `true` if retrying later is likely to succeed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::IntakeFull | Self::StorageError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - refused in the current state
            Self::ServiceNotRunning => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::MissingDependency(_) | Self::NoRuntime | Self::StorageError(_) | Self::IoError(_) => {
                500
            }

            // 503 Service Unavailable - back-pressure or shutdown
            Self::IntakeFull | Self::IntakeClosed => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::MissingDependency(_) => "MISSING_DEPENDENCY",
            Self::NoRuntime => "NO_RUNTIME",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::IntakeFull => "INTAKE_FULL",
            Self::IntakeClosed => "INTAKE_CLOSED",
            Self::ServiceNotRunning => "SERVICE_NOT_RUNNING",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for ProxtraceError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::WriteError { path, source } => {
                Self::StorageError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            err @ ConfigError::ValidationError { .. } => {
                Self::ConfigValidationError(err.to_string())
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StoreError> for ProxtraceError {
    fn from(err: crate::storage::StoreError) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<crate::intake::IntakeError> for ProxtraceError {
    fn from(err: crate::intake::IntakeError) -> Self {
        use crate::intake::IntakeError;
        match err {
            IntakeError::Full => Self::IntakeFull,
            IntakeError::Closed => Self::IntakeClosed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
