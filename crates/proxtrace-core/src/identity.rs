//! Identity format validation.
//!
//! An identity is accepted when it starts with the configured prefix and its
//! total length (prefix included) lies within `min_length..=max_length`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::DetectionConfig;

/// Why a raw identity or payload was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdentityRejection {
    /// Does not start with the configured prefix.
    #[error("identity does not start with the configured prefix")]
    MissingPrefix,

    /// Shorter than `min_length`.
    #[error("identity is shorter than the minimum length")]
    TooShort,

    /// Longer than `max_length`.
    #[error("identity is longer than the maximum length")]
    TooLong,

    /// Characteristic payload was empty.
    #[error("payload is empty")]
    EmptyPayload,

    /// Characteristic payload is not UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidEncoding,

    /// Characteristic payload carries the prefix more than once.
    #[error("payload contains the identity prefix more than once")]
    RepeatedPayload,
}

/// Check `raw` against `config`. Pure and total.
#[must_use]
pub fn validate(raw: &str, config: &DetectionConfig) -> bool {
    check(raw, config).is_ok()
}

/// Like [`validate`] but names the failed rule.
///
/// # Errors
///
/// Returns the first rule `raw` breaks.
pub fn check(raw: &str, config: &DetectionConfig) -> Result<(), IdentityRejection> {
    if !raw.starts_with(&config.prefix) {
        return Err(IdentityRejection::MissingPrefix);
    }
    let length = raw.chars().count();
    if length > config.max_length {
        return Err(IdentityRejection::TooLong);
    }
    if length < config.min_length {
        return Err(IdentityRejection::TooShort);
    }
    Ok(())
}

/// Validator bound to one identity format.
#[derive(Debug, Clone)]
pub struct IdentityValidator {
    config: DetectionConfig,
}

impl IdentityValidator {
    /// Create a validator for `config`.
    #[must_use]
    pub const fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// The format this validator enforces.
    #[must_use]
    pub const fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// `true` if `raw` is a well-formed identity.
    #[must_use]
    pub fn validate(&self, raw: &str) -> bool {
        validate(raw, &self.config)
    }

    /// Check `raw`, naming the failed rule.
    ///
    /// # Errors
    ///
    /// Returns the first rule `raw` breaks.
    pub fn check(&self, raw: &str) -> Result<(), IdentityRejection> {
        check(raw, &self.config)
    }

    /// Decode a GATT characteristic payload into an identity.
    ///
    /// Trailing NUL padding and whitespace are ignored. Payloads repeating the
    /// prefix are refused outright rather than cut down to one copy.
    ///
    /// # Errors
    ///
    /// Returns why the payload is not a usable identity.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<String, IdentityRejection> {
        let text = std::str::from_utf8(payload).map_err(|_| IdentityRejection::InvalidEncoding)?;
        let text = text.trim_end_matches('\0').trim();
        if text.is_empty() {
            return Err(IdentityRejection::EmptyPayload);
        }
        if text.matches(self.config.prefix.as_str()).count() > 1 {
            return Err(IdentityRejection::RepeatedPayload);
        }
        self.check(text)?;
        Ok(text.to_string())
    }
}
