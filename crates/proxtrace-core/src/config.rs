//! Application configuration management.
//!
//! Handles loading, saving, and validating proxtrace configuration including:
//! - Identity format accepted from remote peers
//! - BLE advertising identifiers handed to transport adapters
//! - Dedup window, session flush and detection timeouts
//! - Contact retention

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::countdown::MAX_COUNTDOWN;

/// Environment variable prefix for overrides, e.g. `PROXTRACE__TIMING__DEDUP_WINDOW_MS`.
pub const ENV_PREFIX: &str = "PROXTRACE";

/// Default prefix every identity must start with.
pub const DEFAULT_IDENTITY_PREFIX: &str = "nvSDK-";

/// Default BLE local name prefix.
pub const DEFAULT_BLE_NAME_PREFIX: &str = "nov20-";

const DEFAULT_APP_UUID: Uuid = Uuid::from_u128(0x8b9b_6576_6db7_11ea_bc55_0242_ac13_0003);
const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xb16e_fb34_6c34_11ea_bc55_0242_ac13_0003);
const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1d45_dc00_6db7_11ea_bc55_0242_ac13_0003);

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The layered sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration values are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Identity format accepted from remote peers.
///
/// Lengths are inclusive bounds on the whole identity, prefix included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Literal prefix every identity starts with.
    pub prefix: String,

    /// Minimum identity length in characters.
    pub min_length: usize,

    /// Maximum identity length in characters.
    pub max_length: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_IDENTITY_PREFIX.to_string(),
            min_length: 15,
            max_length: 23,
        }
    }
}

/// BLE identifiers used by radio adapters. The core only carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleDetectionConfig {
    /// Prefix of the advertised local name.
    pub name_prefix: String,

    /// Application UUID included in advertisements.
    pub app_uuid: Uuid,

    /// GATT service exposing the identity.
    pub service_uuid: Uuid,

    /// GATT characteristic holding the identity payload.
    pub characteristic_uuid: Uuid,
}

impl Default for BleDetectionConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_BLE_NAME_PREFIX.to_string(),
            app_uuid: DEFAULT_APP_UUID,
            service_uuid: DEFAULT_SERVICE_UUID,
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
        }
    }
}

/// Windows, intervals and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minimum gap between two persisted sightings of the same (identity, source).
    pub dedup_window_ms: i64,

    /// Dedup entries older than this are evicted.
    pub dedup_eviction_age_ms: i64,

    /// How often open sessions checkpoint their duration.
    pub session_flush_interval_ms: u64,

    /// Detection time granted when the service starts.
    pub initial_timeout_secs: u64,

    /// Detection time granted by a push message.
    pub push_timeout_secs: u64,

    /// Detection time granted when the host app comes to the foreground.
    pub foreground_timeout_secs: u64,

    /// Capacity of the sighting intake queue.
    pub intake_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 30_000,
            dedup_eviction_age_ms: 600_000,
            session_flush_interval_ms: 60_000,
            initial_timeout_secs: 600,
            push_timeout_secs: 600,
            foreground_timeout_secs: 600,
            intake_capacity: 1024,
        }
    }
}

impl TimingConfig {
    /// Session flush interval as a [`Duration`].
    #[must_use]
    pub const fn session_flush_interval(&self) -> Duration {
        Duration::from_millis(self.session_flush_interval_ms)
    }

    /// Initial detection timeout as a [`Duration`].
    #[must_use]
    pub const fn initial_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_timeout_secs)
    }

    /// Push detection timeout as a [`Duration`].
    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    /// Foreground detection timeout as a [`Duration`].
    #[must_use]
    pub const fn foreground_timeout(&self) -> Duration {
        Duration::from_secs(self.foreground_timeout_secs)
    }
}

/// Contact history retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Rows older than this many days are deleted by a sweep.
    pub max_age_days: u32,

    /// Rows within this many days make up a self-report.
    pub report_window_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: 14,
            report_window_days: 3,
        }
    }
}

impl RetentionConfig {
    /// Maximum row age in milliseconds.
    #[must_use]
    pub fn max_age_ms(&self) -> i64 {
        days_to_ms(self.max_age_days)
    }

    /// Report window in milliseconds.
    #[must_use]
    pub fn report_window_ms(&self) -> i64 {
        days_to_ms(self.report_window_days)
    }
}

fn days_to_ms(days: u32) -> i64 {
    i64::from(days) * 24 * 60 * 60 * 1000
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxtraceConfig {
    /// Identity format.
    pub detection: DetectionConfig,

    /// BLE identifiers.
    pub ble: BleDetectionConfig,

    /// Windows and timeouts.
    pub timing: TimingConfig,

    /// Retention policy.
    pub retention: RetentionConfig,
}

impl ProxtraceConfig {
    /// Load configuration from `path` (optional) layered with `PROXTRACE__*` env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(loaded)
    }

    /// Load configuration from `path`, failing when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist.
    pub fn load_required(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load(path)
    }

    /// Save configuration to `path` as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;
        Ok(())
    }

    /// Check every value, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming each invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let invalid = |field, message: String| ConfigError::ValidationError { field, message };

        let detection = &self.detection;
        if detection.prefix.is_empty() {
            errors.push(invalid("detection.prefix", "must not be empty".into()));
        }
        if detection.min_length > detection.max_length {
            errors.push(invalid(
                "detection.min_length",
                format!(
                    "{} is greater than max_length {}",
                    detection.min_length, detection.max_length
                ),
            ));
        }
        let prefix_len = detection.prefix.chars().count();
        if prefix_len > detection.min_length {
            errors.push(invalid(
                "detection.prefix",
                format!(
                    "length {prefix_len} exceeds min_length {}",
                    detection.min_length
                ),
            ));
        }
        if self.ble.name_prefix.is_empty() {
            errors.push(invalid("ble.name_prefix", "must not be empty".into()));
        }
        if self.timing.dedup_window_ms <= 0 {
            errors.push(invalid("timing.dedup_window_ms", "must be positive".into()));
        }
        if self.timing.dedup_eviction_age_ms < self.timing.dedup_window_ms {
            errors.push(invalid(
                "timing.dedup_eviction_age_ms",
                "must not be shorter than dedup_window_ms".into(),
            ));
        }
        if self.timing.session_flush_interval_ms == 0 {
            errors.push(invalid(
                "timing.session_flush_interval_ms",
                "must be positive".into(),
            ));
        }
        let max_window_secs = MAX_COUNTDOWN.as_secs();
        for (field, secs) in [
            ("timing.initial_timeout_secs", self.timing.initial_timeout_secs),
            ("timing.push_timeout_secs", self.timing.push_timeout_secs),
            ("timing.foreground_timeout_secs", self.timing.foreground_timeout_secs),
        ] {
            if secs == 0 || secs > max_window_secs {
                errors.push(invalid(
                    field,
                    format!("must be between 1 and {max_window_secs} seconds"),
                ));
            }
        }
        if self.timing.intake_capacity == 0 {
            errors.push(invalid("timing.intake_capacity", "must be positive".into()));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Get the default configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration directory can be determined.
    pub fn default_path() -> ConfigResult<PathBuf> {
        // On Linux hosts: /etc/proxtrace/config.toml
        // Elsewhere: the platform config dir
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/proxtrace/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "proxtrace")
                .ok_or_else(|| ConfigError::NotFound("platform config directory".into()))?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let config = ProxtraceConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.detection.prefix, "nvSDK-");
        assert_eq!(config.timing.dedup_window_ms, 30_000);
        assert_eq!(
            config.ble.service_uuid.to_string(),
            "b16efb34-6c34-11ea-bc55-0242ac130003"
        );
    }

    #[test]
    fn test_min_greater_than_max_is_rejected() {
        let mut config = ProxtraceConfig::default();
        config.detection.min_length = 30;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "detection.min_length",
                ..
            }
        ));
    }

    #[test]
    fn test_detection_timeouts_are_bounded() {
        let mut config = ProxtraceConfig::default();
        config.timing.push_timeout_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "timing.push_timeout_secs",
                ..
            }
        ));

        config.timing.push_timeout_secs = MAX_COUNTDOWN.as_secs();
        assert_ok!(config.validate());
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = ProxtraceConfig::default();
        config.detection.prefix = "a-very-long-prefix-".into();
        config.detection.min_length = 5;
        config.detection.max_length = 4;
        config.timing.intake_capacity = 0;
        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ProxtraceConfig::default();
        config.detection.prefix = "nov20-".into();
        config.retention.max_age_days = 21;
        assert_ok!(config.save(&path));

        let loaded = ProxtraceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = ProxtraceConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.detection, DetectionConfig::default());
    }

    #[test]
    fn test_load_required_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ProxtraceConfig::load_required(dir.path().join("absent.toml"));
        assert!(matches!(assert_err!(result), ConfigError::NotFound(_)));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection]\nprefix = \"nov20-\"\n").unwrap();

        let loaded = ProxtraceConfig::load(&path).unwrap();
        assert_eq!(loaded.detection.prefix, "nov20-");
        assert_eq!(loaded.detection.max_length, 23);
        assert_eq!(loaded.timing, TimingConfig::default());
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection]\nmin_length = 40\n").unwrap();

        assert_err!(ProxtraceConfig::load(&path));
    }

    #[test]
    fn test_retention_windows_in_ms() {
        let retention = RetentionConfig::default();
        assert_eq!(retention.report_window_ms(), 3 * 86_400_000);
        assert_eq!(retention.max_age_ms(), 14 * 86_400_000);
    }
}
