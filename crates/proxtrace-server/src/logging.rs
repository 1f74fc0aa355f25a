//! Subscriber setup for the server binary.
//!
//! The core crate only emits `tracing` events; this is the one place a
//! subscriber gets installed.
//!
//! - [`LogMode::Production`]: JSON lines into a daily rolling file plus plain
//!   compact stdout for the service manager's journal
//! - [`LogMode::Development`]: pretty stdout with span open/close events
//!
//! The filter comes from `RUST_LOG`, then `PROXTRACE_LOG_LEVEL`, then `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback log filter.
pub const LOG_LEVEL_ENV: &str = "PROXTRACE_LOG_LEVEL";

/// Environment variable selecting production logging when set to `production`.
pub const ENVIRONMENT_ENV: &str = "PROXTRACE_ENV";

const LOG_FILE_PREFIX: &str = "proxtrace";

/// Flushes buffered lines on exit; lives as long as the process.
static WRITER_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Where and how log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// File plus journal-friendly stdout.
    Production,
    /// Human-readable stdout.
    Development,
}

impl LogMode {
    /// Mode selected by `PROXTRACE_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        if is_production() {
            Self::Production
        } else {
            Self::Development
        }
    }
}

/// `true` when `PROXTRACE_ENV=production`.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENVIRONMENT_ENV).is_ok_and(|value| value.eq_ignore_ascii_case("production"))
}

/// Filter from `RUST_LOG`, falling back to `PROXTRACE_LOG_LEVEL`, then `info`.
///
/// # Errors
///
/// Returns an error if the fallback directive does not parse.
pub fn env_filter() -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(&directive)
        .with_context(|| format!("{LOG_LEVEL_ENV}={directive} is not a valid log filter"))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let mode = if is_production {
        LogMode::Production
    } else {
        LogMode::Development
    };
    init_with(mode, env_filter()?)
}

fn init_with(mode: LogMode, filter: EnvFilter) -> anyhow::Result<()> {
    match mode {
        LogMode::Production => {
            let log_dir = log_directory();
            if let Err(e) = std::fs::create_dir_all(&log_dir) {
                eprintln!("Cannot create log directory {}: {e}", log_dir.display());
            }

            let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(file_writer)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(stdout_writer)
                        .with_ansi(false),
                )
                .try_init()?;

            let _ = WRITER_GUARDS.set(vec![file_guard, stdout_guard]);
        }
        LogMode::Development => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
                )
                .try_init()?;
        }
    }
    Ok(())
}

/// Log directory for production mode.
fn log_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/proxtrace");
    }
    directories::ProjectDirs::from("", "", "proxtrace")
        .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
}
