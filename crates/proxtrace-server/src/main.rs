//! # proxtrace-server
//!
//! HTTP server for the proxtrace contact detection engine.
//!
//! This binary provides:
//! - REST API for transport adapters to report sightings and endpoint events
//! - Contact history inspection, retention sweep, and wipe
//! - Control over the detection duty cycle
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package proxtrace-server
//!
//! # Production
//! PROXTRACE_ENV=production ./proxtrace-server
//! ```
//!
//! ## Environment
//!
//! - `PROXTRACE_CONFIG` - configuration file (defaults to the platform config dir)
//! - `PROXTRACE_CONTACTS` - contact store file (defaults to the platform data dir)
//! - `PROXTRACE_BIND` - listen address (defaults to `0.0.0.0:3000`)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use proxtrace_core::{
    default_contacts_path, DetectionContext, JsonContactStore, ProxtraceConfig, TracingNotifier,
};
use proxtrace_server::api::create_router;
use proxtrace_server::logging;
use proxtrace_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting proxtrace-server");

    let config_path = match std::env::var_os("PROXTRACE_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => ProxtraceConfig::default_path()?,
    };
    let config = ProxtraceConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    info!(path = %config_path.display(), "Configuration loaded");

    let contacts_path = std::env::var_os("PROXTRACE_CONTACTS")
        .map_or_else(default_contacts_path, PathBuf::from);
    let store = JsonContactStore::open(&contacts_path)
        .await
        .with_context(|| format!("Failed to open contact store at {}", contacts_path.display()))?;
    info!(path = %contacts_path.display(), "Contact store opened");

    let context = DetectionContext::builder()
        .config(config)
        .store(Arc::new(store))
        .notifier(Arc::new(TracingNotifier))
        .build()?;
    context.controller().start_service().await;

    let state = AppState::shared(context);
    let app = create_router(Arc::clone(&state));

    let addr: SocketAddr = std::env::var("PROXTRACE_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()
        .context("PROXTRACE_BIND is not a socket address")?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    match Arc::try_unwrap(state) {
        Ok(state) => state.shutdown().await,
        Err(state) => {
            state.controller().stop_service();
            state.engine().wait_for_writes().await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
