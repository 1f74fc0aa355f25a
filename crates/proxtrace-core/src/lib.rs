//! # proxtrace-core
//!
//! Contact detection core for the proxtrace proximity tracing system.
//!
//! Transports (Bluetooth, BLE, beacons, peer-to-peer messaging) report what
//! they see; this crate turns those noisy, repeated sightings into a clean
//! contact history:
//! - Identity format validation and GATT payload decoding
//! - Per `(identity, source)` duplicate suppression
//! - Visibility sessions per transport endpoint, with duration tracking
//! - New contact detection, at most once per identity
//! - A countdown driving the foreground/background detection duty cycle
//!
//! ## Architecture
//!
//! - [`identity`] - Identity validation
//! - [`dedup`] - Time-windowed duplicate suppression
//! - [`session`] - Endpoint sessions and durations
//! - [`storage`] - The contact store interface plus memory and JSON stores
//! - [`engine`] - The coordinator every sighting goes through
//! - [`countdown`] - Extendable delayed action
//! - [`detection`] - Duty cycle over pluggable transports
//! - [`intake`] - Bounded queue between radio callbacks and the engine
//! - [`context`] - Builder wiring all of the above
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod context;
pub mod countdown;
pub mod dedup;
pub mod detection;
pub mod engine;
pub mod error;
pub mod identity;
pub mod intake;
pub mod notify;
pub mod session;
mod shard;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BleDetectionConfig, ConfigError, ConfigResult, DetectionConfig, ProxtraceConfig,
    RetentionConfig, TimingConfig,
};
pub use context::{DetectionContext, DetectionContextBuilder};
pub use countdown::{DetectionCountdown, MAX_COUNTDOWN};
pub use dedup::{AcceptDecision, DeduplicationWindow};
pub use detection::{DetectionController, DetectionStatus, TransportControl};
pub use engine::ContactDetectionEngine;
pub use error::{ProxtraceError, Result};
pub use identity::{IdentityRejection, IdentityValidator};
pub use intake::{IntakeError, IntakeEvent, SightingIntake};
pub use notify::{NewContactNotifier, NoopNotifier, TracingNotifier};
pub use session::{EndpointSession, SeenOutcome, SessionTracker};
pub use storage::{
    default_contacts_path, default_data_dir, ContactStore, JsonContactStore, MemoryContactStore,
    StoreError, StoreResult,
};
pub use types::{
    ContactRecord, DetectionResult, NewContactRecord, SessionDuration, Sighting, SightingSource,
    Timestamp,
};
