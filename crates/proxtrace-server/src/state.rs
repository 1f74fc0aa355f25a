//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use proxtrace_core::{ContactDetectionEngine, DetectionContext, DetectionController};

/// Handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
///
/// The detection context synchronizes itself, so handlers share it without
/// an outer lock.
pub struct AppState {
    context: DetectionContext,
    started_at: Instant,
}

impl AppState {
    /// Wrap a built detection context.
    #[must_use]
    pub fn new(context: DetectionContext) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }

    /// Wrap a built detection context in a [`SharedState`].
    #[must_use]
    pub fn shared(context: DetectionContext) -> SharedState {
        Arc::new(Self::new(context))
    }

    /// The detection context.
    #[must_use]
    pub const fn context(&self) -> &DetectionContext {
        &self.context
    }

    /// The contact detection engine.
    #[must_use]
    pub fn engine(&self) -> &ContactDetectionEngine {
        self.context.engine()
    }

    /// The duty-cycle controller.
    #[must_use]
    pub fn controller(&self) -> &DetectionController {
        self.context.controller()
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Consume the state and shut the detection context down.
    pub async fn shutdown(self) {
        self.context.shutdown().await;
    }
}

/// State over an in-memory store and a frozen clock, for handler tests.
#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    test_state_with_intake_capacity(proxtrace_core::TimingConfig::default().intake_capacity)
}

/// Like [`test_state`] with a sighting queue of `capacity` events.
#[cfg(test)]
pub(crate) fn test_state_with_intake_capacity(capacity: usize) -> SharedState {
    use proxtrace_core::{
        DetectionConfig, ManualClock, MemoryContactStore, NoopNotifier, ProxtraceConfig,
    };

    let mut config = ProxtraceConfig {
        detection: DetectionConfig {
            prefix: "nov20-".into(),
            min_length: 15,
            max_length: 23,
        },
        ..ProxtraceConfig::default()
    };
    config.timing.intake_capacity = capacity;
    let context = DetectionContext::builder()
        .config(config)
        .store(Arc::new(MemoryContactStore::new()))
        .clock(Arc::new(ManualClock::new(60_000)))
        .notifier(Arc::new(NoopNotifier))
        .build()
        .unwrap();
    AppState::shared(context)
}
