//! The wired-up detection stack.
//!
//! A [`DetectionContext`] is built once at startup and handed to whatever
//! needs it. Building validates the configuration and fails if a required
//! collaborator is missing, so nothing can go wrong for that reason once
//! sightings start arriving.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::ProxtraceConfig;
use crate::detection::{DetectionController, TransportControl};
use crate::engine::ContactDetectionEngine;
use crate::error::{ProxtraceError, Result};
use crate::intake::SightingIntake;
use crate::notify::{NewContactNotifier, TracingNotifier};
use crate::storage::ContactStore;

/// Engine, duty-cycle controller and sighting queue sharing one configuration.
pub struct DetectionContext {
    config: ProxtraceConfig,
    engine: Arc<ContactDetectionEngine>,
    controller: Arc<DetectionController>,
    intake: SightingIntake,
}

impl DetectionContext {
    /// Start building a context.
    #[must_use]
    pub fn builder() -> DetectionContextBuilder {
        DetectionContextBuilder::default()
    }

    /// The configuration in force.
    #[must_use]
    pub const fn config(&self) -> &ProxtraceConfig {
        &self.config
    }

    /// The contact detection engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ContactDetectionEngine> {
        &self.engine
    }

    /// The duty-cycle controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<DetectionController> {
        &self.controller
    }

    /// Queue for radio callbacks.
    #[must_use]
    pub const fn intake(&self) -> &SightingIntake {
        &self.intake
    }

    /// Stop detection, drain queued sightings and wait for pending writes.
    pub async fn shutdown(self) {
        self.controller.stop_service();
        self.intake.shutdown().await;
        self.engine.wait_for_writes().await;
        tracing::info!("Detection context shut down");
    }
}

/// Builder for [`DetectionContext`].
#[derive(Default)]
pub struct DetectionContextBuilder {
    config: Option<ProxtraceConfig>,
    store: Option<Arc<dyn ContactStore>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn NewContactNotifier>>,
    transports: Vec<Arc<dyn TransportControl>>,
}

impl DetectionContextBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: ProxtraceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The contact store. Required.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ContactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The clock. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Receiver of new contact alerts. Defaults to [`TracingNotifier`].
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NewContactNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register a transport for the duty cycle.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn TransportControl>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Wire everything together.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid,
    /// [`ProxtraceError::MissingDependency`] if no store was given, or
    /// [`ProxtraceError::NoRuntime`] outside a Tokio runtime.
    pub fn build(self) -> Result<DetectionContext> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self
            .store
            .ok_or(ProxtraceError::MissingDependency("contact store"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let engine = Arc::new(ContactDetectionEngine::new(&config, store, clock, notifier)?);
        let controller =
            DetectionController::new(Arc::clone(&engine), self.transports, config.timing.clone())?;
        let intake = SightingIntake::spawn(Arc::clone(&engine), config.timing.intake_capacity);

        tracing::debug!(
            prefix = %config.detection.prefix,
            min_length = config.detection.min_length,
            max_length = config.detection.max_length,
            transports = controller.status().transports.len(),
            "Detection context built"
        );

        Ok(DetectionContext {
            config,
            engine,
            controller,
            intake,
        })
    }
}
