//! Foreground/background detection duty cycle.
//!
//! While the service runs, detection is switched on by service start, push
//! messages, the app coming to the foreground and explicit requests. Each of
//! these keeps the countdown armed for its own timeout; when the latest
//! deadline passes, transports are stopped and every open session is closed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use utoipa::ToSchema;

use crate::config::TimingConfig;
use crate::countdown::DetectionCountdown;
use crate::engine::ContactDetectionEngine;
use crate::error::{ProxtraceError, Result};
use crate::types::SessionDuration;

/// A radio transport the controller can switch on and off.
///
/// Implementations start or stop their platform scanner and return promptly.
pub trait TransportControl: Send + Sync {
    /// Short name used in logs and status reports.
    fn name(&self) -> &str;

    /// Begin scanning or advertising.
    fn start(&self);

    /// Stop scanning or advertising.
    fn stop(&self);
}

/// Snapshot of the duty cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DetectionStatus {
    /// Whether the detection service is running.
    pub service_running: bool,

    /// Whether transports are currently detecting.
    pub detecting: bool,

    /// Milliseconds until detection stops, if the countdown is armed.
    pub remaining_ms: Option<u64>,

    /// Number of open endpoint sessions.
    pub open_sessions: usize,

    /// Registered transports.
    pub transports: Vec<String>,
}

#[derive(Debug, Default)]
struct DutyState {
    service_running: bool,
    detecting: bool,
}

/// Owns the countdown and the transport on/off state.
pub struct DetectionController {
    engine: Arc<ContactDetectionEngine>,
    transports: Vec<Arc<dyn TransportControl>>,
    countdown: DetectionCountdown,
    state: Mutex<DutyState>,
    timing: TimingConfig,
}

impl DetectionController {
    /// Create a stopped controller.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::NoRuntime`] outside a Tokio runtime.
    pub fn new(
        engine: Arc<ContactDetectionEngine>,
        transports: Vec<Arc<dyn TransportControl>>,
        timing: TimingConfig,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| ProxtraceError::NoRuntime)?;
        Ok(Arc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let countdown = DetectionCountdown::with_handle(runtime, move |generation| {
                if let Some(controller) = this.upgrade() {
                    controller.detection_window_elapsed(generation);
                }
            });
            Self {
                engine,
                transports,
                countdown,
                state: Mutex::new(DutyState::default()),
                timing,
            }
        }))
    }

    /// The engine transports report into.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ContactDetectionEngine> {
        &self.engine
    }

    /// Start the service: begin detecting for the initial timeout and sweep
    /// expired contacts.
    pub async fn start_service(&self) -> DetectionStatus {
        {
            let mut state = self.state.lock();
            if !state.service_running {
                state.service_running = true;
                tracing::info!(transports = self.transports.len(), "Detection service started");
            }
        }
        if let Err(e) = self.extend_detection_window(self.timing.initial_timeout()) {
            tracing::error!(error = %e, "Could not start detection");
        }
        if let Err(e) = self.engine.sweep_retention().await {
            tracing::warn!(error = %e, "Retention sweep failed");
        }
        self.status()
    }

    /// Stop detecting and mark the service stopped.
    pub fn stop_service(&self) -> Vec<SessionDuration> {
        self.state.lock().service_running = false;
        let closed = self.stop_detection_now();
        tracing::info!("Detection service stopped");
        closed
    }

    /// Switch transports on. Returns `false` if they already were.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::ServiceNotRunning`] while the service is
    /// stopped.
    pub fn start_detection(&self) -> Result<bool> {
        self.start_transports(&mut self.state.lock())
    }

    /// Keep detecting for at least `duration` from now, starting if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::ServiceNotRunning`] while the service is
    /// stopped.
    pub fn extend_detection_window(&self, duration: Duration) -> Result<DetectionStatus> {
        {
            // Held across the re-arm so an elapsing window cannot stop
            // transports between the two steps.
            let mut state = self.state.lock();
            self.start_transports(&mut state)?;
            self.countdown.extend(duration);
        }
        Ok(self.status())
    }

    /// A push message asked for detection.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::ServiceNotRunning`] while the service is
    /// stopped.
    pub fn push_received(&self) -> Result<DetectionStatus> {
        tracing::debug!("Push received; extending detection");
        self.extend_detection_window(self.timing.push_timeout())
    }

    /// The host app came to the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::ServiceNotRunning`] while the service is
    /// stopped.
    pub fn foreground_entered(&self) -> Result<DetectionStatus> {
        self.extend_detection_window(self.timing.foreground_timeout())
    }

    /// Cancel the countdown, stop every transport and close every open
    /// session. Returns the final durations, which are also forwarded to
    /// the store.
    pub fn stop_detection_now(&self) -> Vec<SessionDuration> {
        {
            let mut state = self.state.lock();
            self.countdown.cancel();
            self.stop_transports(&mut state);
        }
        self.engine.close_all_sessions()
    }

    /// Timer path: stop only if nothing re-armed the countdown after
    /// `generation` fired.
    fn detection_window_elapsed(&self, generation: u64) -> Option<Vec<SessionDuration>> {
        {
            let mut state = self.state.lock();
            if !self.countdown.is_current(generation) {
                tracing::debug!("Detection window re-armed while elapsing; still detecting");
                return None;
            }
            tracing::info!("Detection window elapsed");
            self.stop_transports(&mut state);
        }
        Some(self.engine.close_all_sessions())
    }

    fn start_transports(&self, state: &mut DutyState) -> Result<bool> {
        if !state.service_running {
            return Err(ProxtraceError::ServiceNotRunning);
        }
        if state.detecting {
            return Ok(false);
        }
        for transport in &self.transports {
            tracing::debug!(transport = transport.name(), "Starting transport");
            transport.start();
        }
        state.detecting = true;
        tracing::info!("Detection started");
        Ok(true)
    }

    fn stop_transports(&self, state: &mut DutyState) {
        if !state.detecting {
            return;
        }
        for transport in &self.transports {
            tracing::debug!(transport = transport.name(), "Stopping transport");
            transport.stop();
        }
        state.detecting = false;
        tracing::info!("Detection stopped");
    }

    /// Current duty cycle state.
    #[must_use]
    pub fn status(&self) -> DetectionStatus {
        let (service_running, detecting) = {
            let state = self.state.lock();
            (state.service_running, state.detecting)
        };
        DetectionStatus {
            service_running,
            detecting,
            remaining_ms: self
                .countdown
                .remaining()
                .map(|left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX)),
            open_sessions: self.engine.open_sessions(),
            transports: self
                .transports
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{DetectionConfig, ProxtraceConfig};
    use crate::notify::NoopNotifier;
    use crate::storage::MemoryContactStore;
    use crate::types::{Sighting, SightingSource};

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct FakeRadio {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl TransportControl for FakeRadio {
        fn name(&self) -> &str {
            "fake radio"
        }

        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller() -> (Arc<DetectionController>, Arc<FakeRadio>) {
        let config = ProxtraceConfig {
            detection: DetectionConfig {
                prefix: "nov20-".into(),
                min_length: 15,
                max_length: 23,
            },
            ..ProxtraceConfig::default()
        };
        let engine = Arc::new(
            ContactDetectionEngine::new(
                &config,
                Arc::new(MemoryContactStore::new()),
                Arc::new(ManualClock::new(0)),
                Arc::new(NoopNotifier),
            )
            .unwrap(),
        );
        let radio = Arc::new(FakeRadio::default());
        let controller =
            DetectionController::new(
                engine,
                vec![radio.clone() as Arc<dyn TransportControl>],
                config.timing,
            )
            .unwrap();
        (controller, radio)
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_requires_service() {
        let (controller, radio) = controller();
        assert!(matches!(
            controller.start_detection(),
            Err(ProxtraceError::ServiceNotRunning)
        ));
        assert!(controller.push_received().is_err());
        assert_eq!(radio.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_start_arms_initial_timeout() {
        let (controller, radio) = controller();
        let status = controller.start_service().await;
        assert!(status.service_running);
        assert!(status.detecting);
        assert_eq!(status.remaining_ms, Some(600_000));
        assert_eq!(status.transports, vec!["fake radio".to_string()]);
        assert_eq!(radio.starts.load(Ordering::SeqCst), 1);

        // Already detecting: no second start.
        assert!(!controller.start_detection().unwrap());
        assert_eq!(radio.starts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(10 * MINUTE + Duration::from_secs(1)).await;
        let status = controller.status();
        assert!(status.service_running);
        assert!(!status.detecting);
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_extends_running_window() {
        let (controller, radio) = controller();
        controller.start_service().await;

        tokio::time::sleep(8 * MINUTE).await;
        controller.push_received().unwrap();

        // The initial window would have ended at 10 minutes.
        tokio::time::sleep(5 * MINUTE).await;
        assert!(controller.status().detecting);

        tokio::time::sleep(6 * MINUTE).await;
        assert!(!controller.status().detecting);
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_now_closes_sessions() {
        let (controller, radio) = controller();
        controller.start_service().await;
        controller
            .engine()
            .report_sighting(
                Sighting::new("nov20-abc123456789", Some(SightingSource::BleName), 0)
                    .with_endpoint_key("AA:BB"),
            )
            .await;

        let closed = controller.stop_detection_now();
        assert_eq!(closed.len(), 1);
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);

        let status = controller.status();
        assert_eq!(status.remaining_ms, None);
        assert_eq!(status.open_sessions, 0);

        // A cancelled countdown never stops the transports a second time.
        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_service_refuses_new_detection() {
        let (controller, _radio) = controller();
        controller.start_service().await;
        controller.stop_service();
        assert!(!controller.status().service_running);
        assert!(controller.foreground_entered().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_elapse_keeps_new_window() {
        let (controller, radio) = controller();
        controller.start_service().await;
        let fired = controller.countdown.generation();

        // A push lands between the countdown firing and the stop.
        controller.push_received().unwrap();
        assert!(controller.detection_window_elapsed(fired).is_none());

        let status = controller.status();
        assert!(status.detecting);
        assert_eq!(status.remaining_ms, Some(600_000));
        assert_eq!(radio.stops.load(Ordering::SeqCst), 0);

        tokio::time::sleep(10 * MINUTE + Duration::from_secs(1)).await;
        assert!(!controller.status().detecting);
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_elapse_stops_detection() {
        let (controller, radio) = controller();
        controller.start_service().await;
        let armed = controller.countdown.generation();

        assert_eq!(controller.detection_window_elapsed(armed), Some(Vec::new()));
        assert!(!controller.status().detecting);
        assert_eq!(radio.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_extension_does_not_panic() {
        let (controller, _radio) = controller();
        controller.start_service().await;
        let status = controller
            .extend_detection_window(Duration::from_secs(u64::MAX))
            .unwrap();
        let max_ms = u64::try_from(crate::countdown::MAX_COUNTDOWN.as_millis()).unwrap();
        assert_eq!(status.remaining_ms, Some(max_ms));
    }
}
