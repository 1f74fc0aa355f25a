//! Single-slot, extendable delayed action.
//!
//! `Idle -> Armed -> (Fired | Cancelled) -> Idle`. Extending an armed countdown
//! aborts the pending waiter and starts a new one at
//! `max(current_deadline, now + duration)`. Each waiter carries a generation
//! number and re-checks it under the slot lock before firing, so a waiter that
//! woke just as it was superseded never runs the action.
//!
//! The action receives the generation that fired. Anything it does after the
//! slot lock is released can race a new `extend`; [`DetectionCountdown::is_current`]
//! tells the action whether the countdown was re-armed in the meantime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ProxtraceError, Result};

type Action = Arc<dyn Fn(u64) + Send + Sync>;

/// Longest time a single extension can push the deadline out. Longer requests
/// are clamped.
pub const MAX_COUNTDOWN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Default)]
struct Slot {
    deadline: Option<Instant>,
    generation: u64,
    waiter: Option<JoinHandle<()>>,
}

/// A cancellable countdown that fires its action once per settled deadline.
pub struct DetectionCountdown {
    slot: Arc<Mutex<Slot>>,
    action: Action,
    runtime: Handle,
}

impl DetectionCountdown {
    /// Create an idle countdown on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::NoRuntime`] outside a runtime.
    pub fn new(action: impl Fn(u64) + Send + Sync + 'static) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| ProxtraceError::NoRuntime)?;
        Ok(Self::with_handle(runtime, action))
    }

    /// Create an idle countdown whose waiters run on `runtime`.
    pub fn with_handle(runtime: Handle, action: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            action: Arc::new(action),
            runtime,
        }
    }

    /// Keep the countdown armed for at least `duration` from now.
    ///
    /// Returns the deadline now in force. Durations above [`MAX_COUNTDOWN`]
    /// are clamped to it.
    pub fn extend(&self, duration: Duration) -> Instant {
        let mut slot = self.slot.lock();

        let now = Instant::now();
        let latest = now.checked_add(MAX_COUNTDOWN).unwrap_or(now);
        let requested = now
            .checked_add(duration)
            .map_or(latest, |requested| requested.min(latest));
        let deadline = slot
            .deadline
            .map_or(requested, |current| current.max(requested));

        if let Some(previous) = slot.waiter.take() {
            previous.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.deadline = Some(deadline);

        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let action = Arc::clone(&self.action);
        slot.waiter = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.deadline = None;
                slot.waiter = None;
            }
            tracing::debug!(generation, "Detection countdown elapsed");
            action(generation);
        }));

        tracing::trace!(
            remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis(),
            "Detection countdown extended"
        );
        deadline
    }

    /// Disarm without firing. Returns `true` if a countdown was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        let was_armed = slot.deadline.take().is_some();
        if let Some(waiter) = slot.waiter.take() {
            waiter.abort();
        }
        if was_armed {
            tracing::debug!("Detection countdown cancelled");
        }
        was_armed
    }

    /// Generation of the most recent `extend` or `cancel`.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// `true` if nothing extended or cancelled the countdown since
    /// `generation` was armed.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// `true` while a deadline is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.lock().deadline.is_some()
    }

    /// Deadline currently in force.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.lock().deadline
    }

    /// Time left until the action fires.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for DetectionCountdown {
    fn drop(&mut self) {
        if let Some(waiter) = self.slot.lock().waiter.take() {
            waiter.abort();
        }
    }
}
