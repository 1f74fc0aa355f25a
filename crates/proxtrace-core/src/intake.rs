//! Bounded hand-off from radio callbacks to the engine.
//!
//! Callbacks call [`SightingIntake::submit`], which never blocks: it either
//! queues the event or reports back-pressure. A single worker drains the queue
//! in arrival order, so an endpoint's seen and lost events reach the session
//! tracker in the order the transport raised them.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::ContactDetectionEngine;
use crate::types::{Sighting, SightingSource, Timestamp};

/// Why an event could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// The queue is at capacity.
    #[error("Sighting queue is full")]
    Full,

    /// The worker has stopped.
    #[error("Sighting queue is closed")]
    Closed,
}

/// Something a transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeEvent {
    /// A resolved identity.
    Sighting(Sighting),

    /// Raw GATT characteristic bytes still to be decoded.
    Payload {
        /// Characteristic value.
        payload: Vec<u8>,
        /// Producing transport.
        source: Option<SightingSource>,
        /// When it was read.
        timestamp: Timestamp,
        /// Transport-local handle of the peer.
        endpoint_key: Option<String>,
    },

    /// An endpoint became visible.
    EndpointSeen {
        /// Transport-local handle.
        endpoint_key: String,
        /// Identity it resolved to.
        identity: String,
        /// When.
        timestamp: Timestamp,
    },

    /// An endpoint went out of range.
    EndpointLost {
        /// Transport-local handle.
        endpoint_key: String,
        /// When.
        timestamp: Timestamp,
    },
}

impl From<Sighting> for IntakeEvent {
    fn from(sighting: Sighting) -> Self {
        Self::Sighting(sighting)
    }
}

/// Queue plus the worker draining it.
pub struct SightingIntake {
    sender: mpsc::Sender<IntakeEvent>,
    worker: JoinHandle<()>,
}

impl SightingIntake {
    /// Start a worker feeding `engine`, buffering up to `capacity` events.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(engine: Arc<ContactDetectionEngine>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(engine, receiver));
        Self { sender, worker }
    }

    /// Queue an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError::Full`] when the queue is at capacity and
    /// [`IntakeError::Closed`] once the worker is gone.
    pub fn submit(&self, event: impl Into<IntakeEvent>) -> Result<(), IntakeError> {
        self.sender.try_send(event.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("Sighting queue full; dropping event");
                IntakeError::Full
            }
            mpsc::error::TrySendError::Closed(_) => IntakeError::Closed,
        })
    }

    /// Free slots left in the queue.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }

    /// Stop accepting events and wait for the queued ones to be processed.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Sighting worker ended abnormally");
        }
    }
}

async fn drain(engine: Arc<ContactDetectionEngine>, mut receiver: mpsc::Receiver<IntakeEvent>) {
    tracing::debug!("Sighting worker started");
    while let Some(event) = receiver.recv().await {
        match event {
            IntakeEvent::Sighting(sighting) => {
                engine.report_sighting(sighting).await;
            }
            IntakeEvent::Payload {
                payload,
                source,
                timestamp,
                endpoint_key,
            } => {
                engine
                    .report_payload(&payload, source, timestamp, endpoint_key.as_deref())
                    .await;
            }
            IntakeEvent::EndpointSeen {
                endpoint_key,
                identity,
                timestamp,
            } => {
                engine.endpoint_seen(&endpoint_key, &identity, timestamp);
            }
            IntakeEvent::EndpointLost {
                endpoint_key,
                timestamp,
            } => {
                engine.endpoint_lost(&endpoint_key, timestamp);
            }
        }
    }
    tracing::debug!("Sighting worker stopped");
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{DetectionConfig, ProxtraceConfig};
    use crate::notify::NoopNotifier;
    use crate::storage::{ContactStore, MemoryContactStore};

    const ID: &str = "nov20-abc123456789";

    fn engine(store: Arc<MemoryContactStore>) -> Arc<ContactDetectionEngine> {
        let config = ProxtraceConfig {
            detection: DetectionConfig {
                prefix: "nov20-".into(),
                min_length: 15,
                max_length: 23,
            },
            ..ProxtraceConfig::default()
        };
        Arc::new(
            ContactDetectionEngine::new(
                &config,
                store,
                Arc::new(ManualClock::new(0)),
                Arc::new(NoopNotifier),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_events_processed_in_order() {
        let store = Arc::new(MemoryContactStore::new());
        let engine = engine(store.clone());
        let intake = SightingIntake::spawn(Arc::clone(&engine), 16);

        assert_ok!(intake.submit(
            Sighting::new(ID, Some(SightingSource::BleName), 1_000).with_endpoint_key("AA:BB")
        ));
        assert_ok!(intake.submit(IntakeEvent::EndpointLost {
            endpoint_key: "AA:BB".into(),
            timestamp: 4_000,
        }));
        assert_ok!(intake.submit(IntakeEvent::Payload {
            payload: b"garbage".to_vec(),
            source: Some(SightingSource::BleClient),
            timestamp: 5_000,
            endpoint_key: None,
        }));
        intake.shutdown().await;
        engine.wait_for_writes().await;

        let rows = store.list_since(i64::MIN).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration, Some(3_000));
        assert_eq!(engine.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_reports_back_pressure() {
        let store = Arc::new(MemoryContactStore::new());
        let intake = SightingIntake::spawn(engine(store), 1);

        // The worker cannot run until this task yields, so the second event
        // finds the single slot taken.
        assert_ok!(intake.submit(Sighting::new(ID, None, 0)));
        assert_eq!(
            intake.submit(Sighting::new(ID, None, 1)),
            Err(IntakeError::Full)
        );
        assert_eq!(intake.remaining_capacity(), 0);
        intake.shutdown().await;
    }
}
