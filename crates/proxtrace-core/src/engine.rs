//! The contact detection engine.
//!
//! Turns raw sightings from every transport into a deduplicated append log of
//! contact rows, opens visibility sessions for sightings that carry an endpoint
//! key, and forwards session durations to the store.
//!
//! Store writes never run on the caller's task. Inserts and duration updates
//! are spawned onto the runtime captured at construction and their failures are
//! logged there. A duration update waits for any in-flight insert of the row it
//! targets, keyed by `(identity, first_seen_at)`, so it cannot land first. The only store call a sighting may await is the existence
//! count for an identity this process has never seen before; concurrent
//! sightings of that identity wait for the same count before their rows are
//! dispatched, so none of them can make it non-zero.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{ProxtraceConfig, RetentionConfig};
use crate::dedup::{AcceptDecision, DeduplicationWindow};
use crate::error::{ProxtraceError, Result};
use crate::identity::IdentityValidator;
use crate::notify::NewContactNotifier;
use crate::session::{SeenOutcome, SessionTracker};
use crate::shard::ShardedMap;
use crate::storage::ContactStore;
use crate::types::{
    ContactRecord, DetectionResult, NewContactRecord, SessionDuration, Sighting, SightingSource,
    Timestamp,
};

type FlushSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Resolves once the first sighting of an identity has been counted.
type FirstSighting = Arc<OnceCell<bool>>;

/// A contact row is addressed by identity and the sighting timestamp.
type RowKey = (String, Timestamp);

// =============================================================================
// BACKGROUND WRITES
// =============================================================================

/// Counts spawned store writes so callers can wait for them to land.
#[derive(Default)]
struct PendingWrites {
    in_flight: AtomicUsize,
    idle: Notify,
}

struct PendingGuard(Arc<PendingWrites>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl PendingWrites {
    fn begin(self: &Arc<Self>) -> PendingGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        PendingGuard(Arc::clone(self))
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Fire-and-forget access to the contact store.
#[derive(Clone)]
struct StoreWriter {
    store: Arc<dyn ContactStore>,
    runtime: Handle,
    pending: Arc<PendingWrites>,
    inserting: Arc<ShardedMap<RowKey, Arc<PendingWrites>>>,
}

impl StoreWriter {
    fn insert(&self, record: NewContactRecord) {
        let guard = self.pending.begin();
        let key: RowKey = (record.identity.clone(), record.first_seen_at);
        let row_guard = self
            .inserting
            .with_entry(key.clone(), |entry| entry.or_default().begin());
        let store = Arc::clone(&self.store);
        let inserting = Arc::clone(&self.inserting);
        self.runtime.spawn(async move {
            let _guard = guard;
            match store.insert_sighting(record).await {
                Ok(id) => tracing::trace!(id, identity = %key.0, seen_at = key.1, "Contact row written"),
                Err(e) => tracing::error!(
                    error = %e,
                    identity = %key.0,
                    seen_at = key.1,
                    "Failed to write contact row; sighting dropped"
                ),
            }
            inserting.with_entry(key, |entry| {
                drop(row_guard);
                if let Entry::Occupied(occupied) = entry {
                    if occupied.get().is_idle() {
                        occupied.remove();
                    }
                }
            });
        });
    }

    fn update_duration(&self, duration: SessionDuration) {
        let guard = self.pending.begin();
        let row_insert = self
            .inserting
            .get_cloned(&(duration.identity.clone(), duration.opened_at));
        let store = Arc::clone(&self.store);
        self.runtime.spawn(async move {
            let _guard = guard;
            if let Some(row_insert) = row_insert {
                row_insert.wait_idle().await;
            }
            let SessionDuration {
                identity,
                opened_at,
                duration,
            } = duration;
            match store.update_duration(&identity, opened_at, duration).await {
                Ok(0) => tracing::debug!(
                    identity = %identity,
                    opened_at,
                    "No contact row matches session; duration discarded"
                ),
                Ok(rows) => tracing::trace!(
                    identity = %identity,
                    opened_at,
                    duration,
                    rows,
                    "Duration stored"
                ),
                Err(e) => tracing::warn!(
                    error = %e,
                    identity = %identity,
                    opened_at,
                    "Failed to store session duration"
                ),
            }
        });
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Central coordinator for sightings, sessions and contact rows.
pub struct ContactDetectionEngine {
    validator: IdentityValidator,
    dedup: DeduplicationWindow,
    sessions: Arc<SessionTracker>,
    first_sightings: ShardedMap<String, FirstSighting>,
    notifier: Arc<dyn NewContactNotifier>,
    clock: Arc<dyn Clock>,
    writer: StoreWriter,
    retention: RetentionConfig,
    flush_interval: Duration,
    flush_loop: FlushSlot,
}

impl ContactDetectionEngine {
    /// Create an engine on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProxtraceError::NoRuntime`] outside a runtime.
    pub fn new(
        config: &ProxtraceConfig,
        store: Arc<dyn ContactStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NewContactNotifier>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| ProxtraceError::NoRuntime)?;
        Ok(Self {
            validator: IdentityValidator::new(config.detection.clone()),
            dedup: DeduplicationWindow::new(
                config.timing.dedup_window_ms,
                config.timing.dedup_eviction_age_ms,
            ),
            sessions: Arc::new(SessionTracker::new()),
            first_sightings: ShardedMap::new(),
            notifier,
            clock,
            writer: StoreWriter {
                store,
                runtime,
                pending: Arc::new(PendingWrites::default()),
                inserting: Arc::new(ShardedMap::new()),
            },
            retention: config.retention.clone(),
            flush_interval: config.timing.session_flush_interval(),
            flush_loop: Arc::new(Mutex::new(None)),
        })
    }

    /// The identity validator in use.
    #[must_use]
    pub const fn validator(&self) -> &IdentityValidator {
        &self.validator
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Report one sighting.
    ///
    /// Invalid identities are rejected and repeats inside the dedup window are
    /// suppressed; neither touches the store. Every other sighting is appended
    /// as its own row. An accepted sighting with an endpoint key also opens a
    /// session for that key.
    pub async fn report_sighting(&self, sighting: Sighting) -> DetectionResult {
        if let Err(reason) = self.validator.check(&sighting.identity) {
            tracing::debug!(
                identity = %sighting.identity,
                %reason,
                "Sighting rejected"
            );
            return DetectionResult::Rejected { reason };
        }

        if self
            .dedup
            .should_accept(&sighting.identity, sighting.source, sighting.timestamp)
            == AcceptDecision::Suppressed
        {
            tracing::trace!(
                identity = %sighting.identity,
                source = source_name(sighting.source),
                "Duplicate sighting suppressed"
            );
            return DetectionResult::SuppressedDuplicate;
        }

        let is_new_contact = self.resolve_new_contact(&sighting).await;

        self.writer.insert(NewContactRecord::from(&sighting));

        if let Some(endpoint_key) = sighting.endpoint_key.as_deref() {
            self.open_session(endpoint_key, &sighting.identity, sighting.timestamp);
        }

        tracing::debug!(
            identity = %sighting.identity,
            source = source_name(sighting.source),
            is_new_contact,
            "Sighting accepted"
        );
        DetectionResult::Accepted { is_new_contact }
    }

    /// Decode a GATT characteristic payload and report it as a sighting.
    pub async fn report_payload(
        &self,
        payload: &[u8],
        source: Option<SightingSource>,
        timestamp: Timestamp,
        endpoint_key: Option<&str>,
    ) -> DetectionResult {
        match self.validator.decode_payload(payload) {
            Ok(identity) => {
                let mut sighting = Sighting::new(identity, source, timestamp);
                sighting.endpoint_key = endpoint_key.map(str::to_owned);
                self.report_sighting(sighting).await
            }
            Err(reason) => {
                tracing::debug!(
                    payload_len = payload.len(),
                    %reason,
                    "Characteristic payload rejected"
                );
                DetectionResult::Rejected { reason }
            }
        }
    }

    /// Forward a duration to the row keyed by `(identity, opened_at)`.
    ///
    /// A missing row is silently ignored.
    pub fn update_duration(&self, identity: &str, opened_at: Timestamp, duration: i64) {
        self.writer.update_duration(SessionDuration {
            identity: identity.to_owned(),
            opened_at,
            duration,
        });
    }

    /// A transport sees `endpoint_key` resolved to `identity`.
    ///
    /// Returns `None` when the identity is not well formed.
    pub fn endpoint_seen(
        &self,
        endpoint_key: &str,
        identity: &str,
        timestamp: Timestamp,
    ) -> Option<SeenOutcome> {
        if let Err(reason) = self.validator.check(identity) {
            tracing::debug!(endpoint_key, identity, %reason, "Endpoint identity rejected");
            return None;
        }
        Some(self.open_session(endpoint_key, identity, timestamp))
    }

    /// A transport lost sight of `endpoint_key`. The final duration is
    /// forwarded to the store and returned.
    pub fn endpoint_lost(&self, endpoint_key: &str, timestamp: Timestamp) -> Option<SessionDuration> {
        let closed = self.sessions.on_endpoint_lost(endpoint_key, timestamp)?;
        tracing::debug!(
            endpoint_key,
            identity = %closed.identity,
            duration_ms = closed.duration,
            "Session closed"
        );
        self.writer.update_duration(closed.clone());
        Some(closed)
    }

    /// Checkpoint every open session without closing it.
    pub fn flush_sessions(&self) -> Vec<SessionDuration> {
        flush_into(&self.sessions, &self.writer, self.clock.now())
    }

    /// Close every open session, forwarding final durations.
    pub fn close_all_sessions(&self) -> Vec<SessionDuration> {
        let closed = self.sessions.close_all(self.clock.now());
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "Closed all open sessions");
        }
        for duration in &closed {
            self.writer.update_duration(duration.clone());
        }
        closed
    }

    /// Number of open sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// `true` while the periodic session flush is scheduled.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flush_loop.lock().is_some()
    }

    /// Wait until every spawned store write has finished.
    pub async fn wait_for_writes(&self) {
        self.writer.pending.wait_idle().await;
    }

    /// Rows seen strictly after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn contacts_since(&self, since: Timestamp) -> Result<Vec<ContactRecord>> {
        Ok(self.writer.store.list_since(since).await?)
    }

    /// Rows inside the report window.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn recent_contacts(&self) -> Result<Vec<ContactRecord>> {
        let since = self
            .clock
            .now()
            .saturating_sub(self.retention.report_window_ms());
        self.contacts_since(since).await
    }

    /// Delete rows older than the retention period.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn sweep_retention(&self) -> Result<usize> {
        let cutoff = self.clock.now().saturating_sub(self.retention.max_age_ms());
        let removed = self.writer.store.delete_older_than(cutoff).await?;
        tracing::info!(removed, cutoff, "Retention sweep finished");
        Ok(removed)
    }

    /// Forget everything: stored rows, dedup state, the new contact set and
    /// open sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be wiped; in-memory state is left
    /// untouched in that case.
    pub async fn wipe_all(&self) -> Result<()> {
        self.wait_for_writes().await;
        self.writer.store.wipe_all().await?;
        self.dedup.clear();
        self.first_sightings.clear();
        self.sessions.close_all(self.clock.now());
        tracing::warn!("All contact data wiped");
        Ok(())
    }

    /// `true` for exactly one sighting of an identity the store has never
    /// seen. Every sighting of the identity waits until that one is settled.
    async fn resolve_new_contact(&self, sighting: &Sighting) -> bool {
        let cell = self
            .first_sightings
            .with_entry(sighting.identity.clone(), |entry| {
                Arc::clone(entry.or_default())
            });
        if cell.initialized() {
            return false;
        }

        let mut counted_here = false;
        let is_first = *cell
            .get_or_init(|| {
                counted_here = true;
                self.first_sighting_in_store(sighting)
            })
            .await;
        counted_here && is_first
    }

    async fn first_sighting_in_store(&self, sighting: &Sighting) -> bool {
        match self
            .writer
            .store
            .count_sightings_for(&sighting.identity)
            .await
        {
            Ok(0) => {
                self.notifier
                    .notify(&sighting.identity, sighting.source, sighting.timestamp);
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    identity = %sighting.identity,
                    "Could not count prior sightings; treating as known contact"
                );
                false
            }
        }
    }

    fn open_session(&self, endpoint_key: &str, identity: &str, timestamp: Timestamp) -> SeenOutcome {
        let outcome = self
            .sessions
            .on_endpoint_seen(endpoint_key, identity, timestamp);
        match &outcome {
            SeenOutcome::Opened => {
                tracing::debug!(endpoint_key, identity, "Session opened");
            }
            SeenOutcome::AlreadyOpen => {}
            SeenOutcome::Replaced(previous) => {
                tracing::debug!(
                    endpoint_key,
                    previous = %previous.identity,
                    identity,
                    "Endpoint changed identity; previous session closed"
                );
                self.writer.update_duration(previous.clone());
            }
        }
        self.ensure_flush_loop();
        outcome
    }

    /// Start the periodic flush unless one is already scheduled.
    ///
    /// The loop clears the slot under the same lock it checks emptiness with,
    /// so a session opened while it exits always gets a fresh loop.
    fn ensure_flush_loop(&self) {
        let mut slot = self.flush_loop.lock();
        if slot.is_some() {
            return;
        }
        let sessions = Arc::clone(&self.sessions);
        let clock = Arc::clone(&self.clock);
        let writer = self.writer.clone();
        let shared = Arc::clone(&self.flush_loop);
        let interval = self.flush_interval;
        *slot = Some(self.writer.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let flushed = {
                    let mut slot = shared.lock();
                    if sessions.is_empty() {
                        *slot = None;
                        break;
                    }
                    sessions.flush_all(clock.now())
                };
                tracing::debug!(count = flushed.len(), "Session durations checkpointed");
                for duration in flushed {
                    writer.update_duration(duration);
                }
            }
            tracing::debug!("No open sessions; flush loop stopped");
        }));
    }
}

impl Drop for ContactDetectionEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_loop.lock().take() {
            handle.abort();
        }
    }
}

fn flush_into(sessions: &SessionTracker, writer: &StoreWriter, now: Timestamp) -> Vec<SessionDuration> {
    let flushed = sessions.flush_all(now);
    for duration in &flushed {
        writer.update_duration(duration.clone());
    }
    flushed
}

fn source_name(source: Option<SightingSource>) -> &'static str {
    source.map_or("unknown", SightingSource::as_str)
}
