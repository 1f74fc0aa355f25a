//! Time-windowed suppression of repeated sightings.
//!
//! The decision and the timestamp update for one `(identity, source)` key happen
//! under a single shard lock, so two concurrent sightings inside the window can
//! never both come out [`AcceptDecision::Fresh`].

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::shard::ShardedMap;
use crate::types::{SightingSource, Timestamp};

type DedupKey = (String, Option<SightingSource>);

/// Whether a sighting should be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptDecision {
    /// Not seen within the window; the key now carries this timestamp.
    Fresh,
    /// Seen within the window; nothing was updated.
    Suppressed,
}

/// Per `(identity, source)` last-accepted timestamps.
pub struct DeduplicationWindow {
    entries: ShardedMap<DedupKey, Timestamp>,
    window_ms: i64,
    eviction_age_ms: i64,
    last_eviction: AtomicI64,
}

impl DeduplicationWindow {
    /// Create a window suppressing repeats closer than `window_ms`, evicting
    /// entries untouched for `eviction_age_ms`.
    #[must_use]
    pub fn new(window_ms: i64, eviction_age_ms: i64) -> Self {
        Self {
            entries: ShardedMap::new(),
            window_ms,
            eviction_age_ms: eviction_age_ms.max(window_ms),
            last_eviction: AtomicI64::new(0),
        }
    }

    /// Decide whether a sighting at `now` is fresh, recording it if so.
    pub fn should_accept(
        &self,
        identity: &str,
        source: Option<SightingSource>,
        now: Timestamp,
    ) -> AcceptDecision {
        self.maybe_evict(now);

        let window_ms = self.window_ms;
        self.entries
            .with_entry((identity.to_owned(), source), |entry| match entry {
                Entry::Vacant(vacant) => {
                    vacant.insert(now);
                    AcceptDecision::Fresh
                }
                Entry::Occupied(mut occupied) => {
                    if now.saturating_sub(*occupied.get()) >= window_ms {
                        occupied.insert(now);
                        AcceptDecision::Fresh
                    } else {
                        AcceptDecision::Suppressed
                    }
                }
            })
    }

    /// Drop entries last accepted before `cutoff`.
    pub fn evict_older_than(&self, cutoff: Timestamp) {
        self.entries.retain(|_, accepted_at| *accepted_at >= cutoff);
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_evict(&self, now: Timestamp) {
        let last = self.last_eviction.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.eviction_age_ms {
            return;
        }
        // One caller per period does the sweep.
        if self
            .last_eviction
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let cutoff = now.saturating_sub(self.eviction_age_ms);
        self.evict_older_than(cutoff);
        tracing::trace!(remaining = self.entries.len(), "Dedup window evicted stale entries");
    }
}
