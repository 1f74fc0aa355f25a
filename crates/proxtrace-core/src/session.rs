//! Visibility sessions per transport endpoint.
//!
//! A session opens when a transport reports an endpoint and closes when it is
//! lost. Sessions are keyed by the transport-local endpoint key, so the same
//! identity may hold several sessions at once (one per transport handle).
//! Operations on one key are serialized by its shard lock.

use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};

use crate::shard::ShardedMap;
use crate::types::{SessionDuration, Timestamp};

/// An open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSession {
    /// Transport-local handle.
    pub endpoint_key: String,
    /// Identity resolved for the endpoint.
    pub identity: String,
    /// When the session opened; matches the sighting row timestamp.
    pub opened_at: Timestamp,
}

impl EndpointSession {
    fn duration_at(&self, now: Timestamp) -> SessionDuration {
        SessionDuration {
            identity: self.identity.clone(),
            opened_at: self.opened_at,
            duration: now.saturating_sub(self.opened_at).max(0),
        }
    }
}

/// What `on_endpoint_seen` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenOutcome {
    /// A new session was opened.
    Opened,
    /// A session for the same identity was already open; left untouched.
    AlreadyOpen,
    /// The key now resolves to a different identity; the old session closed.
    Replaced(SessionDuration),
}

/// Tracks open sessions by endpoint key.
#[derive(Default)]
pub struct SessionTracker {
    sessions: ShardedMap<String, EndpointSession>,
}

impl SessionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `endpoint_key` is visible as `identity`.
    pub fn on_endpoint_seen(
        &self,
        endpoint_key: &str,
        identity: &str,
        now: Timestamp,
    ) -> SeenOutcome {
        let opened = || EndpointSession {
            endpoint_key: endpoint_key.to_owned(),
            identity: identity.to_owned(),
            opened_at: now,
        };
        self.sessions
            .with_entry(endpoint_key.to_owned(), |entry| match entry {
                Entry::Vacant(vacant) => {
                    vacant.insert(opened());
                    SeenOutcome::Opened
                }
                Entry::Occupied(mut occupied) => {
                    if occupied.get().identity == identity {
                        SeenOutcome::AlreadyOpen
                    } else {
                        let previous = occupied.insert(opened());
                        SeenOutcome::Replaced(previous.duration_at(now))
                    }
                }
            })
    }

    /// Close the session for `endpoint_key`, returning its final duration.
    pub fn on_endpoint_lost(&self, endpoint_key: &str, now: Timestamp) -> Option<SessionDuration> {
        self.sessions
            .remove(&endpoint_key.to_owned())
            .map(|session| session.duration_at(now))
    }

    /// Current duration of every open session. Sessions stay open and keep
    /// their start time.
    pub fn flush_all(&self, now: Timestamp) -> Vec<SessionDuration> {
        let mut durations = Vec::new();
        self.sessions
            .for_each_mut(|_, session| durations.push(session.duration_at(now)));
        durations
    }

    /// Close every session, returning final durations.
    pub fn close_all(&self, now: Timestamp) -> Vec<SessionDuration> {
        self.sessions
            .drain()
            .into_iter()
            .map(|(_, session)| session.duration_at(now))
            .collect()
    }

    /// `true` if a session is open for `endpoint_key`.
    #[must_use]
    pub fn is_open(&self, endpoint_key: &str) -> bool {
        self.sessions.contains_key(&endpoint_key.to_owned())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;

    const ID: &str = "nov20-abc123456789";

    #[test]
    fn test_seen_then_lost_reports_duration() {
        let tracker = SessionTracker::new();
        assert_eq!(
            tracker.on_endpoint_seen("AA:BB", ID, 1_000),
            SeenOutcome::Opened
        );
        let closed = tracker.on_endpoint_lost("AA:BB", 61_000).unwrap();
        assert_eq!(closed.identity, ID);
        assert_eq!(closed.opened_at, 1_000);
        assert_eq!(closed.duration, 60_000);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_lost_without_session() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.on_endpoint_lost("AA:BB", 1_000), None);
    }

    #[test]
    fn test_repeat_seen_keeps_open_time() {
        let tracker = SessionTracker::new();
        tracker.on_endpoint_seen("AA:BB", ID, 1_000);
        assert_eq!(
            tracker.on_endpoint_seen("AA:BB", ID, 5_000),
            SeenOutcome::AlreadyOpen
        );
        assert_eq!(tracker.on_endpoint_lost("AA:BB", 9_000).unwrap().duration, 8_000);
    }

    #[test]
    fn test_identity_change_closes_previous_session() {
        let tracker = SessionTracker::new();
        tracker.on_endpoint_seen("AA:BB", ID, 1_000);
        let outcome = tracker.on_endpoint_seen("AA:BB", "nov20-other0000000", 4_000);
        assert_eq!(
            outcome,
            SeenOutcome::Replaced(SessionDuration {
                identity: ID.into(),
                opened_at: 1_000,
                duration: 3_000,
            })
        );
        let closed = tracker.on_endpoint_lost("AA:BB", 10_000).unwrap();
        assert_eq!(closed.identity, "nov20-other0000000");
        assert_eq!(closed.duration, 6_000);
    }

    #[test]
    fn test_flush_does_not_reset_open_time() {
        let tracker = SessionTracker::new();
        tracker.on_endpoint_seen("AA:BB", ID, 0);
        tracker.on_endpoint_seen("endpoint-7", ID, 10_000);

        let mut flushed = tracker.flush_all(60_000);
        flushed.sort_by_key(|d| d.opened_at);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].duration, 60_000);
        assert_eq!(flushed[1].duration, 50_000);
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.on_endpoint_lost("AA:BB", 90_000).unwrap().duration, 90_000);
    }

    #[test]
    fn test_close_all_empties_tracker() {
        let tracker = SessionTracker::new();
        tracker.on_endpoint_seen("a", ID, 0);
        tracker.on_endpoint_seen("b", ID, 0);
        let closed = tracker.close_all(5_000);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|d| d.duration == 5_000));
        assert!(!tracker.is_open("a"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clock_skew_never_yields_negative_duration() {
        let tracker = SessionTracker::new();
        tracker.on_endpoint_seen("a", ID, 10_000);
        assert_eq!(tracker.on_endpoint_lost("a", 5_000).unwrap().duration, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lost_closes_session_once() {
        let tracker = Arc::new(SessionTracker::new());

        let seen = (0..16).map(|i| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.on_endpoint_seen("AA:BB", ID, 1_000 + i) })
        });
        let opened = join_all(seen)
            .await
            .into_iter()
            .map(Result::unwrap)
            .filter(|outcome| *outcome == SeenOutcome::Opened)
            .count();
        assert_eq!(opened, 1);

        let lost = (0..16).map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.on_endpoint_lost("AA:BB", 61_000) })
        });
        let closed: Vec<SessionDuration> = join_all(lost)
            .await
            .into_iter()
            .filter_map(Result::unwrap)
            .collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].identity, ID);
        assert!(closed[0].duration > 59_000 && closed[0].duration <= 60_000);
        assert!(tracker.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_seen_and_lost_close_every_session_once() {
        const IDENTITIES: [&str; 2] = [ID, "nov20-other0000000"];
        let tracker = Arc::new(SessionTracker::new());

        let tasks = (0..8_i64).map(|worker| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let (mut opened, mut closed) = (0_usize, 0_usize);
                for round in 0..200_i64 {
                    let now = round * 10 + worker;
                    let identity = IDENTITIES[usize::try_from((round + worker) % 2).unwrap()];
                    match tracker.on_endpoint_seen("AA:BB", identity, now) {
                        SeenOutcome::Opened => opened += 1,
                        SeenOutcome::Replaced(_) => {
                            opened += 1;
                            closed += 1;
                        }
                        SeenOutcome::AlreadyOpen => {}
                    }
                    if round % 3 == 0 && tracker.on_endpoint_lost("AA:BB", now + 5).is_some() {
                        closed += 1;
                    }
                }
                (opened, closed)
            })
        });

        let (opened, mut closed) = join_all(tasks)
            .await
            .into_iter()
            .map(Result::unwrap)
            .fold((0, 0), |(o, c), (opened, closed)| (o + opened, c + closed));
        closed += tracker.close_all(10_000).len();

        assert!(opened > 0);
        assert_eq!(opened, closed);
        assert!(tracker.is_empty());
    }
}
