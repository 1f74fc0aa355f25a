//! New contact notifications.

use crate::types::{to_rfc3339, SightingSource, Timestamp};

/// Receives the first sighting of a never-before-seen identity.
///
/// Called from the sighting path, so implementations must return promptly and
/// hand any slow work to their own task.
pub trait NewContactNotifier: Send + Sync {
    /// A new contact was detected.
    fn notify(&self, identity: &str, source: Option<SightingSource>, timestamp: Timestamp);
}

/// Logs new contacts through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NewContactNotifier for TracingNotifier {
    fn notify(&self, identity: &str, source: Option<SightingSource>, timestamp: Timestamp) {
        tracing::info!(
            identity,
            source = source.map_or("unknown", SightingSource::as_str),
            seen_at = to_rfc3339(timestamp).as_deref().unwrap_or("invalid"),
            "New contact detected"
        );
    }
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NewContactNotifier for NoopNotifier {
    fn notify(&self, _identity: &str, _source: Option<SightingSource>, _timestamp: Timestamp) {}
}
