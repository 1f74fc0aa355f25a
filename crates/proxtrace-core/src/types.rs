//! Shared types and OpenAPI schemas.
//!
//! Timestamps are milliseconds since the Unix epoch throughout the crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::IdentityRejection;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Render a millisecond timestamp as RFC 3339, if it is in range.
#[must_use]
pub fn to_rfc3339(timestamp: Timestamp) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp).map(|dt| dt.to_rfc3339())
}

/// The transport that produced a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SightingSource {
    /// Bluetooth classic discovery.
    Bluetooth,
    /// BLE scan matching the advertised local name.
    BleName,
    /// BLE GATT client reading the identity characteristic.
    BleClient,
    /// BLE GATT server receiving a write from a peer.
    BleServer,
    /// iBeacon-style broadcast.
    BleBeacon,
    /// Nearby connections endpoint discovery.
    NearbyConnections,
    /// Nearby messages subscription.
    NearbyMessages,
    /// Replay of a cached BLE address to identity mapping.
    BleCache,
}

impl SightingSource {
    /// Every source, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Bluetooth,
        Self::BleName,
        Self::BleClient,
        Self::BleServer,
        Self::BleBeacon,
        Self::NearbyConnections,
        Self::NearbyMessages,
        Self::BleCache,
    ];

    /// Human readable technology name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bluetooth => "bluetooth",
            Self::BleName => "ble discovery",
            Self::BleClient => "ble client",
            Self::BleServer => "ble server",
            Self::BleBeacon => "ble beacon",
            Self::NearbyConnections => "nearby connections",
            Self::NearbyMessages => "nearby messages",
            Self::BleCache => "ble cache",
        }
    }
}

impl fmt::Display for SightingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a remote identity by one transport at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Sighting {
    /// Raw identity as detected, not yet validated.
    #[schema(example = "nov20-abc123456789")]
    pub identity: String,

    /// Producing transport, if it can be attributed.
    pub source: Option<SightingSource>,

    /// When the peer was seen (ms since epoch).
    #[schema(example = 1_700_000_000_000_i64)]
    pub timestamp: Timestamp,

    /// RSSI in dBm.
    #[serde(default)]
    pub signal_strength: Option<i32>,

    /// Estimated distance in centimetres.
    #[serde(default)]
    pub distance_estimate: Option<i32>,

    /// Transport-local handle such as a MAC address or endpoint id.
    #[serde(default)]
    pub endpoint_key: Option<String>,

    /// Whether the host app was in the background.
    #[serde(default)]
    pub captured_in_background: bool,
}

impl Sighting {
    /// Create a sighting with no optional measurements.
    pub fn new(
        identity: impl Into<String>,
        source: Option<SightingSource>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            identity: identity.into(),
            source,
            timestamp,
            signal_strength: None,
            distance_estimate: None,
            endpoint_key: None,
            captured_in_background: false,
        }
    }

    /// Attach an RSSI reading.
    #[must_use]
    pub fn with_signal_strength(mut self, rssi: i32) -> Self {
        self.signal_strength = Some(rssi);
        self
    }

    /// Attach a distance estimate.
    #[must_use]
    pub fn with_distance(mut self, distance: i32) -> Self {
        self.distance_estimate = Some(distance);
        self
    }

    /// Attach the transport-local endpoint key.
    #[must_use]
    pub fn with_endpoint_key(mut self, key: impl Into<String>) -> Self {
        self.endpoint_key = Some(key.into());
        self
    }

    /// Mark the sighting as captured while in the background.
    #[must_use]
    pub fn in_background(mut self) -> Self {
        self.captured_in_background = true;
        self
    }
}

/// A row to append to the contact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContactRecord {
    /// Validated identity.
    pub identity: String,
    /// Sighting timestamp; together with `identity` it keys duration updates.
    pub first_seen_at: Timestamp,
    /// Producing transport.
    pub source: Option<SightingSource>,
    /// RSSI in dBm.
    pub signal_strength: Option<i32>,
    /// Estimated distance.
    pub distance_estimate: Option<i32>,
    /// Whether captured in the background.
    pub captured_in_background: bool,
}

impl From<&Sighting> for NewContactRecord {
    fn from(sighting: &Sighting) -> Self {
        Self {
            identity: sighting.identity.clone(),
            first_seen_at: sighting.timestamp,
            source: sighting.source,
            signal_strength: sighting.signal_strength,
            distance_estimate: sighting.distance_estimate,
            captured_in_background: sighting.captured_in_background,
        }
    }
}

/// A persisted contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContactRecord {
    /// Store-assigned id.
    pub id: i64,

    /// Remote identity.
    #[schema(example = "nov20-abc123456789")]
    pub identity: String,

    /// When the sighting happened (ms since epoch).
    pub first_seen_at: Timestamp,

    /// Producing transport.
    pub source: Option<SightingSource>,

    /// Session duration in ms, set once the session closes or checkpoints.
    pub duration: Option<i64>,

    /// Estimated distance.
    pub distance_estimate: Option<i32>,

    /// RSSI in dBm.
    pub signal_strength: Option<i32>,

    /// Whether captured in the background.
    pub captured_in_background: bool,
}

impl ContactRecord {
    /// Materialize a new row with the given id.
    #[must_use]
    pub fn from_new(id: i64, record: NewContactRecord) -> Self {
        Self {
            id,
            identity: record.identity,
            first_seen_at: record.first_seen_at,
            source: record.source,
            duration: None,
            distance_estimate: record.distance_estimate,
            signal_strength: record.signal_strength,
            captured_in_background: record.captured_in_background,
        }
    }
}

/// Outcome of reporting a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DetectionResult {
    /// The identity failed validation; nothing was recorded.
    Rejected {
        /// Why the identity was refused.
        reason: IdentityRejection,
    },
    /// Valid identity already recorded for this source within the dedup window.
    SuppressedDuplicate,
    /// A new row was recorded.
    Accepted {
        /// First ever sighting of this identity.
        is_new_contact: bool,
    },
}

impl DetectionResult {
    /// `true` when the identity is legitimate, whether or not it was recorded.
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Duration emitted when a session closes or checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionDuration {
    /// Identity the session belongs to.
    pub identity: String,
    /// Session start; matches the sighting row timestamp.
    pub opened_at: Timestamp,
    /// Elapsed milliseconds.
    pub duration: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_serialization() {
        let json = serde_json::to_string(&SightingSource::NearbyConnections).unwrap();
        assert_eq!(json, "\"nearby_connections\"");
        assert_eq!(SightingSource::BleClient.to_string(), "ble client");
    }

    #[test]
    fn test_detection_result_serialization() {
        let json = serde_json::to_string(&DetectionResult::Accepted {
            is_new_contact: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"result":"accepted","is_new_contact":true}"#);

        let json = serde_json::to_string(&DetectionResult::SuppressedDuplicate).unwrap();
        assert_eq!(json, r#"{"result":"suppressed_duplicate"}"#);
    }

    #[test]
    fn test_recognized_results() {
        assert!(DetectionResult::SuppressedDuplicate.is_recognized());
        assert!(DetectionResult::Accepted {
            is_new_contact: false
        }
        .is_recognized());
        assert!(!DetectionResult::Rejected {
            reason: IdentityRejection::MissingPrefix
        }
        .is_recognized());
    }

    #[test]
    fn test_sighting_deserializes_without_optionals() {
        let json = r#"{"identity":"nov20-abc123456789","source":"ble_client","timestamp":1000}"#;
        let sighting: Sighting = serde_json::from_str(json).unwrap();
        assert_eq!(sighting.source, Some(SightingSource::BleClient));
        assert_eq!(sighting.endpoint_key, None);
        assert!(!sighting.captured_in_background);
    }

    #[test]
    fn test_rfc3339_rendering() {
        assert_eq!(to_rfc3339(0).as_deref(), Some("1970-01-01T00:00:00+00:00"));
    }
}
