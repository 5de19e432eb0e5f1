//! Shared types and OpenAPI schemas.
//!
//! Position samples flow in, notification events flow out. Both are plain data
//! and are shared between the engine, the HTTP API, and the external collaborators.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::geo::Coordinates;

/// Stable identifier of a mesh node (e.g. `!a1b2c3d4`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "!a1b2c3d4")]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a raw node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fallback display name built from the last four characters of the id.
    #[must_use]
    pub fn short_label(&self) -> String {
        let tail: String = {
            let chars: Vec<char> = self.0.chars().collect();
            let start = chars.len().saturating_sub(4);
            chars[start..].iter().collect()
        };
        format!("Node {tail}")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which producer a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// The locally attached GPS receiver.
    Local,
    /// A position packet heard on the mesh.
    Mesh,
}

impl SampleSource {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Mesh => "mesh",
        }
    }
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single position fix as delivered by a position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "source": "mesh",
    "node_id": "!a1b2c3d4",
    "name": "Trail Runner",
    "latitude": 47.6062,
    "longitude": -122.3321,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct PositionSample {
    /// Producer that delivered the sample.
    pub source: SampleSource,

    /// Node the sample describes. Local samples are re-keyed to the configured local id.
    pub node_id: NodeId,

    /// Display name advertised by the node, if known.
    #[serde(default)]
    pub name: Option<String>,

    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    /// The sample's coordinates.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// The sample as a stored position.
    #[must_use]
    pub const fn position(&self) -> Position {
        Position {
            coordinates: Coordinates::new(self.latitude, self.longitude),
            timestamp: self.timestamp,
        }
    }
}

/// A timestamped position held in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Position {
    /// Where the node was.
    #[serde(flatten)]
    pub coordinates: Coordinates,

    /// When it was there.
    pub timestamp: DateTime<Utc>,
}

/// Mesh channel a notification is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Channel index 0, readable by everyone on the mesh.
    Primary,
    /// The first secondary channel, encrypted with the configured PSK.
    Private,
}

impl Channel {
    /// Meshtastic channel index for this channel.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Private => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Private => f.write_str("private"),
        }
    }
}

/// What changed for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The node moved inside a geofence.
    Enter,
    /// The node left a geofence.
    Exit,
    /// The distance to the local node changed by more than the threshold.
    DistanceThreshold,
    /// The node has not moved beyond epsilon for the duration threshold.
    Stationary,
    /// A stationary node moved beyond epsilon.
    MovingAgain,
}

impl EventKind {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::DistanceThreshold => "distance_threshold",
            Self::Stationary => "stationary",
            Self::MovingAgain => "moving_again",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a notification for cool-down purposes: `(kind, geofence?)` per node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotifyKey {
    /// Event kind.
    pub kind: EventKind,
    /// Geofence name for enter/exit events.
    pub geofence: Option<String>,
}

/// Numeric details carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct EventPayload {
    /// Distance that triggered the event, in kilometers.
    ///
    /// Geofence events: distance to the geofence center. Distance events: current
    /// distance to the local node. Motion events: largest movement in the window.
    #[schema(example = 4.45)]
    pub distance_km: f64,

    /// Geofence radius for enter/exit events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,

    /// Previously notified distance for distance-threshold events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_km: Option<f64>,

    /// Length of the analysed window for motion events, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<i64>,
}

/// An immutable notification event produced by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "kind": "exit",
    "node_id": "!a1b2c3d4",
    "node_name": "Trail Runner",
    "geofence": "Base Camp",
    "timestamp": "2025-01-15T03:30:00Z",
    "payload": { "distance_km": 5.56, "radius_km": 5.0 }
}))]
pub struct NotificationEvent {
    /// What happened.
    pub kind: EventKind,

    /// Node the event is about.
    pub node_id: NodeId,

    /// Display name of the node at the time of the event.
    #[serde(default)]
    pub node_name: Option<String>,

    /// Geofence name, present for enter/exit.
    #[serde(default)]
    pub geofence: Option<String>,

    /// When the evaluator observed the change.
    pub timestamp: DateTime<Utc>,

    /// Numeric details.
    pub payload: EventPayload,
}

impl NotificationEvent {
    /// Geofence entry.
    #[must_use]
    pub fn enter(
        node_id: NodeId,
        node_name: Option<String>,
        geofence: &str,
        distance_km: f64,
        radius_km: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::membership(
            EventKind::Enter,
            node_id,
            node_name,
            geofence,
            distance_km,
            radius_km,
            timestamp,
        )
    }

    /// Geofence exit.
    #[must_use]
    pub fn exit(
        node_id: NodeId,
        node_name: Option<String>,
        geofence: &str,
        distance_km: f64,
        radius_km: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::membership(
            EventKind::Exit,
            node_id,
            node_name,
            geofence,
            distance_km,
            radius_km,
            timestamp,
        )
    }

    fn membership(
        kind: EventKind,
        node_id: NodeId,
        node_name: Option<String>,
        geofence: &str,
        distance_km: f64,
        radius_km: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            node_id,
            node_name,
            geofence: Some(geofence.to_string()),
            timestamp,
            payload: EventPayload {
                distance_km,
                radius_km: Some(radius_km),
                ..EventPayload::default()
            },
        }
    }

    /// Reference distance moved past the threshold.
    #[must_use]
    pub fn distance_threshold(
        node_id: NodeId,
        node_name: Option<String>,
        distance_km: f64,
        previous_km: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventKind::DistanceThreshold,
            node_id,
            node_name,
            geofence: None,
            timestamp,
            payload: EventPayload {
                distance_km,
                previous_km: Some(previous_km),
                ..EventPayload::default()
            },
        }
    }

    /// Motion state change (`Stationary` or `MovingAgain`).
    #[must_use]
    pub fn motion(
        kind: EventKind,
        node_id: NodeId,
        node_name: Option<String>,
        moved_km: f64,
        window_secs: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        debug_assert!(matches!(kind, EventKind::Stationary | EventKind::MovingAgain));
        Self {
            kind,
            node_id,
            node_name,
            geofence: None,
            timestamp,
            payload: EventPayload {
                distance_km: moved_km,
                window_secs: Some(window_secs),
                ..EventPayload::default()
            },
        }
    }

    /// Cool-down identity of this event.
    #[must_use]
    pub fn notify_key(&self) -> NotifyKey {
        NotifyKey {
            kind: self.kind,
            geofence: self.geofence.clone(),
        }
    }

    /// Name used in human-readable text.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.node_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.node_id.short_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_label_uses_last_four_chars() {
        assert_eq!(NodeId::new("!a1b2c3d4").short_label(), "Node c3d4");
        assert_eq!(NodeId::new("ab").short_label(), "Node ab");
    }

    #[test]
    fn test_display_name_falls_back_to_label() {
        let event = NotificationEvent::enter(
            NodeId::new("!a1b2c3d4"),
            Some("  ".into()),
            "Base",
            1.0,
            5.0,
            Utc::now(),
        );
        assert_eq!(event.display_name(), "Node c3d4");
        assert_eq!(
            event.notify_key(),
            NotifyKey {
                kind: EventKind::Enter,
                geofence: Some("Base".into())
            }
        );
    }

    #[test]
    fn test_sample_deserializes_without_name() {
        let json = r#"{
            "source": "mesh",
            "node_id": "!0000beef",
            "latitude": 10.0,
            "longitude": 10.0,
            "timestamp": "2025-01-15T03:30:00Z"
        }"#;
        let sample: PositionSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.source, SampleSource::Mesh);
        assert_eq!(sample.node_id.as_str(), "!0000beef");
        assert!(sample.name.is_none());
    }

    #[test]
    fn test_event_serialization_omits_empty_payload_fields() {
        let event = NotificationEvent::distance_threshold(
            NodeId::new("!1"),
            None,
            2.5,
            1.0,
            Utc::now(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"distance_threshold\""));
        assert!(json.contains("\"previous_km\":1.0"));
        assert!(!json.contains("radius_km"));
    }
}
