//! Geofence crossing events as delivered by location monitoring.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum GeofenceKind {
    #[serde(alias = "entry")]
    Enter,
    Exit,
}

impl std::fmt::Display for GeofenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeofenceKind::Enter => write!(f, "enter"),
            GeofenceKind::Exit => write!(f, "exit"),
        }
    }
}

/// One physical boundary crossing. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct GeofenceEvent {
    #[serde(rename = "type")]
    pub kind: GeofenceKind,
    #[serde(rename = "regionId")]
    pub region_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "accuracyMeters", default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

/// Identity of an event for duplicate detection.
pub type EventKey = (GeofenceKind, String, i64);

impl GeofenceEvent {
    pub fn enter(region_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind: GeofenceKind::Enter,
            region_id: region_id.into(),
            timestamp,
            accuracy_meters: None,
        }
    }

    pub fn exit(region_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind: GeofenceKind::Exit,
            region_id: region_id.into(),
            timestamp,
            accuracy_meters: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_meters = Some(meters);
        self
    }

    pub fn key(&self) -> EventKey {
        (self.kind, self.region_id.clone(), self.timestamp)
    }
}
