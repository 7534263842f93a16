//! Parental safety models: safe zones, check-in requests, emergency contacts
//! and the settings that tie them together.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, ZoneGeometry};

use super::geofence::GeofenceKind;
use super::navigation::PhotoCheckIn;

/// Default time a check-in request may stay pending before it expires.
pub const DEFAULT_CHECK_IN_TIMEOUT_SECS: i64 = 30 * 60;

/// Longest a check-in request may stay pending, whatever the settings say.
pub const MAX_CHECK_IN_TIMEOUT_SECS: i64 = 7 * 24 * 60 * 60;

/// A geofenced area considered safe for the monitored child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SafeZone {
    pub id: String,
    pub name: String,
    pub geometry: ZoneGeometry,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notifications: ZoneNotifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ZoneNotifications {
    pub on_entry: bool,
    pub on_exit: bool,
}

impl Default for ZoneNotifications {
    fn default() -> Self {
        Self {
            on_entry: true,
            on_exit: true,
        }
    }
}

/// Fields a parent provides when creating a safe zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSafeZone {
    pub name: String,
    pub geometry: ZoneGeometry,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notifications: ZoneNotifications,
}

fn default_true() -> bool {
    true
}

/// Partial update for an existing safe zone. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeZoneUpdate {
    pub name: Option<String>,
    pub geometry: Option<ZoneGeometry>,
    pub is_active: Option<bool>,
    pub notifications: Option<ZoneNotifications>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum CheckInStatus {
    Pending,
    Acknowledged,
    Expired,
}

impl CheckInStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckInStatus::Pending)
    }
}

impl std::fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckInStatus::Pending => write!(f, "Pending"),
            CheckInStatus::Acknowledged => write!(f, "Acknowledged"),
            CheckInStatus::Expired => write!(f, "Expired"),
        }
    }
}

/// A parental-attention item, raised when the child leaves a safe zone or a
/// parent asks for a check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CheckInRequest {
    pub id: String,
    pub region_id: String,
    pub status: CheckInStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_urgent: bool,
}

impl CheckInRequest {
    pub fn is_pending(&self) -> bool {
        self.status == CheckInStatus::Pending
    }

    /// True once a pending request has outlived `timeout` at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_pending() && now - self.created_at >= timeout
    }
}

/// How an emergency contact is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum ContactChannel {
    Phone(String),
    Sms(String),
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    pub channel: ContactChannel,
    pub relationship: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub can_receive_alerts: bool,
}

/// Fields for a new emergency contact; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmergencyContact {
    pub name: String,
    pub channel: ContactChannel,
    pub relationship: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub can_receive_alerts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ParentalSettings {
    pub require_pin: bool,
    pub safe_zone_alerts: bool,
    pub check_in_reminders: bool,
    pub check_in_timeout_secs: i64,
    pub emergency_contacts: Vec<EmergencyContact>,
}

impl Default for ParentalSettings {
    fn default() -> Self {
        Self {
            require_pin: true,
            safe_zone_alerts: true,
            check_in_reminders: true,
            check_in_timeout_secs: DEFAULT_CHECK_IN_TIMEOUT_SECS,
            emergency_contacts: vec![EmergencyContact {
                id: "emergency_911".to_string(),
                name: "Emergency Services".to_string(),
                channel: ContactChannel::Phone("911".to_string()),
                relationship: "Emergency".to_string(),
                is_primary: false,
                can_receive_alerts: false,
            }],
        }
    }
}

impl ParentalSettings {
    /// The configured timeout, clamped to `0..=MAX_CHECK_IN_TIMEOUT_SECS` so
    /// a hand-edited or out-of-range value still gives every request a
    /// bounded lifetime.
    pub fn check_in_timeout(&self) -> Duration {
        let secs = self
            .check_in_timeout_secs
            .clamp(0, MAX_CHECK_IN_TIMEOUT_SECS);
        Duration::try_seconds(secs).unwrap_or(Duration::zero())
    }

    pub fn primary_contact(&self) -> Option<&EmergencyContact> {
        self.emergency_contacts.iter().find(|c| c.is_primary)
    }
}

/// What a device ping asks the child's device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum PingKind {
    /// Report the current location
    Location,
    /// Play a sound until someone responds
    Ring,
    /// Show a message
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    Pending,
    Acknowledged,
    Failed,
}

impl std::fmt::Display for PingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingStatus::Pending => write!(f, "Pending"),
            PingStatus::Acknowledged => write!(f, "Acknowledged"),
            PingStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// A parent's request for the child's device to respond.
///
/// Follows the check-in lifecycle: PENDING until the device answers
/// (ACKNOWLEDGED) or it outlives the check-in timeout (FAILED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DevicePing {
    pub id: String,
    pub kind: PingKind,
    #[serde(default)]
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub status: PingStatus,
    #[serde(default)]
    pub response: Option<PingResponse>,
}

impl DevicePing {
    pub fn is_pending(&self) -> bool {
        self.status == PingStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_pending() && now - self.requested_at >= timeout
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PingResponse {
    pub responded_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Most recent child check-ins shown on the dashboard
pub const MAX_RECENT_CHECK_INS: usize = 10;

/// A place the child checked in at, as summarized for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RecentCheckIn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub place_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl From<&PhotoCheckIn> for RecentCheckIn {
    fn from(check_in: &PhotoCheckIn) -> Self {
        Self {
            id: check_in.id.clone(),
            timestamp: check_in.timestamp,
            place_name: check_in.place_name.clone(),
            photo_url: Some(check_in.photo_url.clone()),
            location: check_in.location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LastKnownLocation {
    pub location: GeoPoint,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub place_name: Option<String>,
}

/// Dashboard log entry for a zone crossing the store applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SafeZoneActivity {
    pub id: String,
    pub zone_id: String,
    pub zone_name: String,
    pub kind: GeofenceKind,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: CheckInStatus, age_minutes: i64) -> CheckInRequest {
        CheckInRequest {
            id: "r1".to_string(),
            region_id: "home".to_string(),
            status,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            responded_at: None,
            message: None,
            is_urgent: false,
        }
    }

    #[test]
    fn test_is_overdue() {
        let timeout = Duration::minutes(30);
        assert!(!request(CheckInStatus::Pending, 5).is_overdue(Utc::now(), timeout));
        assert!(request(CheckInStatus::Pending, 31).is_overdue(Utc::now(), timeout));
        // Terminal requests are never overdue
        assert!(!request(CheckInStatus::Acknowledged, 90).is_overdue(Utc::now(), timeout));
    }

    #[test]
    fn test_default_settings_have_emergency_services() {
        let settings = ParentalSettings::default();
        assert_eq!(settings.emergency_contacts.len(), 1);
        assert_eq!(
            settings.emergency_contacts[0].channel,
            ContactChannel::Phone("911".to_string())
        );
        assert!(settings.primary_contact().is_none());
        assert_eq!(settings.check_in_timeout(), Duration::minutes(30));
    }

    #[test]
    fn test_check_in_timeout_is_clamped() {
        let mut settings = ParentalSettings::default();

        settings.check_in_timeout_secs = i64::MAX;
        assert_eq!(
            settings.check_in_timeout(),
            Duration::seconds(MAX_CHECK_IN_TIMEOUT_SECS)
        );

        settings.check_in_timeout_secs = i64::MIN;
        assert_eq!(settings.check_in_timeout(), Duration::zero());

        settings.check_in_timeout_secs = -5;
        assert_eq!(settings.check_in_timeout(), Duration::zero());
    }

    #[test]
    fn test_ping_overdue_only_while_pending() {
        let mut ping = DevicePing {
            id: "p1".to_string(),
            kind: PingKind::Ring,
            message: None,
            requested_at: Utc::now() - Duration::minutes(45),
            status: PingStatus::Pending,
            response: None,
        };
        let timeout = Duration::minutes(30);
        assert!(ping.is_overdue(Utc::now(), timeout));
        ping.status = PingStatus::Acknowledged;
        assert!(!ping.is_overdue(Utc::now(), timeout));
    }

    #[test]
    fn test_old_check_in_json_defaults_to_not_urgent() {
        let request: CheckInRequest = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "region_id": "home",
            "status": "pending",
            "created_at": "2026-10-01T08:00:00Z",
            "responded_at": null
        }))
        .unwrap();
        assert!(!request.is_urgent);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!CheckInStatus::Pending.is_terminal());
        assert!(CheckInStatus::Acknowledged.is_terminal());
        assert!(CheckInStatus::Expired.is_terminal());
    }
}
