//! Data models for the KidMap safety core.
//!
//! - `GeofenceEvent`: zone crossings delivered over the event bus
//! - `SafeZone`, `CheckInRequest`, `EmergencyContact`: parental state
//! - `TransitDataset`, `TransitFeed`, `RegionConfig`: per-region transit data
//! - `PhotoCheckIn`: child check-ins shown on the dashboard

pub mod geofence;
pub mod navigation;
pub mod parental;
pub mod transit;

use rand::{distributions::Alphanumeric, Rng};

pub use geofence::{EventKey, GeofenceEvent, GeofenceKind};
pub use navigation::{NewPhotoCheckIn, PhotoCheckIn};
pub use parental::{
    CheckInRequest, CheckInStatus, ContactChannel, DevicePing, EmergencyContact, LastKnownLocation,
    NewEmergencyContact, NewSafeZone, ParentalSettings, PingKind, PingResponse, PingStatus,
    RecentCheckIn, SafeZone, SafeZoneActivity, SafeZoneUpdate, ZoneNotifications, MAX_RECENT_CHECK_INS,
};
pub use transit::{
    FeedValidationError, RegionConfig, TransitDataset, TransitFeed, TransitKind, TransitSystem,
};

/// Build an id of the form `{prefix}_{millis}_{9 random chars}`.
pub(crate) fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}_{}_{}", prefix, chrono::Utc::now().timestamp_millis(), suffix)
}
