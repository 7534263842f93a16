//! Child-facing navigation models read by the parent dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// A photo the child took to confirm arrival somewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PhotoCheckIn {
    pub id: String,
    pub place_id: String,
    pub place_name: String,
    pub photo_url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub is_location_verified: Option<bool>,
    #[serde(default)]
    pub distance_from_place_m: Option<f64>,
}

/// Fields supplied when recording a new photo check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhotoCheckIn {
    pub place_id: String,
    pub place_name: String,
    pub photo_url: String,
    #[serde(default)]
    pub notes: Option<String>,
}
