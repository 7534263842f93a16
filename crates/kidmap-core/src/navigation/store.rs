use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::geo::{verify_proximity, GeoPoint, ProximityCheck};
use crate::models::{generate_id, NewPhotoCheckIn, PhotoCheckIn};

/// A photo check-in counts as verified within this distance of the place
pub const VERIFICATION_RADIUS_M: f64 = 100.0;

/// Photo check-ins recorded by the child, oldest first.
#[derive(Debug, Default)]
pub struct NavigationStore {
    photo_check_ins: RwLock<Vec<PhotoCheckIn>>,
}

impl NavigationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_check_ins(check_ins: Vec<PhotoCheckIn>) -> Self {
        Self {
            photo_check_ins: RwLock::new(check_ins),
        }
    }

    /// All check-ins in the order they were recorded.
    pub fn photo_check_ins(&self) -> Vec<PhotoCheckIn> {
        self.photo_check_ins.read().clone()
    }

    /// Up to `limit` check-ins, newest first.
    pub fn recent_photo_check_ins(&self, limit: usize) -> Vec<PhotoCheckIn> {
        let mut check_ins = self.photo_check_ins();
        // Stable sort keeps insertion order for equal timestamps; reversing
        // then puts the later insert first.
        check_ins.sort_by_key(|c| c.timestamp);
        check_ins.reverse();
        check_ins.truncate(limit);
        check_ins
    }

    pub fn photo_check_ins_for_place(&self, place_id: &str) -> Vec<PhotoCheckIn> {
        self.photo_check_ins
            .read()
            .iter()
            .filter(|c| c.place_id == place_id)
            .cloned()
            .collect()
    }

    pub fn add_photo_check_in(&self, check_in: NewPhotoCheckIn) -> PhotoCheckIn {
        let record = Self::build(check_in);
        debug!(place = %record.place_id, "Photo check-in recorded");
        self.photo_check_ins.write().push(record.clone());
        record
    }

    /// Record a check-in taken at `current` for a place at `place`,
    /// noting whether the child was within [`VERIFICATION_RADIUS_M`].
    pub fn add_location_verified_photo_check_in(
        &self,
        check_in: NewPhotoCheckIn,
        current: GeoPoint,
        place: GeoPoint,
    ) -> (PhotoCheckIn, ProximityCheck) {
        let verification = verify_proximity(current, place, VERIFICATION_RADIUS_M);
        let mut record = Self::build(check_in);
        record.location = Some(current);
        record.is_location_verified = Some(verification.is_within_radius);
        record.distance_from_place_m = Some(verification.distance_m);

        info!(
            place = %record.place_id,
            verified = verification.is_within_radius,
            distance_m = verification.distance_m.round() as i64,
            "Location-verified photo check-in recorded"
        );
        self.photo_check_ins.write().push(record.clone());
        (record, verification)
    }

    fn build(check_in: NewPhotoCheckIn) -> PhotoCheckIn {
        PhotoCheckIn {
            id: generate_id("photo"),
            place_id: check_in.place_id,
            place_name: check_in.place_name,
            photo_url: check_in.photo_url,
            timestamp: Utc::now(),
            notes: check_in.notes,
            location: None,
            is_location_verified: None,
            distance_from_place_m: None,
        }
    }
}
