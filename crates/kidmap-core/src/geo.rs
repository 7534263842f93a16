//! Geographic helpers: great-circle distance and safe-zone containment.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_m(*self, *other)
    }
}

/// Haversine distance between two points, in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Shape of a safe zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum ZoneGeometry {
    Circle { center: GeoPoint, radius_m: f64 },
    Polygon { vertices: Vec<GeoPoint> },
}

impl ZoneGeometry {
    pub fn circle(center: GeoPoint, radius_m: f64) -> Self {
        ZoneGeometry::Circle { center, radius_m }
    }

    /// Whether `point` lies inside the zone. Circle boundaries count as inside.
    pub fn contains(&self, point: GeoPoint) -> bool {
        match self {
            ZoneGeometry::Circle { center, radius_m } => haversine_m(*center, point) <= *radius_m,
            ZoneGeometry::Polygon { vertices } => polygon_contains(vertices, point),
        }
    }
}

/// Even-odd ray casting on raw lat/lon. Fine for zones a few km across.
fn polygon_contains(vertices: &[GeoPoint], point: GeoPoint) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Result of checking whether a location is close enough to a place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityCheck {
    pub is_within_radius: bool,
    pub distance_m: f64,
}

pub fn verify_proximity(current: GeoPoint, target: GeoPoint, radius_m: f64) -> ProximityCheck {
    let distance_m = haversine_m(current, target);
    ProximityCheck {
        is_within_radius: distance_m <= radius_m,
        distance_m,
    }
}
