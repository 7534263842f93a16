use std::collections::HashMap;

use tracing::trace;

use crate::geo::{GeoPoint, ZoneGeometry};
use crate::models::{GeofenceEvent, GeofenceKind, SafeZone};

/// Turns a stream of location fixes into ENTER/EXIT events.
///
/// The first fix seen for a zone only establishes whether the child is
/// inside; events are emitted on later changes. Fixes less accurate than
/// the configured limit are ignored.
#[derive(Debug, Clone, Default)]
pub struct ZoneTransitionDetector {
    zones: Vec<TrackedZone>,
    max_accuracy_m: Option<f64>,
}

#[derive(Debug, Clone)]
struct TrackedZone {
    id: String,
    geometry: ZoneGeometry,
    inside: Option<bool>,
}

impl ZoneTransitionDetector {
    pub fn new<I>(zones: I) -> Self
    where
        I: IntoIterator<Item = (String, ZoneGeometry)>,
    {
        let mut detector = Self::default();
        detector.set_zones(zones);
        detector
    }

    pub fn from_safe_zones(zones: &[SafeZone]) -> Self {
        Self::new(zones.iter().map(|z| (z.id.clone(), z.geometry.clone())))
    }

    /// Ignore fixes whose reported accuracy is worse than `meters`.
    pub fn with_max_accuracy(mut self, meters: f64) -> Self {
        self.max_accuracy_m = Some(meters);
        self
    }

    /// Replace the watched zones. Zones that stay keep their inside/outside
    /// state; new ones start unknown.
    pub fn set_zones<I>(&mut self, zones: I)
    where
        I: IntoIterator<Item = (String, ZoneGeometry)>,
    {
        let mut previous: HashMap<String, Option<bool>> = self
            .zones
            .drain(..)
            .map(|z| (z.id, z.inside))
            .collect();
        self.zones = zones
            .into_iter()
            .map(|(id, geometry)| {
                let inside = previous.remove(&id).flatten();
                TrackedZone { id, geometry, inside }
            })
            .collect();
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Last known containment for a zone, if a fix has been seen.
    pub fn is_inside(&self, zone_id: &str) -> Option<bool> {
        self.zones.iter().find(|z| z.id == zone_id)?.inside
    }

    /// Feed one fix. Returns the crossings it caused, in zone order.
    pub fn observe(
        &mut self,
        point: GeoPoint,
        timestamp: i64,
        accuracy_m: Option<f64>,
    ) -> Vec<GeofenceEvent> {
        if let (Some(limit), Some(accuracy)) = (self.max_accuracy_m, accuracy_m) {
            if accuracy > limit {
                trace!(accuracy, limit, "Ignoring imprecise location fix");
                return Vec::new();
            }
        }

        let mut events = Vec::new();
        for zone in &mut self.zones {
            let now_inside = zone.geometry.contains(point);
            let kind = match (zone.inside, now_inside) {
                (Some(false), true) => Some(GeofenceKind::Enter),
                (Some(true), false) => Some(GeofenceKind::Exit),
                _ => None,
            };
            zone.inside = Some(now_inside);

            if let Some(kind) = kind {
                let mut event = match kind {
                    GeofenceKind::Enter => GeofenceEvent::enter(zone.id.clone(), timestamp),
                    GeofenceKind::Exit => GeofenceEvent::exit(zone.id.clone(), timestamp),
                };
                event.accuracy_meters = accuracy_m;
                events.push(event);
            }
        }
        events
    }
}
