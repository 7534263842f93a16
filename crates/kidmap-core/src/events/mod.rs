//! Geofence event plumbing: the in-process bus and the software detector
//! that turns location fixes into boundary crossings.

mod bus;
mod detector;

pub use bus::{GeofenceEventBus, Listener, Subscription};
pub use detector::ZoneTransitionDetector;

use thiserror::Error;

/// A listener failed while handling an event. Caught at the bus and
/// reported; never returned to the publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("geofence listener #{subscriber_id} failed: {message}")]
pub struct ListenerError {
    pub subscriber_id: u64,
    pub message: String,
}
