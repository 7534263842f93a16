//! KidMap safety core.
//!
//! The safety and data-freshness layer of a child-safety navigation app:
//!
//! - [`events`]: in-process geofence event bus and zone transition detection
//! - [`parental`]: safe zones, check-in requests and parent-mode PIN
//! - [`cache`]: bounded LRU+TTL region cache with optional disk warm start
//! - [`transit`]: single-flight transit updates with retry
//! - [`navigation`]: photo check-ins read by the parent dashboard
//!
//! UI, map rendering and push delivery live in the host app.

pub mod api;
pub mod cache;
pub mod config;
pub mod events;
pub mod geo;
pub mod models;
pub mod navigation;
pub mod parental;
pub mod report;
pub mod transit;

pub use api::{FetchError, TransitApiClient};
pub use cache::{CacheBackend, DiskBackend, RegionDataCache};
pub use config::Config;
pub use events::{GeofenceEventBus, ListenerError, Subscription, ZoneTransitionDetector};
pub use navigation::NavigationStore;
pub use parental::{ParentAuth, ParentalSafetyStore, StoreError};
pub use report::{ErrorReport, ErrorReporter, TracingReporter};
pub use transit::{TransitDataUpdater, TransitSource, UpdateError, UpdaterConfig};
