//! Parental safety: the state store that reacts to geofence events, and
//! PIN-gated parent mode.

mod auth;
mod secrets;
mod store;

pub use auth::{is_valid_pin, AuthError, ParentAuth};
pub use secrets::{KeyringSecretStore, MemorySecretStore, SecretStore, SERVICE_NAME};
pub use store::{
    EventOutcome, ParentalSafetyStore, ParentalSnapshot, StoreError, DEDUP_WINDOW,
    MAX_ACTIVITY_ENTRIES,
};
