use thiserror::Error;

/// Why `update_region_transit_data` failed.
///
/// Cloneable so that every caller coalesced onto one in-flight update gets
/// its own copy of the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Network trouble or timeouts that outlasted the retry budget.
    #[error("transit fetch for {region_id} failed after {attempts} attempt(s): {message}")]
    TransientFetch {
        region_id: String,
        attempts: u32,
        message: String,
    },

    /// The payload was malformed. Never retried.
    #[error("invalid transit data for {region_id}: {message}")]
    Validation { region_id: String, message: String },

    /// The source refused the request outright (unknown region, bad key...).
    #[error("transit fetch for {region_id} rejected: {message}")]
    Permanent { region_id: String, message: String },

    /// The background update task died before producing a result.
    #[error("transit update task for {region_id} aborted: {message}")]
    Aborted { region_id: String, message: String },
}

impl UpdateError {
    pub fn region_id(&self) -> &str {
        match self {
            UpdateError::TransientFetch { region_id, .. }
            | UpdateError::Validation { region_id, .. }
            | UpdateError::Permanent { region_id, .. }
            | UpdateError::Aborted { region_id, .. } => region_id,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpdateError::TransientFetch { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, UpdateError::Validation { .. })
    }
}
