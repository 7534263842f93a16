//! Keeping region transit data fresh.
//!
//! [`TransitDataUpdater`] pulls feeds through a [`TransitSource`], retries
//! transient failures per [`RetryPolicy`] and writes validated datasets into
//! the shared region cache.

mod error;
mod retry;
mod source;
mod updater;

pub use error::UpdateError;
pub use retry::{RetryDecision, RetryPolicy};
pub use source::TransitSource;
pub use updater::{TransitDataUpdater, UpdaterConfig};
