//! REST client module for the transit adapter service.
//!
//! This module provides the `TransitApiClient`, the production
//! `TransitSource` used by the transit updater. Fetch failures are reported
//! as `FetchError`, which classifies each failure as transient, validation
//! or permanent so the updater knows whether a retry can help.

pub mod client;
pub mod error;

pub use client::TransitApiClient;
pub use error::FetchError;
