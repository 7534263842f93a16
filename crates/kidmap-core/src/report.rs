//! Error reporting hook for failures that must not propagate: listener
//! errors on the geofence bus and failed transit updates.
//!
//! The core never depends on a reporter for correctness. Hosts plug in their
//! crash/analytics pipeline by implementing [`ErrorReporter`]; the default
//! [`TracingReporter`] just logs.

use std::fmt;

use parking_lot::Mutex;
use tracing::error;

use crate::events::ListenerError;
use crate::transit::UpdateError;

/// Something went wrong somewhere it could not be returned to a caller.
#[derive(Debug, Clone)]
pub enum ErrorReport {
    Listener(ListenerError),
    Update(UpdateError),
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReport::Listener(e) => write!(f, "{}", e),
            ErrorReport::Update(e) => write!(f, "{}", e),
        }
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Logs every report at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: ErrorReport) {
        match &report {
            ErrorReport::Listener(e) => {
                error!(subscriber = e.subscriber_id, error = %e.message, "Geofence listener failed");
            }
            ErrorReport::Update(e) => {
                error!(region = e.region_id(), error = %e, "Transit update failed");
            }
        }
    }
}

/// Keeps every report in memory. Handy for hosts that batch uploads, and
/// for tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<ErrorReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}
