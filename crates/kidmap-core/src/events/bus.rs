//! Synchronous publish/subscribe for geofence events.
//!
//! `publish` walks a snapshot of the registry in registration order and
//! returns only after every listener ran. Listeners may subscribe or
//! unsubscribe from inside a callback; a listener added mid-publish first
//! sees the next event, and one removed mid-publish is skipped if it has
//! not been reached yet.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::models::GeofenceEvent;
use crate::report::{ErrorReport, ErrorReporter, TracingReporter};

use super::ListenerError;

/// Callback invoked for every published event.
pub type Listener = dyn Fn(&GeofenceEvent) -> anyhow::Result<()> + Send + Sync;

/// Fan-out point between location monitoring and its consumers.
///
/// Clones share one registry. Once the last clone is dropped every
/// outstanding [`Subscription`] becomes inert.
#[derive(Clone)]
pub struct GeofenceEventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    // Ids only grow, so key order is registration order
    listeners: Mutex<BTreeMap<u64, Arc<Listener>>>,
    next_id: AtomicU64,
    reporter: Arc<dyn ErrorReporter>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }
}

/// Handle returned by [`GeofenceEventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[must_use = "keep the subscription to be able to unsubscribe later"]
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery to this listener. Safe to call any number of times,
    /// and after the bus is gone.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(self.id) {
                debug!(subscriber = self.id, "Geofence listener unsubscribed");
            }
        }
    }

    /// Whether the listener is still registered on a live bus.
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| bus.listeners.lock().contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl Default for GeofenceEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl GeofenceEventBus {
    /// Bus that logs listener failures through `tracing`.
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(TracingReporter))
    }

    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                reporter,
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GeofenceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        debug!(subscriber = id, "Geofence listener subscribed");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// A listener that errors or panics is reported and skipped; the rest
    /// still run. Returns how many listeners completed successfully.
    pub fn publish(&self, event: &GeofenceEvent) -> usize {
        let snapshot: Vec<(u64, Arc<Listener>)> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        trace!(
            kind = %event.kind,
            region = %event.region_id,
            listeners = snapshot.len(),
            "Publishing geofence event"
        );

        let mut delivered = 0;
        for (id, listener) in snapshot {
            if !self.inner.listeners.lock().contains_key(&id) {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => panic_message(payload.as_ref()),
            };

            self.inner.reporter.report(ErrorReport::Listener(ListenerError {
                subscriber_id: id,
                message,
            }));
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Drop every listener. Existing subscriptions become no-ops.
    pub fn clear_listeners(&self) {
        self.inner.listeners.lock().clear();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
