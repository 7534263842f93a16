//! Reactive parental safety state: safe zones, check-in requests, device
//! pings, emergency contacts and the dashboard (activity log, recent
//! check-ins, last known location).
//!
//! Every mutation happens under one write lock, so a reader sees either all
//! of an event's effects or none of them. UI layers follow along through
//! [`ParentalSafetyStore::changes`].

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::{GeofenceEventBus, Subscription};
use crate::geo::GeoPoint;
use crate::models::{
    generate_id, CheckInRequest, CheckInStatus, DevicePing, EmergencyContact, EventKey,
    GeofenceEvent, GeofenceKind, LastKnownLocation, NewEmergencyContact, NewSafeZone,
    ParentalSettings, PingKind, PingResponse, PingStatus, RecentCheckIn, SafeZone,
    SafeZoneActivity, SafeZoneUpdate, MAX_RECENT_CHECK_INS,
};

/// Most recent activity entries kept for the dashboard
pub const MAX_ACTIVITY_ENTRIES: usize = 50;

/// Event keys remembered for duplicate suppression
pub const DEDUP_WINDOW: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Safe zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Check-in request not found: {0}")]
    RequestNotFound(String),

    #[error("Check-in request {id} is already {status}")]
    RequestNotPending { id: String, status: CheckInStatus },

    #[error("Emergency contact not found: {0}")]
    ContactNotFound(String),

    #[error("Device ping not found: {0}")]
    PingNotFound(String),

    #[error("Device ping {id} is already {status}")]
    PingNotPending { id: String, status: PingStatus },
}

/// Everything the store knows, as one consistent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentalSnapshot {
    #[serde(default)]
    pub settings: ParentalSettings,
    #[serde(default)]
    pub safe_zones: Vec<SafeZone>,
    #[serde(default)]
    pub check_in_requests: Vec<CheckInRequest>,
    /// Newest first
    #[serde(default)]
    pub activity: Vec<SafeZoneActivity>,
    /// When false, leaving a zone is recorded but raises no check-in.
    #[serde(default = "default_armed")]
    pub monitoring_armed: bool,
    #[serde(default)]
    pub device_pings: Vec<DevicePing>,
    /// Newest first
    #[serde(default)]
    pub recent_check_ins: Vec<RecentCheckIn>,
    #[serde(default)]
    pub last_known_location: Option<LastKnownLocation>,
}

fn default_armed() -> bool {
    true
}

impl Default for ParentalSnapshot {
    fn default() -> Self {
        Self {
            settings: ParentalSettings::default(),
            safe_zones: Vec::new(),
            check_in_requests: Vec::new(),
            activity: Vec::new(),
            monitoring_armed: true,
            device_pings: Vec::new(),
            recent_check_ins: Vec::new(),
            last_known_location: None,
        }
    }
}

impl ParentalSnapshot {
    pub fn pending_request_count(&self) -> usize {
        self.check_in_requests.iter().filter(|r| r.is_pending()).count()
    }

    pub fn active_zone_count(&self) -> usize {
        self.safe_zones.iter().filter(|z| z.is_active).count()
    }

    pub fn pending_request_for(&self, region_id: &str) -> Option<&CheckInRequest> {
        self.check_in_requests
            .iter()
            .find(|r| r.is_pending() && r.region_id == region_id)
    }

    pub fn pending_ping_count(&self) -> usize {
        self.device_pings.iter().filter(|p| p.is_pending()).count()
    }
}

/// What [`ParentalSafetyStore::handle_event`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Same `(kind, region, timestamp)` was already handled.
    Duplicate,
    /// No safe zone with that id.
    UnknownZone,
    /// Applied. Carries the id of a check-in request if one was raised.
    Applied { check_in: Option<String> },
}

/// Bounded FIFO of recently handled event keys.
#[derive(Debug)]
struct RecentEvents {
    order: VecDeque<EventKey>,
    seen: HashSet<EventKey>,
    capacity: usize,
}

impl RecentEvents {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember `key`. Returns false if it was already known.
    fn insert(&mut self, key: EventKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

#[derive(Debug)]
struct StoreState {
    data: ParentalSnapshot,
    recent: RecentEvents,
}

impl StoreState {
    /// Raise a pending request for `region_id` unless one is already open.
    /// An urgent ask escalates an open request rather than adding another.
    /// Returns the id of the open request and whether anything changed.
    fn open_request(
        &mut self,
        region_id: &str,
        message: Option<String>,
        urgent: bool,
        now: DateTime<Utc>,
    ) -> (String, bool) {
        if let Some(existing) = self
            .data
            .check_in_requests
            .iter_mut()
            .find(|r| r.is_pending() && r.region_id == region_id)
        {
            let escalated = urgent && !existing.is_urgent;
            if escalated {
                existing.is_urgent = true;
                if message.is_some() {
                    existing.message = message;
                }
            }
            return (existing.id.clone(), escalated);
        }
        let request = CheckInRequest {
            id: generate_id("check_in"),
            region_id: region_id.to_string(),
            status: CheckInStatus::Pending,
            created_at: now,
            responded_at: None,
            message,
            is_urgent: urgent,
        };
        let id = request.id.clone();
        self.data.check_in_requests.push(request);
        (id, true)
    }

    fn log_activity(&mut self, zone: &SafeZone, event: &GeofenceEvent) {
        self.data.activity.insert(
            0,
            SafeZoneActivity {
                id: generate_id("activity"),
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                kind: event.kind,
                timestamp: event.timestamp,
            },
        );
        self.data.activity.truncate(MAX_ACTIVITY_ENTRIES);
    }
}

/// Parental safety state container.
///
/// Safe to share behind an `Arc`; all methods take `&self` and never block
/// across an `.await`.
pub struct ParentalSafetyStore {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
}

impl Default for ParentalSafetyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParentalSafetyStore {
    pub fn new() -> Self {
        Self::from_snapshot(ParentalSnapshot::default())
    }

    pub fn from_snapshot(data: ParentalSnapshot) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState {
                data,
                recent: RecentEvents::new(DEDUP_WINDOW),
            }),
            revision,
        }
    }

    /// Receiver whose value increases after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> ParentalSnapshot {
        self.state.read().data.clone()
    }

    pub fn pending_request_count(&self) -> usize {
        self.state.read().data.pending_request_count()
    }

    pub fn active_zone_count(&self) -> usize {
        self.state.read().data.active_zone_count()
    }

    pub fn settings(&self) -> ParentalSettings {
        self.state.read().data.settings.clone()
    }

    pub fn safe_zones(&self) -> Vec<SafeZone> {
        self.state.read().data.safe_zones.clone()
    }

    pub fn safe_zone(&self, id: &str) -> Option<SafeZone> {
        self.state
            .read()
            .data
            .safe_zones
            .iter()
            .find(|z| z.id == id)
            .cloned()
    }

    pub fn check_in_requests(&self) -> Vec<CheckInRequest> {
        self.state.read().data.check_in_requests.clone()
    }

    pub fn check_in_request(&self, id: &str) -> Option<CheckInRequest> {
        self.state
            .read()
            .data
            .check_in_requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn activity(&self) -> Vec<SafeZoneActivity> {
        self.state.read().data.activity.clone()
    }

    pub fn is_monitoring_armed(&self) -> bool {
        self.state.read().data.monitoring_armed
    }

    pub fn device_pings(&self) -> Vec<DevicePing> {
        self.state.read().data.device_pings.clone()
    }

    pub fn pending_ping_count(&self) -> usize {
        self.state.read().data.pending_ping_count()
    }

    pub fn recent_check_ins(&self) -> Vec<RecentCheckIn> {
        self.state.read().data.recent_check_ins.clone()
    }

    pub fn last_known_location(&self) -> Option<LastKnownLocation> {
        self.state.read().data.last_known_location.clone()
    }

    // ------------------------------------------------------------------
    // Geofence events
    // ------------------------------------------------------------------

    /// Register this store on `bus`. The subscription holds only a weak
    /// reference, so dropping the store silently ends delivery.
    pub fn attach(self: &Arc<Self>, bus: &GeofenceEventBus) -> Subscription {
        let store: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(move |event: &GeofenceEvent| {
            if let Some(store) = store.upgrade() {
                store.handle_event(event);
            }
            Ok(())
        })
    }

    /// Apply one geofence event.
    ///
    /// ENTER marks the zone active. EXIT from an active zone marks it
    /// inactive and, while monitoring is armed, opens a check-in request
    /// unless one is already pending for that zone.
    pub fn handle_event(&self, event: &GeofenceEvent) -> EventOutcome {
        let outcome = {
            let mut state = self.state.write();
            let state = &mut *state;

            let Some(idx) = state
                .data
                .safe_zones
                .iter()
                .position(|z| z.id == event.region_id)
            else {
                debug!(region = %event.region_id, "Ignoring event for unknown zone");
                return EventOutcome::UnknownZone;
            };

            if !state.recent.insert(event.key()) {
                debug!(region = %event.region_id, kind = %event.kind, "Ignoring duplicate event");
                return EventOutcome::Duplicate;
            }

            let was_active = state.data.safe_zones[idx].is_active;
            let mut check_in = None;
            match event.kind {
                GeofenceKind::Enter => {
                    state.data.safe_zones[idx].is_active = true;
                }
                GeofenceKind::Exit => {
                    state.data.safe_zones[idx].is_active = false;
                    if was_active && state.data.monitoring_armed {
                        let (id, created) =
                            state.open_request(&event.region_id, None, false, Utc::now());
                        if created {
                            info!(region = %event.region_id, request = %id, "Check-in requested after zone exit");
                        }
                        check_in = Some(id);
                    }
                }
            }

            let zone = state.data.safe_zones[idx].clone();
            state.log_activity(&zone, event);
            EventOutcome::Applied { check_in }
        };
        self.bump();
        outcome
    }

    pub fn set_monitoring_armed(&self, armed: bool) {
        self.state.write().data.monitoring_armed = armed;
        info!(armed, "Safe zone monitoring toggled");
        self.bump();
    }

    // ------------------------------------------------------------------
    // Check-in requests
    // ------------------------------------------------------------------

    /// Ask the child to check in for `region_id`. Returns the id of the
    /// pending request, reusing one that is already open.
    pub fn request_check_in(&self, region_id: &str, message: Option<String>) -> String {
        let (id, created) = self
            .state
            .write()
            .open_request(region_id, message, false, Utc::now());
        if created {
            info!(region = region_id, request = %id, "Manual check-in requested");
            self.bump();
        }
        id
    }

    /// Like [`request_check_in`](Self::request_check_in), flagged urgent.
    /// An open non-urgent request for the region is escalated in place.
    pub fn request_urgent_check_in(&self, region_id: &str, message: Option<String>) -> String {
        let (id, changed) = self
            .state
            .write()
            .open_request(region_id, message, true, Utc::now());
        if changed {
            warn!(region = region_id, request = %id, "Urgent check-in requested");
            self.bump();
        }
        id
    }

    /// PENDING -> ACKNOWLEDGED. Any other state is rejected unchanged.
    pub fn acknowledge(&self, request_id: &str) -> Result<CheckInRequest, StoreError> {
        let acknowledged = {
            let mut state = self.state.write();
            let request = state
                .data
                .check_in_requests
                .iter_mut()
                .find(|r| r.id == request_id)
                .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;

            if request.status != CheckInStatus::Pending {
                return Err(StoreError::RequestNotPending {
                    id: request_id.to_string(),
                    status: request.status,
                });
            }
            request.status = CheckInStatus::Acknowledged;
            request.responded_at = Some(Utc::now());
            request.clone()
        };
        info!(request = request_id, "Check-in acknowledged");
        self.bump();
        Ok(acknowledged)
    }

    /// Expire every pending request older than the configured timeout as
    /// of `now`. Returns the requests that changed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<CheckInRequest> {
        let expired: Vec<CheckInRequest> = {
            let mut state = self.state.write();
            let timeout = state.data.settings.check_in_timeout();
            state
                .data
                .check_in_requests
                .iter_mut()
                .filter(|r| r.is_overdue(now, timeout))
                .map(|r| {
                    r.status = CheckInStatus::Expired;
                    r.responded_at = Some(now);
                    r.clone()
                })
                .collect()
        };

        if !expired.is_empty() {
            for request in &expired {
                warn!(request = %request.id, region = %request.region_id, "Check-in request expired");
            }
            self.bump();
        }
        expired
    }

    /// Run [`expire_overdue`](Self::expire_overdue) every `interval` until
    /// the store is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Parental store dropped, stopping expiry sweeper");
                    break;
                };
                let now = Utc::now();
                store.expire_overdue(now);
                store.fail_overdue_pings(now);
            }
        })
    }

    // ------------------------------------------------------------------
    // Device pings
    // ------------------------------------------------------------------

    /// Ask the child's device to respond. Unlike check-ins, every ping is a
    /// new request.
    pub fn send_device_ping(&self, kind: PingKind, message: Option<String>) -> DevicePing {
        let ping = DevicePing {
            id: generate_id("ping"),
            kind,
            message,
            requested_at: Utc::now(),
            status: PingStatus::Pending,
            response: None,
        };
        self.state.write().data.device_pings.push(ping.clone());
        info!(ping = %ping.id, kind = ?kind, "Device ping sent");
        self.bump();
        ping
    }

    /// PENDING -> ACKNOWLEDGED. A reported location also becomes the last
    /// known location.
    pub fn acknowledge_ping(
        &self,
        ping_id: &str,
        location: Option<GeoPoint>,
    ) -> Result<DevicePing, StoreError> {
        let now = Utc::now();
        let acknowledged = {
            let mut state = self.state.write();
            let state = &mut *state;
            let ping = state
                .data
                .device_pings
                .iter_mut()
                .find(|p| p.id == ping_id)
                .ok_or_else(|| StoreError::PingNotFound(ping_id.to_string()))?;

            if ping.status != PingStatus::Pending {
                return Err(StoreError::PingNotPending {
                    id: ping_id.to_string(),
                    status: ping.status,
                });
            }
            ping.status = PingStatus::Acknowledged;
            ping.response = Some(PingResponse {
                responded_at: now,
                location,
            });
            let ping = ping.clone();

            if let Some(location) = location {
                state.data.last_known_location = Some(LastKnownLocation {
                    location,
                    timestamp: now,
                    place_name: None,
                });
            }
            ping
        };
        info!(ping = ping_id, "Device ping acknowledged");
        self.bump();
        Ok(acknowledged)
    }

    /// Fail every pending ping older than the check-in timeout as of `now`.
    pub fn fail_overdue_pings(&self, now: DateTime<Utc>) -> Vec<DevicePing> {
        let failed: Vec<DevicePing> = {
            let mut state = self.state.write();
            let timeout = state.data.settings.check_in_timeout();
            state
                .data
                .device_pings
                .iter_mut()
                .filter(|p| p.is_overdue(now, timeout))
                .map(|p| {
                    p.status = PingStatus::Failed;
                    p.clone()
                })
                .collect()
        };

        if !failed.is_empty() {
            for ping in &failed {
                warn!(ping = %ping.id, "Device ping went unanswered");
            }
            self.bump();
        }
        failed
    }

    // ------------------------------------------------------------------
    // Dashboard
    // ------------------------------------------------------------------

    /// Put a child check-in at the top of the dashboard list, keeping the
    /// newest [`MAX_RECENT_CHECK_INS`].
    pub fn record_check_in(&self, check_in: RecentCheckIn) {
        {
            let mut state = self.state.write();
            let recent = &mut state.data.recent_check_ins;
            recent.retain(|c| c.id != check_in.id);
            recent.insert(0, check_in);
            recent.truncate(MAX_RECENT_CHECK_INS);
        }
        self.bump();
    }

    /// Replace the last known location unless the stored one is newer.
    pub fn update_last_known_location(&self, location: LastKnownLocation) -> bool {
        let updated = {
            let mut state = self.state.write();
            let current = &mut state.data.last_known_location;
            let stale = matches!(current, Some(existing) if existing.timestamp > location.timestamp);
            if !stale {
                *current = Some(location);
            }
            !stale
        };
        if updated {
            self.bump();
        }
        updated
    }

    // ------------------------------------------------------------------
    // Safe zones
    // ------------------------------------------------------------------

    pub fn add_safe_zone(&self, zone: NewSafeZone) -> SafeZone {
        let zone = SafeZone {
            id: generate_id("safe_zone"),
            name: zone.name,
            geometry: zone.geometry,
            is_active: zone.is_active,
            created_at: Utc::now(),
            notifications: zone.notifications,
        };
        self.state.write().data.safe_zones.push(zone.clone());
        info!(zone = %zone.id, name = %zone.name, "Safe zone added");
        self.bump();
        zone
    }

    pub fn update_safe_zone(&self, id: &str, update: SafeZoneUpdate) -> Result<SafeZone, StoreError> {
        let updated = {
            let mut state = self.state.write();
            let zone = state
                .data
                .safe_zones
                .iter_mut()
                .find(|z| z.id == id)
                .ok_or_else(|| StoreError::ZoneNotFound(id.to_string()))?;
            if let Some(name) = update.name {
                zone.name = name;
            }
            if let Some(geometry) = update.geometry {
                zone.geometry = geometry;
            }
            if let Some(is_active) = update.is_active {
                zone.is_active = is_active;
            }
            if let Some(notifications) = update.notifications {
                zone.notifications = notifications;
            }
            zone.clone()
        };
        self.bump();
        Ok(updated)
    }

    /// Remove a zone. Requests already raised for it are kept.
    pub fn delete_safe_zone(&self, id: &str) -> Result<SafeZone, StoreError> {
        let removed = {
            let mut state = self.state.write();
            let idx = state
                .data
                .safe_zones
                .iter()
                .position(|z| z.id == id)
                .ok_or_else(|| StoreError::ZoneNotFound(id.to_string()))?;
            state.data.safe_zones.remove(idx)
        };
        info!(zone = id, "Safe zone deleted");
        self.bump();
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Settings and emergency contacts
    // ------------------------------------------------------------------

    pub fn update_settings<F>(&self, f: F) -> ParentalSettings
    where
        F: FnOnce(&mut ParentalSettings),
    {
        let settings = {
            let mut state = self.state.write();
            f(&mut state.data.settings);
            state.data.settings.clone()
        };
        self.bump();
        settings
    }

    /// Add a contact. A new primary contact demotes the previous one.
    pub fn add_emergency_contact(&self, contact: NewEmergencyContact) -> EmergencyContact {
        let contact = EmergencyContact {
            id: generate_id("contact"),
            name: contact.name,
            channel: contact.channel,
            relationship: contact.relationship,
            is_primary: contact.is_primary,
            can_receive_alerts: contact.can_receive_alerts,
        };
        {
            let mut state = self.state.write();
            let contacts = &mut state.data.settings.emergency_contacts;
            if contact.is_primary {
                contacts.iter_mut().for_each(|c| c.is_primary = false);
            }
            contacts.push(contact.clone());
        }
        self.bump();
        contact
    }

    /// Replace a contact's details, keeping its id.
    pub fn update_emergency_contact(
        &self,
        id: &str,
        details: NewEmergencyContact,
    ) -> Result<EmergencyContact, StoreError> {
        let updated = {
            let mut state = self.state.write();
            let contacts = &mut state.data.settings.emergency_contacts;
            let idx = contacts
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| StoreError::ContactNotFound(id.to_string()))?;
            if details.is_primary {
                contacts.iter_mut().for_each(|c| c.is_primary = false);
            }
            let contact = &mut contacts[idx];
            contact.name = details.name;
            contact.channel = details.channel;
            contact.relationship = details.relationship;
            contact.is_primary = details.is_primary;
            contact.can_receive_alerts = details.can_receive_alerts;
            contact.clone()
        };
        self.bump();
        Ok(updated)
    }

    pub fn delete_emergency_contact(&self, id: &str) -> Result<EmergencyContact, StoreError> {
        let removed = {
            let mut state = self.state.write();
            let contacts = &mut state.data.settings.emergency_contacts;
            let idx = contacts
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| StoreError::ContactNotFound(id.to_string()))?;
            contacts.remove(idx)
        };
        self.bump();
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the current snapshot as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write parental state")?;
        std::fs::rename(&tmp, path).context("Failed to move parental state into place")?;
        debug!(path = %path.display(), "Parental state saved");
        Ok(())
    }

    /// Load a store from a file written by [`save_to`](Self::save_to).
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parental state {}", path.display()))?;
        let data: ParentalSnapshot =
            serde_json::from_str(&contents).context("Failed to parse parental state")?;
        Ok(Self::from_snapshot(data))
    }

    /// Like [`load_from`](Self::load_from), but a missing file yields an
    /// empty store.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::new())
        }
    }
}
