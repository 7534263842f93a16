//! Bounded LRU cache with per-entry TTL, keyed by region id.
//!
//! Recency is tracked with an index-linked list over a slot vector so `get`,
//! `set` and `invalidate` never scan. Expiry order is tracked separately in a
//! min-heap with lazy deletion, which lets a full cache find an expired
//! victim before falling back to the least recently used one.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::persist::{CacheBackend, CachedData};

/// One cached value plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub last_accessed: Instant,
    /// Wall-clock insertion time, used for persistence and age display.
    pub cached_at: DateTime<Utc>,
    expires_at: Option<Instant>,
    stamp: u64,
}

impl<T> CacheEntry<T> {
    /// `None` when the TTL reaches past anything the clock can represent,
    /// which makes the entry immortal.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Counters for cache behaviour, mostly for logs and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Node<T> {
    entry: CacheEntry<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<T> {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    /// (expires_at, stamp, key); stale items are skipped when popped
    expiry: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_stamp: u64,
    stats: CacheStats,
}

impl<T> Inner<T> {
    fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            expiry: BinaryHeap::with_capacity(capacity),
            next_stamp: 0,
            stats: CacheStats::default(),
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<T>> {
        self.slots.get(slot)?.as_ref()
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(slot)?.as_mut()
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head.and_then(|h| self.node_mut(h)) {
            h.prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn remove_key(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(node.entry)
    }

    fn insert_front(&mut self, entry: CacheEntry<T>) {
        if let Some(at) = entry.expires_at {
            self.expiry.push(Reverse((at, entry.stamp, entry.key.clone())));
        }
        let key = entry.key.clone();
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    fn is_live_stamp(&self, key: &str, stamp: u64) -> bool {
        self.index
            .get(key)
            .and_then(|&slot| self.node(slot))
            .map(|n| n.entry.stamp == stamp)
            .unwrap_or(false)
    }

    /// Pop the earliest-expiring live entry if it has already expired.
    fn pop_expired(&mut self, now: Instant) -> Option<CacheEntry<T>> {
        loop {
            let Reverse((expires_at, stamp, key)) = self.expiry.peek()?.clone();
            if !self.is_live_stamp(&key, stamp) {
                self.expiry.pop();
                continue;
            }
            if expires_at > now {
                return None;
            }
            self.expiry.pop();
            return self.remove_key(&key);
        }
    }

    /// Choose and remove one entry to make room: expired first, else LRU.
    fn evict_one(&mut self, now: Instant) -> Option<CacheEntry<T>> {
        if let Some(expired) = self.pop_expired(now) {
            self.stats.expirations += 1;
            return Some(expired);
        }
        let tail = self.tail?;
        let key = self.node(tail)?.entry.key.clone();
        self.stats.evictions += 1;
        self.remove_key(&key)
    }

    /// Drop stale heap items once they clearly outnumber live entries.
    fn compact_expiry(&mut self) {
        if self.expiry.len() <= self.index.len() * 2 + 16 {
            return;
        }
        let live: Vec<_> = self
            .index
            .values()
            .filter_map(|&slot| self.node(slot))
            .filter_map(|n| {
                let e = &n.entry;
                Some(Reverse((e.expires_at?, e.stamp, e.key.clone())))
            })
            .collect();
        self.expiry = BinaryHeap::from(live);
    }
}

/// Size- and time-bounded cache of per-region values.
///
/// An entry is visible only while `now - inserted_at < ttl`. When the cache is
/// full, `set` evicts exactly one entry: an expired one if any exists,
/// otherwise the least recently used. All mutation happens under one mutex,
/// so readers never see a half-replaced entry.
///
/// Backend I/O runs after that mutex is released. `persist_lock` is taken
/// before letting go of `inner`, so disk writes land in the same order as the
/// in-memory changes they mirror.
pub struct RegionDataCache<T> {
    inner: Mutex<Inner<T>>,
    persist_lock: Mutex<()>,
    capacity: usize,
    backend: Option<Arc<dyn CacheBackend<T>>>,
}

/// Disk work collected under the cache lock and replayed after it.
enum PendingIo<T> {
    Store(String, CachedData<T>),
    Remove(String),
    Clear,
}

impl<T: Clone> RegionDataCache<T> {
    /// Create an in-memory cache holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner::new(capacity)),
            persist_lock: Mutex::new(()),
            capacity,
            backend: None,
        }
    }

    /// Attach a durable backend. Writes go through to it; reads never do.
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend<T>>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Look up a live entry and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Like [`get`](Self::get) but returns the whole entry.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(&slot) = inner.index.get(key) else {
            inner.stats.misses += 1;
            debug!(region = key, "Cache miss");
            return None;
        };

        let expired = inner
            .node(slot)
            .map_or(true, |n| n.entry.is_expired(now));
        if expired {
            inner.remove_key(key);
            inner.stats.misses += 1;
            inner.stats.expirations += 1;
            debug!(region = key, "Cache entry expired");
            self.flush(inner, vec![PendingIo::Remove(key.to_string())]);
            return None;
        }

        inner.unlink(slot);
        inner.push_front(slot);
        inner.stats.hits += 1;
        let node = inner.node_mut(slot)?;
        node.entry.last_accessed = now;
        Some(node.entry.clone())
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .index
            .get(key)
            .and_then(|&slot| inner.node(slot))
            .map(|n| !n.entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Insert or fully replace the entry for `key`.
    ///
    /// A TTL too large for the clock (`Duration::MAX`, say) means the entry
    /// never expires.
    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        let cached_at = Utc::now();
        self.insert(key, value, ttl, Instant::now(), cached_at, true);
    }

    fn insert(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
        inserted_at: Instant,
        cached_at: DateTime<Utc>,
        write_through: bool,
    ) {
        let now = Instant::now();
        let expires_at = inserted_at.checked_add(ttl);
        let mut pending = Vec::new();
        if write_through && self.backend.is_some() {
            pending.push(PendingIo::Store(
                key.to_string(),
                CachedData::with_ttl(value.clone(), cached_at, ttl),
            ));
        }

        let mut inner = self.inner.lock();
        inner.remove_key(key);
        if inner.index.len() >= self.capacity {
            if let Some(victim) = inner.evict_one(now) {
                debug!(region = %victim.key, evicted_for = key, "Evicted cache entry");
                pending.insert(0, PendingIo::Remove(victim.key));
            }
        }

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.insert_front(CacheEntry {
            key: key.to_string(),
            value,
            inserted_at,
            ttl,
            last_accessed: now,
            cached_at,
            expires_at,
            stamp,
        });
        inner.compact_expiry();

        self.flush(inner, pending);
    }

    /// Remove `key` if present. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove_key(key).is_some();
        self.flush(inner, vec![PendingIo::Remove(key.to_string())]);
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new(self.capacity);
        self.flush(inner, vec![PendingIo::Clear]);
    }

    /// Physically drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut pending = Vec::new();
        while let Some(victim) = inner.pop_expired(now) {
            inner.stats.expirations += 1;
            pending.push(PendingIo::Remove(victim.key));
        }
        let removed = pending.len();
        self.flush(inner, pending);
        removed
    }

    /// Human-readable age of a live entry, e.g. "5m ago".
    pub fn age_display(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let &slot = inner.index.get(key)?;
        let entry = &inner.node(slot)?.entry;
        if entry.is_expired(now) {
            return None;
        }
        Some(CachedData::with_ttl((), entry.cached_at, entry.ttl).age_display())
    }

    /// Reload persisted entries that are still within their TTL.
    ///
    /// Oldest entries are inserted first so the freshest end up most
    /// recently used. Returns the number of entries loaded.
    pub fn warm_start(&self) -> anyhow::Result<usize> {
        let Some(ref backend) = self.backend else {
            return Ok(0);
        };

        let mut persisted = backend.load_all()?;
        persisted.sort_by_key(|(_, cached)| cached.cached_at);

        let now = Instant::now();
        let mut loaded = 0;
        for (key, cached) in persisted {
            let age = match (Utc::now() - cached.cached_at).to_std() {
                Ok(age) => age,
                // Clock skew: treat as brand new
                Err(_) => Duration::ZERO,
            };
            if age >= cached.ttl() {
                debug!(region = %key, "Skipping expired persisted entry");
                self.backend_remove(&key);
                continue;
            }
            let inserted_at = now.checked_sub(age).unwrap_or(now);
            let ttl = cached.ttl();
            self.insert(&key, cached.data, ttl, inserted_at, cached.cached_at, false);
            loaded += 1;
        }

        debug!(loaded, "Cache warm start complete");
        Ok(loaded)
    }

    /// Release the cache lock, then apply `pending` to the backend.
    fn flush(&self, inner: MutexGuard<'_, Inner<T>>, pending: Vec<PendingIo<T>>) {
        let Some(ref backend) = self.backend else {
            return;
        };
        if pending.is_empty() {
            return;
        }
        let _ordered = self.persist_lock.lock();
        drop(inner);

        for io in pending {
            match io {
                PendingIo::Store(key, persisted) => {
                    if let Err(e) = backend.store(&key, &persisted) {
                        warn!(region = %key, error = %e, "Failed to persist cache entry");
                    }
                }
                PendingIo::Remove(key) => self.backend_remove(&key),
                PendingIo::Clear => {
                    if let Err(e) = backend.clear() {
                        warn!(error = %e, "Failed to clear persisted cache");
                    }
                }
            }
        }
    }

    fn backend_remove(&self, key: &str) {
        if let Some(ref backend) = self.backend {
            if let Err(e) = backend.remove(key) {
                warn!(region = key, error = %e, "Failed to remove persisted cache entry");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
