//! Property-based tests for the event bus and the region cache.
//!
//! Both are checked against a small reference model driven by random
//! operation sequences, rather than a fixed list of hand-picked cases.

use std::sync::Arc;
use std::time::Duration;

use kidmap_core::models::GeofenceEvent;
use kidmap_core::{GeofenceEventBus, RegionDataCache, Subscription};
use parking_lot::Mutex;
use proptest::prelude::*;

/// TTL long enough that nothing expires during a test case.
const FOREVER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
enum BusOp {
    Subscribe,
    Unsubscribe(usize),
    Publish,
}

fn bus_op_strategy() -> impl Strategy<Value = BusOp> {
    prop_oneof![
        2 => Just(BusOp::Subscribe),
        1 => (0usize..16).prop_map(BusOp::Unsubscribe),
        3 => Just(BusOp::Publish),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set(u8, u32),
    Get(u8),
    Invalidate(u8),
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (0u8..8, any::<u32>()).prop_map(|(k, v)| CacheOp::Set(k, v)),
        3 => (0u8..8).prop_map(CacheOp::Get),
        1 => (0u8..8).prop_map(CacheOp::Invalidate),
    ]
}

fn key(k: u8) -> String {
    format!("region-{}", k)
}

/// Reference LRU: most recently used first.
#[derive(Debug, Default)]
struct ModelLru {
    entries: Vec<(String, u32)>,
    capacity: usize,
}

impl ModelLru {
    fn set(&mut self, key: String, value: u32) {
        self.entries.retain(|(k, _)| *k != key);
        if self.entries.len() >= self.capacity {
            self.entries.pop();
        }
        self.entries.insert(0, (key, value));
    }

    fn get(&mut self, key: &str) -> Option<u32> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos);
        let value = entry.1;
        self.entries.insert(0, entry);
        Some(value)
    }

    fn invalidate(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every publish reaches each listener registered at that moment exactly
    /// once, in subscription order.
    #[test]
    fn bus_delivers_once_in_subscription_order(
        ops in prop::collection::vec(bus_op_strategy(), 1..60)
    ) {
        let bus = GeofenceEventBus::new();
        let log: Arc<Mutex<Vec<(usize, i64)>>> = Arc::default();

        let mut subscriptions: Vec<Subscription> = Vec::new();
        let mut active: Vec<usize> = Vec::new();
        let mut expected: Vec<(usize, i64)> = Vec::new();
        let mut published = 0i64;

        for op in ops {
            match op {
                BusOp::Subscribe => {
                    let listener = subscriptions.len();
                    let log = Arc::clone(&log);
                    subscriptions.push(bus.subscribe(move |event: &GeofenceEvent| {
                        log.lock().push((listener, event.timestamp));
                        Ok(())
                    }));
                    active.push(listener);
                }
                BusOp::Unsubscribe(n) => {
                    if let Some(sub) = subscriptions.get(n) {
                        sub.unsubscribe();
                        active.retain(|&l| l != n);
                    }
                }
                BusOp::Publish => {
                    published += 1;
                    let delivered = bus.publish(&GeofenceEvent::exit("school", published));
                    prop_assert_eq!(delivered, active.len());
                    expected.extend(active.iter().map(|&l| (l, published)));
                }
            }
        }

        prop_assert_eq!(bus.listener_count(), active.len());
        prop_assert_eq!(&*log.lock(), &expected);
    }

    /// With nothing expiring, the cache behaves exactly like a plain LRU of
    /// the same capacity and never grows past it.
    #[test]
    fn cache_matches_reference_lru(
        capacity in 1usize..6,
        ops in prop::collection::vec(cache_op_strategy(), 1..120)
    ) {
        let cache = RegionDataCache::new(capacity);
        let mut model = ModelLru { entries: Vec::new(), capacity };

        for op in ops {
            match op {
                CacheOp::Set(k, v) => {
                    cache.set(&key(k), v, FOREVER);
                    model.set(key(k), v);
                    prop_assert_eq!(cache.get(&key(k)), Some(v));
                    model.get(&key(k));
                }
                CacheOp::Get(k) => {
                    prop_assert_eq!(cache.get(&key(k)), model.get(&key(k)));
                }
                CacheOp::Invalidate(k) => {
                    cache.invalidate(&key(k));
                    model.invalidate(&key(k));
                }
            }
            prop_assert!(cache.len() <= capacity);
            prop_assert_eq!(cache.len(), model.entries.len());
        }
    }
}

#[test]
fn lru_scenario_from_capacity_two() {
    let cache = RegionDataCache::new(2);
    cache.set("A", 1, FOREVER);
    cache.set("B", 2, FOREVER);
    assert_eq!(cache.get("A"), Some(1));

    cache.set("C", 3, FOREVER);
    assert_eq!(cache.get("B"), None);
    assert_eq!(cache.get("A"), Some(1));
    assert_eq!(cache.get("C"), Some(3));
}
