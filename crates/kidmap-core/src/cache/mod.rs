//! Region data caching.
//!
//! This module provides `RegionDataCache`, a bounded LRU cache whose entries
//! expire after a per-entry TTL. Expired entries are invisible to readers
//! immediately and are evicted ahead of live ones when space is needed.
//!
//! A `CacheBackend` can be attached for warm starts; `DiskBackend` keeps one
//! JSON file per region.

pub mod persist;
pub mod region;

pub use persist::{CacheBackend, CachedData, DiskBackend};
pub use region::{CacheEntry, CacheStats, RegionDataCache};
