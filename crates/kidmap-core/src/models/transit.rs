//! Transit data models: region configuration, raw feed responses and the
//! validated dataset stored in the region cache.
//!
//! `TransitFeed` mirrors what the transit adapter returns on the wire.
//! `TransitDataset` is the clean domain form produced by
//! [`TransitFeed::into_dataset`]. The core only interprets `version` and
//! `fetched_at`; routes, schedules and alerts are carried as opaque JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transit system serving a region (subway, bus network, ferry line...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TransitSystem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransitKind,
    #[serde(rename = "kidFriendlyName", default)]
    pub kid_friendly_name: Option<String>,
    /// Key for this system's feed. Wins over `api_key_env`.
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Name of the environment variable holding this system's API key.
    #[serde(rename = "apiKeyEnv", default)]
    pub api_key_env: Option<String>,
    /// Header the key is sent under; the client's header when unset.
    #[serde(rename = "apiKeyHeader", default)]
    pub api_key_header: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TransitKind {
    Subway,
    Train,
    Bus,
    Tram,
    Ferry,
}

/// Static configuration for one region the app can navigate in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegionConfig {
    pub id: String,
    pub name: String,
    pub timezone: String,
    #[serde(rename = "emergencyNumber")]
    pub emergency_number: String,
    #[serde(rename = "transitSystems", default)]
    pub transit_systems: Vec<TransitSystem>,
    /// Fallback key for systems that carry none of their own.
    #[serde(rename = "transitApiKey", default, skip_serializing_if = "Option::is_none")]
    pub transit_api_key: Option<String>,
}

/// Raw response from the transit adapter, either a whole region
/// (`/feeds/{region}.json`) or one of its systems
/// (`/feeds/{region}/{system}.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitFeed {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub routes: Vec<Value>,
    #[serde(default)]
    pub schedules: Vec<Value>,
    #[serde(default)]
    pub alerts: Vec<Value>,
}

/// Why a feed could not be turned into a dataset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedValidationError {
    #[error("feed is missing lastModified")]
    MissingTimestamp,

    #[error("feed lastModified is not RFC 3339: {0}")]
    BadTimestamp(String),

    #[error("{section} entry {index} is not a JSON object")]
    MalformedEntry { section: &'static str, index: usize },

    #[error("route entry {0} has no id")]
    RouteWithoutId(usize),
}

impl TransitFeed {
    /// Combine per-system feeds into one region feed.
    ///
    /// Entries are concatenated in system order. The result carries the
    /// latest `lastModified` among the parts; a version survives only when
    /// there is exactly one part, otherwise the timestamp stands in for it.
    pub fn merge(parts: Vec<TransitFeed>) -> TransitFeed {
        let single = parts.len() == 1;
        let mut merged = TransitFeed::default();
        let mut latest: Option<DateTime<Utc>> = None;
        for part in parts {
            if single {
                merged.version = part.version;
            }
            if let Some(raw) = part.last_modified {
                match DateTime::parse_from_rfc3339(&raw) {
                    Ok(ts) => {
                        let ts = ts.with_timezone(&Utc);
                        if latest.map_or(true, |best| ts > best) {
                            latest = Some(ts);
                            merged.last_modified = Some(raw);
                        }
                    }
                    // Kept only so validation reports it when nothing parses
                    Err(_) if merged.last_modified.is_none() => merged.last_modified = Some(raw),
                    Err(_) => {}
                }
            }
            merged.routes.extend(part.routes);
            merged.schedules.extend(part.schedules);
            merged.alerts.extend(part.alerts);
        }
        merged
    }

    /// Validate the feed and convert it into a dataset for `region_id`.
    ///
    /// Every route must be an object with a non-empty string `id`; schedules
    /// and alerts only need to be objects. When the feed carries no explicit
    /// version the `lastModified` stamp doubles as one.
    pub fn into_dataset(self, region_id: &str) -> Result<TransitDataset, FeedValidationError> {
        let raw_ts = self
            .last_modified
            .ok_or(FeedValidationError::MissingTimestamp)?;
        let fetched_at = DateTime::parse_from_rfc3339(&raw_ts)
            .map_err(|_| FeedValidationError::BadTimestamp(raw_ts.clone()))?
            .with_timezone(&Utc);

        for (index, route) in self.routes.iter().enumerate() {
            let Some(obj) = route.as_object() else {
                return Err(FeedValidationError::MalformedEntry { section: "routes", index });
            };
            match obj.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => {}
                _ => return Err(FeedValidationError::RouteWithoutId(index)),
            }
        }
        check_objects("schedules", &self.schedules)?;
        check_objects("alerts", &self.alerts)?;

        Ok(TransitDataset {
            region_id: region_id.to_string(),
            version: self.version.unwrap_or(raw_ts),
            fetched_at,
            routes: self.routes,
            schedules: self.schedules,
            alerts: self.alerts,
        })
    }
}

fn check_objects(section: &'static str, entries: &[Value]) -> Result<(), FeedValidationError> {
    match entries.iter().position(|v| !v.is_object()) {
        Some(index) => Err(FeedValidationError::MalformedEntry { section, index }),
        None => Ok(()),
    }
}

/// Validated transit data for one region, as held in the region cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TransitDataset {
    pub region_id: String,
    pub version: String,
    pub fetched_at: DateTime<Utc>,
    pub routes: Vec<Value>,
    pub schedules: Vec<Value>,
    pub alerts: Vec<Value>,
}

impl TransitDataset {
    /// True if `self` should replace `other` when merging.
    /// Ties keep the existing dataset.
    pub fn is_newer_than(&self, other: &TransitDataset) -> bool {
        self.fetched_at > other.fetched_at
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(value: Value) -> TransitFeed {
        serde_json::from_value(value).expect("test feed should deserialize")
    }

    #[test]
    fn test_into_dataset_valid_feed() {
        let f = feed(json!({
            "version": "v42",
            "lastModified": "2026-03-01T12:00:00Z",
            "routes": [{"id": "mta-A", "name": "A", "systemId": "mta"}],
            "schedules": [{"routeId": "A", "time": "2026-03-01T12:05:00Z"}],
        }));
        let ds = f.into_dataset("nyc").expect("feed should validate");
        assert_eq!(ds.region_id, "nyc");
        assert_eq!(ds.version, "v42");
        assert_eq!(ds.route_count(), 1);
        assert!(ds.alerts.is_empty());
    }

    #[test]
    fn test_into_dataset_version_falls_back_to_timestamp() {
        let f = feed(json!({"lastModified": "2026-03-01T12:00:00Z"}));
        let ds = f.into_dataset("nyc").unwrap();
        assert_eq!(ds.version, "2026-03-01T12:00:00Z");
    }

    #[test]
    fn test_into_dataset_rejects_missing_timestamp() {
        let f = feed(json!({"routes": []}));
        assert_eq!(f.into_dataset("nyc"), Err(FeedValidationError::MissingTimestamp));
    }

    #[test]
    fn test_into_dataset_rejects_bad_timestamp() {
        let f = feed(json!({"lastModified": "yesterday"}));
        assert!(matches!(f.into_dataset("nyc"), Err(FeedValidationError::BadTimestamp(_))));
    }

    #[test]
    fn test_into_dataset_rejects_route_without_id() {
        let f = feed(json!({
            "lastModified": "2026-03-01T12:00:00Z",
            "routes": [{"id": "ok"}, {"name": "no id"}],
        }));
        assert_eq!(f.into_dataset("nyc"), Err(FeedValidationError::RouteWithoutId(1)));
    }

    #[test]
    fn test_into_dataset_rejects_non_object_alert() {
        let f = feed(json!({
            "lastModified": "2026-03-01T12:00:00Z",
            "alerts": ["signal problems"],
        }));
        assert_eq!(
            f.into_dataset("nyc"),
            Err(FeedValidationError::MalformedEntry { section: "alerts", index: 0 })
        );
    }

    #[test]
    fn test_merge_concatenates_and_takes_latest_timestamp() {
        let subway = feed(json!({
            "version": "s1",
            "lastModified": "2026-03-01T12:00:00Z",
            "routes": [{"id": "A"}],
            "alerts": [{"text": "A delayed"}],
        }));
        let bus = feed(json!({
            "version": "b9",
            "lastModified": "2026-03-01T12:30:00Z",
            "routes": [{"id": "M15"}, {"id": "M101"}],
        }));

        let merged = TransitFeed::merge(vec![subway, bus]);
        assert_eq!(merged.routes.len(), 3);
        assert_eq!(merged.alerts.len(), 1);
        assert_eq!(merged.last_modified.as_deref(), Some("2026-03-01T12:30:00Z"));
        assert_eq!(merged.version, None);

        let ds = merged.into_dataset("nyc").unwrap();
        assert_eq!(ds.version, "2026-03-01T12:30:00Z");
    }

    #[test]
    fn test_merge_single_part_keeps_version() {
        let only = feed(json!({"version": "v3", "lastModified": "2026-03-01T12:00:00Z"}));
        let merged = TransitFeed::merge(vec![only]);
        assert_eq!(merged.version.as_deref(), Some("v3"));
    }

    #[test]
    fn test_region_config_reads_per_system_keys() {
        let region: RegionConfig = serde_json::from_value(json!({
            "id": "nyc",
            "name": "New York City",
            "timezone": "America/New_York",
            "emergencyNumber": "911",
            "transitApiKey": "region-key",
            "transitSystems": [
                {"id": "mta-subway", "name": "Subway", "type": "subway",
                 "apiKeyEnv": "MTA_KEY", "apiKeyHeader": "x-mta-key"},
                {"id": "mta-bus", "name": "Bus", "type": "bus", "apiKey": "bus-key"}
            ]
        }))
        .unwrap();
        assert_eq!(region.transit_api_key.as_deref(), Some("region-key"));
        assert_eq!(region.transit_systems[0].api_key_header.as_deref(), Some("x-mta-key"));
        assert_eq!(region.transit_systems[1].api_key.as_deref(), Some("bus-key"));
    }

    #[test]
    fn test_is_newer_than() {
        let older = feed(json!({"lastModified": "2026-03-01T12:00:00Z"}))
            .into_dataset("nyc")
            .unwrap();
        let newer = feed(json!({"lastModified": "2026-03-01T12:01:00Z"}))
            .into_dataset("nyc")
            .unwrap();
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older.clone()));
    }
}
