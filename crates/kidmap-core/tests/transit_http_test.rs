//! End-to-end tests for the transit adapter client and the updater against
//! a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use kidmap_core::models::RegionConfig;
use kidmap_core::report::CollectingReporter;
use kidmap_core::transit::RetryPolicy;
use kidmap_core::{
    FetchError, RegionDataCache, TransitApiClient, TransitDataUpdater, UpdateError, UpdaterConfig,
};
use serde_json::{json, Value};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn feed(version: &str, last_modified: &str) -> Value {
    json!({
        "version": version,
        "lastModified": last_modified,
        "routes": [{ "id": "A", "name": "A train" }, { "id": "L" }],
        "schedules": [],
        "alerts": [{ "route": "L", "text": "Weekend service change" }]
    })
}

fn fast_config() -> UpdaterConfig {
    UpdaterConfig {
        attempt_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter_factor: 0.0,
        },
        ..UpdaterConfig::default()
    }
}

fn updater(server: &MockServer) -> TransitDataUpdater {
    let client = TransitApiClient::new(server.uri()).expect("client should build");
    TransitDataUpdater::new(
        Arc::new(client),
        Arc::new(RegionDataCache::new(8)),
        fast_config(),
    )
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or_default()
}

#[tokio::test]
async fn fetch_feed_parses_adapter_response() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/feeds/nyc.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(feed("2026.10.1", "2026-10-01T08:00:00Z")),
        )
        .mount(&server)
        .await;

    let client = TransitApiClient::new(server.uri()).unwrap();
    let feed = client.fetch_feed("nyc").await.unwrap();
    assert_eq!(feed.version.as_deref(), Some("2026.10.1"));
    assert_eq!(feed.routes.len(), 2);
    assert_eq!(feed.alerts.len(), 1);
}

#[tokio::test]
async fn fetch_feed_sends_api_key_header() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/feeds/ldn.json"))
        .and(matchers::header("X-Transit-Key", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed("v1", "2026-10-01T08:00:00Z")))
        .expect(1)
        .mount(&server)
        .await;

    let client = TransitApiClient::new(server.uri())
        .unwrap()
        .with_api_key_header("X-Transit-Key")
        .with_api_key("s3cret");
    client.fetch_feed("ldn").await.unwrap();
}

#[tokio::test]
async fn fetch_feed_classifies_status_codes() {
    let server = MockServer::start().await;
    let cases = [
        ("gone", 404),
        ("locked", 401),
        ("busy", 429),
        ("broken", 503),
    ];
    for (region, status) in cases {
        Mock::given(matchers::path(format!("/feeds/{}.json", region)))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
    }

    let client = TransitApiClient::new(server.uri()).unwrap();

    let err = client.fetch_feed("gone").await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)));
    assert!(!err.is_transient());

    let err = client.fetch_feed("locked").await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized));

    assert!(client.fetch_feed("busy").await.unwrap_err().is_transient());
    assert!(client.fetch_feed("broken").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn fetch_feed_rejects_unsafe_region_id_without_request() {
    let server = MockServer::start().await;
    let client = TransitApiClient::new(server.uri()).unwrap();

    let err = client.fetch_feed("../admin").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidRegionId(_)));
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn update_retries_server_errors_then_caches() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed("v7", "2026-10-01T08:00:00Z")))
        .mount(&server)
        .await;

    let updater = updater(&server);
    let dataset = updater.update_region_transit_data("nyc").await.unwrap();

    assert_eq!(dataset.version, "v7");
    assert_eq!(updater.cached("nyc"), Some(dataset));
    assert_eq!(request_count(&server).await, 3);
    assert!(!updater.is_update_in_progress("nyc"));
}

#[tokio::test]
async fn update_gives_up_after_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let reporter = Arc::new(CollectingReporter::new());
    let updater = updater(&server).with_reporter(reporter.clone());
    let err = updater.update_region_transit_data("nyc").await.unwrap_err();

    match err {
        UpdateError::TransientFetch { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected TransientFetch, got {other:?}"),
    }
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(reporter.len(), 1);
    assert_eq!(updater.cached("nyc"), None);
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let updater = updater(&server);
    let err = updater.update_region_transit_data("nyc").await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn feed_failing_validation_keeps_cached_dataset() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed("v1", "2026-10-01T08:00:00Z")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "v2",
            "lastModified": "2026-10-02T08:00:00Z",
            "routes": [{ "name": "no id" }]
        })))
        .mount(&server)
        .await;

    let updater = updater(&server);
    let first = updater.update_region_transit_data("nyc").await.unwrap();

    let err = updater.update_region_transit_data("nyc").await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(updater.cached("nyc"), Some(first));
}

#[tokio::test]
async fn concurrent_updates_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(feed("v1", "2026-10-01T08:00:00Z"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let updater = updater(&server);
    let (a, b, c) = tokio::join!(
        updater.update_region_transit_data("nyc"),
        updater.update_region_transit_data("nyc"),
        updater.update_region_transit_data("nyc"),
    );

    let a = a.unwrap();
    assert_eq!(b.unwrap(), a);
    assert_eq!(c.unwrap(), a);
}

#[tokio::test]
async fn unknown_region_is_permanent() {
    let server = MockServer::start().await;

    let updater = updater(&server);
    let err = updater.update_region_transit_data("atlantis").await.unwrap_err();

    assert!(matches!(err, UpdateError::Permanent { .. }));
    assert_eq!(err.region_id(), "atlantis");
    assert_eq!(request_count(&server).await, 1);
}

fn nyc_with_systems() -> RegionConfig {
    serde_json::from_value(json!({
        "id": "nyc",
        "name": "New York City",
        "timezone": "America/New_York",
        "emergencyNumber": "911",
        "transitApiKey": "region-key",
        "transitSystems": [
            { "id": "subway", "name": "Subway", "type": "subway",
              "apiKey": "subway-key", "apiKeyHeader": "X-Subway-Key" },
            { "id": "bus", "name": "Bus", "type": "bus" },
            { "id": "ferry", "name": "Ferry", "type": "ferry" }
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn region_systems_are_fetched_and_merged() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/nyc/subway.json"))
        .and(matchers::header("X-Subway-Key", "subway-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lastModified": "2026-10-01T08:00:00Z",
            "routes": [{ "id": "A" }, { "id": "L" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::path("/feeds/nyc/bus.json"))
        .and(matchers::header("x-api-key", "region-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lastModified": "2026-10-01T09:00:00Z",
            "routes": [{ "id": "M15" }],
            "alerts": [{ "route": "M15", "text": "Detour" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::path("/feeds/nyc/ferry.json"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = TransitApiClient::new(server.uri())
        .unwrap()
        .with_regions([nyc_with_systems()]);
    let feed = client.fetch_feed("nyc").await.unwrap();

    assert_eq!(feed.routes.len(), 3);
    assert_eq!(feed.alerts.len(), 1);
    assert_eq!(feed.last_modified.as_deref(), Some("2026-10-01T09:00:00Z"));
    // No whole-region request was made
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn region_fails_only_when_every_system_fails() {
    let server = MockServer::start().await;
    Mock::given(matchers::path_regex(r"^/feeds/nyc/.*\.json$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = TransitApiClient::new(server.uri())
        .unwrap()
        .with_regions([nyc_with_systems()]);
    let err = client.fetch_feed("nyc").await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn regions_without_systems_use_whole_region_feed() {
    let server = MockServer::start().await;
    Mock::given(matchers::path("/feeds/ldn.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed("v1", "2026-10-01T08:00:00Z")))
        .expect(1)
        .mount(&server)
        .await;

    let client = TransitApiClient::new(server.uri())
        .unwrap()
        .with_regions([nyc_with_systems()]);
    client.fetch_feed("ldn").await.unwrap();
}
