//! Single-flight transit updates: fetch, validate, merge into the region cache.
//!
//! At most one fetch sequence runs per region. A caller arriving while one is
//! in flight joins it and receives a clone of the same outcome. Each flight
//! runs as its own tokio task, so dropping a caller never cancels the update
//! for the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::FetchError;
use crate::cache::RegionDataCache;
use crate::models::TransitDataset;
use crate::report::{ErrorReport, ErrorReporter, TracingReporter};

use super::retry::{RetryDecision, RetryPolicy};
use super::{TransitSource, UpdateError};

type UpdateResult = Result<TransitDataset, UpdateError>;
type SharedUpdate = Shared<BoxFuture<'static, UpdateResult>>;

/// Tuning knobs for [`TransitDataUpdater`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// TTL applied to every dataset written to the cache.
    pub cache_ttl: Duration,
    /// Upper bound for a single fetch attempt.
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    /// Regions updated concurrently by [`TransitDataUpdater::update_all_regions`].
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(15 * 60),
            attempt_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            batch_size: 3,
            batch_pause: Duration::from_secs(1),
        }
    }
}

/// Keeps the region cache supplied with fresh transit data.
///
/// Cheap to clone; clones share the in-flight table and the cache.
#[derive(Clone)]
pub struct TransitDataUpdater {
    inner: Arc<UpdaterInner>,
}

struct UpdaterInner {
    source: Arc<dyn TransitSource>,
    cache: Arc<RegionDataCache<TransitDataset>>,
    config: UpdaterConfig,
    reporter: Arc<dyn ErrorReporter>,
    in_flight: Mutex<HashMap<String, SharedUpdate>>,
}

/// Removes a region's in-flight entry when its task ends, including by panic.
struct FlightGuard {
    inner: Arc<UpdaterInner>,
    region_id: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.region_id);
    }
}

impl TransitDataUpdater {
    pub fn new(
        source: Arc<dyn TransitSource>,
        cache: Arc<RegionDataCache<TransitDataset>>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                source,
                cache,
                config,
                reporter: Arc::new(TracingReporter),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Send update failures to `reporter` instead of the log.
    pub fn with_reporter(self, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                source: Arc::clone(&self.inner.source),
                cache: Arc::clone(&self.inner.cache),
                config: self.inner.config.clone(),
                reporter,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<RegionDataCache<TransitDataset>> {
        &self.inner.cache
    }

    /// Last known good dataset for a region, if it is still cached.
    pub fn cached(&self, region_id: &str) -> Option<TransitDataset> {
        self.inner.cache.get(region_id)
    }

    pub fn is_update_in_progress(&self, region_id: &str) -> bool {
        self.inner.in_flight.lock().contains_key(region_id)
    }

    /// Regions with an update currently in flight, sorted.
    pub fn regions_in_progress(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.inner.in_flight.lock().keys().cloned().collect();
        regions.sort();
        regions
    }

    /// Fetch, validate and cache fresh data for `region_id`.
    ///
    /// Joins an update already in flight for the same region. On failure the
    /// cached dataset, if any, is left exactly as it was.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn update_region_transit_data(&self, region_id: &str) -> UpdateResult {
        let flight = {
            let mut in_flight = self.inner.in_flight.lock();
            // A settled entry is left behind only if its task never ran
            match in_flight.get(region_id).filter(|f| f.peek().is_none()) {
                Some(existing) => {
                    debug!(region = region_id, "Joining in-flight transit update");
                    existing.clone()
                }
                None => {
                    let flight = self.start_flight(region_id);
                    in_flight.insert(region_id.to_string(), flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Spawn the update task. Called with the in-flight lock held, so the
    /// task's guard cannot remove the entry before it is inserted.
    fn start_flight(&self, region_id: &str) -> SharedUpdate {
        let inner = Arc::clone(&self.inner);
        let region = region_id.to_string();
        let handle = tokio::spawn(async move {
            let guard = FlightGuard { inner, region_id: region };
            let result = guard.inner.run_update(&guard.region_id).await;
            drop(guard);
            result
        });

        let region_id = region_id.to_string();
        handle
            .map(move |joined| match joined {
                Ok(result) => result,
                Err(e) => Err(UpdateError::Aborted {
                    region_id,
                    message: e.to_string(),
                }),
            })
            .boxed()
            .shared()
    }

    /// Update every region in `region_ids`, a batch at a time.
    ///
    /// Regions within a batch run concurrently; batches are separated by the
    /// configured pause. Results come back in input order.
    pub async fn update_all_regions<S: AsRef<str>>(
        &self,
        region_ids: &[S],
    ) -> Vec<(String, UpdateResult)> {
        let batch_size = self.inner.config.batch_size.max(1);
        let mut results = Vec::with_capacity(region_ids.len());

        let batches: Vec<_> = region_ids.chunks(batch_size).collect();
        let batch_count = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let outcomes = future::join_all(
                batch
                    .iter()
                    .map(|id| self.update_region_transit_data(id.as_ref())),
            )
            .await;
            results.extend(
                batch
                    .iter()
                    .map(|id| id.as_ref().to_string())
                    .zip(outcomes),
            );

            if i + 1 < batch_count {
                tokio::time::sleep(self.inner.config.batch_pause).await;
            }
        }

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            regions = results.len(),
            failed, "Finished updating transit regions"
        );
        results
    }
}

impl UpdaterInner {
    async fn run_update(&self, region_id: &str) -> UpdateResult {
        let previous = self.cache.get(region_id);

        let fresh = match self.fetch_with_retry(region_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.reporter.report(ErrorReport::Update(e.clone()));
                return Err(e);
            }
        };

        // Something may have landed in the cache while we were fetching
        let current = self.cache.get(region_id).or(previous);
        let winner = match current {
            Some(current) if !fresh.is_newer_than(&current) => {
                debug!(
                    region = region_id,
                    cached = %current.fetched_at,
                    fetched = %fresh.fetched_at,
                    "Cached transit data is at least as new, keeping it"
                );
                current
            }
            _ => fresh,
        };

        self.cache
            .set(region_id, winner.clone(), self.config.cache_ttl);
        info!(
            region = region_id,
            version = %winner.version,
            routes = winner.route_count(),
            "Transit data updated"
        );
        Ok(winner)
    }

    async fn fetch_with_retry(&self, region_id: &str) -> UpdateResult {
        let timeout = self.config.attempt_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(timeout, self.source.fetch(region_id)).await {
                Ok(Ok(feed)) => {
                    return feed.into_dataset(region_id).map_err(|e| UpdateError::Validation {
                        region_id: region_id.to_string(),
                        message: e.to_string(),
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => FetchError::Timeout(timeout),
            };

            if error.is_validation() {
                return Err(UpdateError::Validation {
                    region_id: region_id.to_string(),
                    message: error.to_string(),
                });
            }

            match self.config.retry.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        region = region_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transit fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp { reason } => {
                    debug!(region = region_id, attempt, reason = %reason, "Giving up on transit fetch");
                    let message = error.to_string();
                    let region_id = region_id.to_string();
                    return Err(if error.is_transient() {
                        UpdateError::TransientFetch {
                            region_id,
                            attempts: attempt,
                            message,
                        }
                    } else {
                        UpdateError::Permanent { region_id, message }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransitFeed;
    use crate::report::CollectingReporter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the scripted source does on one call.
    enum Step {
        Feed(&'static str),
        Fail(FetchError),
        Hang,
    }

    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Self::with_delay(steps, Duration::ZERO)
        }

        fn with_delay(steps: Vec<Step>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransitSource for ScriptedSource {
        async fn fetch(&self, _region_id: &str) -> Result<TransitFeed, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let step = self.steps.lock().pop_front();
            match step {
                Some(Step::Feed(ts)) => Ok(feed(ts)),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) => {
                    future::pending::<()>().await;
                    unreachable!()
                }
                None => Err(FetchError::NotFound("script exhausted".into())),
            }
        }
    }

    fn feed(last_modified: &str) -> TransitFeed {
        TransitFeed {
            version: None,
            last_modified: Some(last_modified.to_string()),
            routes: vec![json!({"id": "L", "name": "L train"})],
            schedules: vec![],
            alerts: vec![],
        }
    }

    fn config() -> UpdaterConfig {
        UpdaterConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter_factor: 0.0,
            },
            ..UpdaterConfig::default()
        }
    }

    fn updater(source: Arc<ScriptedSource>) -> (TransitDataUpdater, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let cache = Arc::new(RegionDataCache::new(4));
        let updater = TransitDataUpdater::new(source, cache, config()).with_reporter(reporter.clone());
        (updater, reporter)
    }

    const T1: &str = "2026-03-01T08:00:00Z";
    const T2: &str = "2026-03-01T09:00:00Z";

    #[tokio::test(start_paused = true)]
    async fn test_successful_update_populates_cache() {
        let source = ScriptedSource::new(vec![Step::Feed(T1)]);
        let (updater, reporter) = updater(source.clone());

        let dataset = updater.update_region_transit_data("nyc").await.unwrap();
        assert_eq!(dataset.region_id, "nyc");
        assert_eq!(dataset.version, T1);
        assert_eq!(updater.cached("nyc"), Some(dataset));
        assert_eq!(source.calls(), 1);
        assert!(reporter.is_empty());
        assert!(!updater.is_update_in_progress("nyc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_fetch() {
        let source = ScriptedSource::with_delay(vec![Step::Feed(T1)], Duration::from_millis(50));
        let (updater, _) = updater(source.clone());

        let (a, b) = tokio::join!(
            updater.update_region_transit_data("nyc"),
            updater.update_region_transit_data("nyc"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(source.calls(), 1);
        assert!(updater.regions_in_progress().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_regions_fetch_independently() {
        let source = ScriptedSource::with_delay(
            vec![Step::Feed(T1), Step::Feed(T1)],
            Duration::from_millis(50),
        );
        let (updater, _) = updater(source.clone());

        let (a, b) = tokio::join!(
            updater.update_region_transit_data("nyc"),
            updater.update_region_transit_data("ldn"),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_visible_during_flight() {
        let source = ScriptedSource::with_delay(vec![Step::Feed(T1)], Duration::from_secs(1));
        let (updater, _) = updater(source);

        let background = updater.clone();
        let task = tokio::spawn(async move { background.update_region_transit_data("nyc").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(updater.is_update_in_progress("nyc"));
        assert_eq!(updater.regions_in_progress(), vec!["nyc".to_string()]);

        task.await.unwrap().unwrap();
        assert!(!updater.is_update_in_progress("nyc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_succeeds() {
        let source = ScriptedSource::new(vec![
            Step::Fail(FetchError::ServerError("502".into())),
            Step::Fail(FetchError::RateLimited),
            Step::Feed(T1),
        ]);
        let (updater, reporter) = updater(source.clone());

        assert!(updater.update_region_transit_data("nyc").await.is_ok());
        assert_eq!(source.calls(), 3);
        assert!(reporter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_cached_dataset() {
        let source = ScriptedSource::new(vec![
            Step::Feed(T1),
            Step::Fail(FetchError::ServerError("down".into())),
            Step::Fail(FetchError::ServerError("down".into())),
            Step::Fail(FetchError::ServerError("down".into())),
        ]);
        let (updater, reporter) = updater(source.clone());

        let good = updater.update_region_transit_data("nyc").await.unwrap();
        let err = updater.update_region_transit_data("nyc").await.unwrap_err();

        assert!(matches!(err, UpdateError::TransientFetch { attempts: 3, .. }));
        assert_eq!(source.calls(), 4);
        assert_eq!(updater.cached("nyc"), Some(good));
        assert_eq!(reporter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let source = ScriptedSource::new(vec![Step::Hang, Step::Feed(T1)]);
        let (updater, _) = updater(source.clone());

        let dataset = updater.update_region_transit_data("nyc").await.unwrap();
        assert_eq!(dataset.version, T1);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_not_retried() {
        let source = ScriptedSource::new(vec![Step::Feed("yesterday-ish"), Step::Feed(T1)]);
        let (updater, reporter) = updater(source.clone());

        let err = updater.update_region_transit_data("nyc").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(source.calls(), 1);
        assert!(updater.cached("nyc").is_none());
        assert_eq!(reporter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_response_not_retried() {
        let source = ScriptedSource::new(vec![Step::Fail(FetchError::InvalidResponse(
            "expected value at line 1".into(),
        ))]);
        let (updater, _) = updater(source.clone());

        let err = updater.update_region_transit_data("nyc").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let source = ScriptedSource::new(vec![Step::Fail(FetchError::Unauthorized)]);
        let (updater, _) = updater(source.clone());

        let err = updater.update_region_transit_data("nyc").await.unwrap_err();
        assert!(matches!(err, UpdateError::Permanent { .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_fetch_does_not_replace_newer_cache() {
        let source = ScriptedSource::new(vec![Step::Feed(T2), Step::Feed(T1)]);
        let (updater, _) = updater(source);

        let newer = updater.update_region_transit_data("nyc").await.unwrap();
        let returned = updater.update_region_transit_data("nyc").await.unwrap();

        assert_eq!(returned, newer);
        assert_eq!(updater.cached("nyc").unwrap().version, T2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_fetch_replaces_cache() {
        let source = ScriptedSource::new(vec![Step::Feed(T1), Step::Feed(T2)]);
        let (updater, _) = updater(source);

        updater.update_region_transit_data("nyc").await.unwrap();
        let returned = updater.update_region_transit_data("nyc").await.unwrap();
        assert_eq!(returned.version, T2);
        assert_eq!(updater.cached("nyc").unwrap().version, T2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_all_regions_batches_in_order() {
        let source = ScriptedSource::new(vec![
            Step::Feed(T1),
            Step::Feed(T1),
            Step::Feed(T1),
            Step::Fail(FetchError::NotFound("sfo".into())),
        ]);
        let (updater, reporter) = updater(source.clone());

        let started = tokio::time::Instant::now();
        let results = updater.update_all_regions(&["nyc", "ldn", "par", "sfo"]).await;

        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["nyc", "ldn", "par", "sfo"]);
        assert_eq!(results.iter().filter(|(_, r)| r.is_ok()).count(), 3);
        assert_eq!(source.calls(), 4);
        assert_eq!(reporter.len(), 1);
        // One pause between the two batches
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
