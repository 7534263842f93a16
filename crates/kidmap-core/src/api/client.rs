//! HTTP client for the transit adapter service.
//!
//! The adapter normalizes GTFS and agency feeds into JSON documents. A region
//! with configured transit systems is fetched one system at a time from
//! `{base_url}/feeds/{region_id}/{system_id}.json` and merged; any other
//! region comes whole from `{base_url}/feeds/{region_id}.json`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, warn};

use crate::models::{RegionConfig, TransitFeed, TransitSystem};
use crate::transit::TransitSource;

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// The updater applies its own per-attempt timeout on top; this one only
/// stops a wedged connection from living forever.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header used for the API key when none is configured.
const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Longest region id accepted in a feed URL.
const MAX_REGION_ID_LEN: usize = 64;

/// Transit adapter client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct TransitApiClient {
    client: Client,
    base_url: String,
    api_key: Option<Arc<str>>,
    api_key_header: String,
    regions: Arc<HashMap<String, RegionConfig>>,
}

impl TransitApiClient {
    /// Create a client for the adapter at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            regions: Arc::default(),
        })
    }

    /// Create a new client with the given API key, sharing the connection pool.
    pub fn with_api_key(&self, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: Some(api_key.into()),
            api_key_header: self.api_key_header.clone(),
            regions: Arc::clone(&self.regions),
        }
    }

    /// Fetch the listed regions per transit system instead of whole.
    pub fn with_regions(mut self, regions: impl IntoIterator<Item = RegionConfig>) -> Self {
        self.regions = Arc::new(regions.into_iter().map(|r| (r.id.clone(), r)).collect());
        self
    }

    /// Send the API key under a different header name
    pub fn with_api_key_header(mut self, header_name: impl Into<String>) -> Self {
        self.api_key_header = header_name.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Region and system ids end up in the URL path, so only allow a
    /// conservative character set: ASCII alphanumerics, `-` and `_`.
    fn is_valid_region_id(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_REGION_ID_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn feed_url(&self, region_id: &str) -> String {
        format!("{}/feeds/{}.json", self.base_url, region_id)
    }

    fn system_feed_url(&self, region_id: &str, system_id: &str) -> String {
        format!("{}/feeds/{}/{}.json", self.base_url, region_id, system_id)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, FetchError> {
        Self::headers_with_key(self.api_key.as_deref(), &self.api_key_header)
    }

    fn headers_with_key(key: Option<&str>, header_name: &str) -> Result<header::HeaderMap, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(key) = key {
            let name = header::HeaderName::from_bytes(header_name.as_bytes())
                .map_err(|e| FetchError::InvalidResponse(format!("bad API key header name: {}", e)))?;
            let value = header::HeaderValue::from_str(key)
                .map_err(|e| FetchError::InvalidResponse(format!("bad API key value: {}", e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Key for one system: its own key, then the variable named by
    /// `apiKeyEnv`, then the region's key, then the client's.
    fn resolve_system_key<F>(&self, region: &RegionConfig, system: &TransitSystem, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &String| !k.is_empty();
        system
            .api_key
            .clone()
            .filter(non_empty)
            .or_else(|| system.api_key_env.as_deref().and_then(&lookup).filter(non_empty))
            .or_else(|| region.transit_api_key.clone().filter(non_empty))
            .or_else(|| self.api_key.as_deref().map(str::to_string))
    }

    fn system_headers(&self, region: &RegionConfig, system: &TransitSystem) -> Result<header::HeaderMap, FetchError> {
        let key = self.resolve_system_key(region, system, |name| std::env::var(name).ok());
        let header_name = system.api_key_header.as_deref().unwrap_or(&self.api_key_header);
        Self::headers_with_key(key.as_deref(), header_name)
    }

    async fn get_feed(&self, url: &str, headers: header::HeaderMap, what: &str) -> Result<TransitFeed, FetchError> {
        let response = self.client.get(url).headers(headers).send().await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| FetchError::InvalidResponse(format!("Failed to parse feed for {}: {}", what, e)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }

    /// Fetch the normalized feed for one region
    pub async fn fetch_feed(&self, region_id: &str) -> Result<TransitFeed, FetchError> {
        if !Self::is_valid_region_id(region_id) {
            return Err(FetchError::InvalidRegionId(region_id.to_string()));
        }

        match self.regions.get(region_id) {
            Some(region) if !region.transit_systems.is_empty() => self.fetch_systems(region).await,
            _ => {
                let url = self.feed_url(region_id);
                debug!(url = %url, "Fetching transit feed");
                self.get_feed(&url, self.auth_headers()?, region_id).await
            }
        }
    }

    /// Fetch every system of `region` in order and merge what arrives.
    ///
    /// A system that fails is skipped. Only when every system fails does the
    /// region fail, with the first system's error so retry classification
    /// still applies.
    async fn fetch_systems(&self, region: &RegionConfig) -> Result<TransitFeed, FetchError> {
        let mut parts = Vec::with_capacity(region.transit_systems.len());
        let mut first_error = None;

        for system in &region.transit_systems {
            let result = if Self::is_valid_region_id(&system.id) {
                let url = self.system_feed_url(&region.id, &system.id);
                debug!(url = %url, system = %system.id, "Fetching transit system feed");
                match self.system_headers(region, system) {
                    Ok(headers) => self.get_feed(&url, headers, &system.id).await,
                    Err(e) => Err(e),
                }
            } else {
                Err(FetchError::InvalidRegionId(format!("{}/{}", region.id, system.id)))
            };

            match result {
                Ok(feed) => parts.push(feed),
                Err(e) => {
                    warn!(region = %region.id, system = %system.id, error = %e, "Skipping transit system");
                    first_error.get_or_insert(e);
                }
            }
        }

        match (parts.is_empty(), first_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(TransitFeed::merge(parts)),
        }
    }
}

#[async_trait]
impl TransitSource for TransitApiClient {
    async fn fetch(&self, region_id: &str) -> Result<TransitFeed, FetchError> {
        self.fetch_feed(region_id).await
    }
}
