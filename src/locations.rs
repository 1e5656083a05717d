use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::PayloadCache;
use crate::config::PipelineConfig;
use crate::errors::{AppError, AppResult};
use crate::http::ResilientClient;
use crate::models::{LocationKind, RawLocation, TitleId};
use crate::normalize::location_labels;
use crate::ratelimit::RateLimiter;

const FILMING_LOCATIONS_PATH: &str = "/title/get-filming-locations";
const API_KEY_HEADER: &str = "x-rapidapi-key";
const API_HOST_HEADER: &str = "x-rapidapi-host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached,
    Fetched,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TitleLocations {
    pub title_id: TitleId,
    pub labels: Vec<String>,
    pub outcome: FetchOutcome,
}

impl TitleLocations {
    pub fn into_raw(self) -> Vec<RawLocation> {
        let title_id = self.title_id;
        self.labels
            .into_iter()
            .map(|label| RawLocation {
                title_id: title_id.clone(),
                kind: LocationKind::Filming,
                item: None,
                label,
                point: None,
            })
            .collect()
    }
}

/// Filming locations per title from the RapidAPI IMDb endpoint, cached per title id.
#[derive(Clone)]
pub struct LocationApiClient {
    http: ResilientClient,
    endpoint: String,
    headers: HeaderMap,
    cache: Arc<dyn PayloadCache>,
    limiter: Arc<RateLimiter>,
}

impl LocationApiClient {
    pub fn new(
        config: &PipelineConfig,
        api_key: &SecretString,
        cache: Arc<dyn PayloadCache>,
    ) -> AppResult<Self> {
        let http = ResilientClient::new(config)?;
        let limiter = Arc::new(RateLimiter::new(config.request_sleep));
        Self::with_parts(config, api_key, http, cache, limiter)
    }

    pub fn with_parts(
        config: &PipelineConfig,
        api_key: &SecretString,
        http: ResilientClient,
        cache: Arc<dyn PayloadCache>,
        limiter: Arc<RateLimiter>,
    ) -> AppResult<Self> {
        let (base_url, host) = resolve_endpoint(&config.rapidapi_host)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value(api_key.expose_secret(), "API key")?,
        );
        headers.insert(
            HeaderName::from_static(API_HOST_HEADER),
            header_value(&host, "API host")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            http,
            endpoint: format!("{base_url}{FILMING_LOCATIONS_PATH}"),
            headers,
            cache,
            limiter,
        })
    }

    /// Never fails: an exhausted or unreachable upstream yields no labels for this title.
    pub async fn filming_locations(&self, title_id: &TitleId) -> TitleLocations {
        if let Some(entry) = self.cache.get(title_id.as_str()) {
            debug!(title_id = %title_id, fetched_at = %entry.fetched_at, "location cache hit");
            return TitleLocations {
                title_id: title_id.clone(),
                labels: location_labels(&entry.payload),
                outcome: FetchOutcome::Cached,
            };
        }

        match self.fetch_payload(title_id).await {
            Some(payload) => TitleLocations {
                title_id: title_id.clone(),
                labels: location_labels(&payload),
                outcome: FetchOutcome::Fetched,
            },
            None => TitleLocations {
                title_id: title_id.clone(),
                labels: Vec::new(),
                outcome: FetchOutcome::Failed,
            },
        }
    }

    async fn fetch_payload(&self, title_id: &TitleId) -> Option<Value> {
        self.limiter.wait().await;
        let response = match self
            .http
            .get(&self.endpoint, &[("tconst", title_id.as_str())], &self.headers)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(title_id = %title_id, ?err, "location fetch failed; no data for title");
                return None;
            }
        };

        if response.retries_exhausted() {
            warn!(
                title_id = %title_id,
                status = response.status.as_u16(),
                attempts = response.attempts,
                "location fetch exhausted retries; leaving uncached"
            );
            return None;
        }
        if !response.is_success() {
            debug!(
                title_id = %title_id,
                status = response.status.as_u16(),
                "non-success status from location API"
            );
        }

        // non-JSON bodies are cached as null so the title is not refetched
        let payload = response.json().unwrap_or(Value::Null);
        if let Err(err) = self.cache.set(title_id.as_str(), &payload) {
            warn!(title_id = %title_id, ?err, "failed to cache location payload");
        }
        Some(payload)
    }
}

/// Accepts either a bare host or a full base URL. Returns the base URL without a
/// trailing slash and the value for the host header.
pub fn resolve_endpoint(host_or_url: &str) -> AppResult<(String, String)> {
    let trimmed = host_or_url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let url = Url::parse(trimmed)
            .map_err(|err| AppError::Config(format!("invalid API base URL {trimmed}: {err}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::Config(format!("API base URL has no host: {trimmed}")))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok((trimmed.trim_end_matches('/').to_string(), authority))
    } else if trimmed.is_empty() {
        Err(AppError::Config("API host is empty".into()))
    } else {
        let host = trimmed.trim_end_matches('/');
        Ok((format!("https://{host}"), host.to_string()))
    }
}

fn header_value(value: &str, what: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| AppError::Config(format!("{what} is not a valid header value")))
}
