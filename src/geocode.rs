use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::classify::LocationClass;
use crate::config::PipelineConfig;
use crate::db::CacheStore;
use crate::errors::{AppError, AppResult};
use crate::models::{GeoPoint, LocationRecord};

const GEOCODER_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Tag stored alongside cached results.
    fn provider(&self) -> &str;

    /// Best single match for `query`, or `None` when the service has no answer.
    async fn geocode(&self, query: &str) -> AppResult<Option<GeoPoint>>;
}

pub struct NominatimGeocoder {
    http: Client,
    endpoint: String,
    provider: String,
}

impl NominatimGeocoder {
    pub fn new(config: &PipelineConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(GEOCODER_TIMEOUT)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.clone(),
            provider: config.geocode_provider.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn geocode(&self, query: &str) -> AppResult<Option<GeoPoint>> {
        #[derive(Deserialize)]
        struct SearchHit {
            lat: String,
            lon: String,
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            debug!(query, status = response.status().as_u16(), "geocoder returned non-200");
            return Ok(None);
        }

        let hits: Vec<SearchHit> = response.json().await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };
        let lat = hit
            .lat
            .trim()
            .parse::<f64>()
            .map_err(|err| AppError::Parse(format!("geocoder latitude {:?}: {err}", hit.lat)))?;
        let lon = hit
            .lon
            .trim()
            .parse::<f64>()
            .map_err(|err| AppError::Parse(format!("geocoder longitude {:?}: {err}", hit.lon)))?;
        Ok(Some(GeoPoint::new(lat, lon)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeStats {
    pub candidates: usize,
    pub cache_hits: usize,
    pub geocoder_calls: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// Resolves coordinates for rows that lack them, cache first.
///
/// Only ever moves a row from `unknown` to `real`. Failed or empty lookups are not
/// cached, so a later run asks again; within one run each such label is asked once.
pub struct GeocodeEnricher {
    store: CacheStore,
    geocoder: Arc<dyn Geocoder>,
    pause_after_call: Duration,
}

impl GeocodeEnricher {
    pub fn new(store: CacheStore, geocoder: Arc<dyn Geocoder>, pause_after_call: Duration) -> Self {
        Self {
            store,
            geocoder,
            pause_after_call,
        }
    }

    pub async fn enrich(&self, records: Vec<LocationRecord>) -> (Vec<LocationRecord>, GeocodeStats) {
        let mut stats = GeocodeStats::default();
        let mut enriched = Vec::with_capacity(records.len());
        let mut unresolved_labels = HashSet::new();
        for record in records {
            if !needs_geocoding(&record) {
                enriched.push(record);
                continue;
            }
            stats.candidates += 1;
            let label = record.label().to_string();

            if let Some(point) = self.cached_point(&label) {
                stats.cache_hits += 1;
                stats.resolved += 1;
                enriched.push(record.with_point(point));
                continue;
            }
            if unresolved_labels.contains(&label) {
                stats.unresolved += 1;
                enriched.push(record);
                continue;
            }

            stats.geocoder_calls += 1;
            match self.geocoder.geocode(&label).await {
                Ok(Some(point)) => {
                    if let Err(err) = self.store.set_geocode(&label, point, self.geocoder.provider()) {
                        warn!(?err, label = %label, "failed to cache geocode result");
                    }
                    trace!(label = %label, lat = point.lat, lon = point.lon, "geocoded location");
                    stats.resolved += 1;
                    enriched.push(record.with_point(point));
                    sleep(self.pause_after_call).await;
                }
                Ok(None) => {
                    stats.unresolved += 1;
                    enriched.push(record);
                    unresolved_labels.insert(label);
                }
                Err(err) => {
                    warn!(?err, label = %label, "geocoder lookup failed");
                    stats.unresolved += 1;
                    enriched.push(record);
                    unresolved_labels.insert(label);
                }
            }
        }
        (enriched, stats)
    }

    fn cached_point(&self, label: &str) -> Option<GeoPoint> {
        match self.store.get_geocode(label) {
            Ok(entry) => entry.map(|entry| entry.point),
            Err(err) => {
                warn!(?err, label = %label, "geocode cache read failed; treating as miss");
                None
            }
        }
    }
}

fn needs_geocoding(record: &LocationRecord) -> bool {
    record.point().is_none()
        && record.class() != LocationClass::Fictional
        && !record.label().trim().is_empty()
}
