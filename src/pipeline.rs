use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::JsonFileCache;
use crate::config::PipelineConfig;
use crate::db::CacheStore;
use crate::errors::AppResult;
use crate::features::title_features;
use crate::geocode::{GeocodeEnricher, GeocodeStats, NominatimGeocoder};
use crate::locations::{FetchOutcome, LocationApiClient};
use crate::models::{LocationRecord, TitleFeatures, TitleId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub titles: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub failed: usize,
    pub location_rows: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub titles: Vec<TitleId>,
    pub locations: Vec<LocationRecord>,
    pub features: Vec<TitleFeatures>,
    pub fetch: FetchStats,
    pub geocode: Option<GeocodeStats>,
}

/// Reads raw title ids from either a plain list (one id per line) or a tab-separated
/// table with a `tconst` header column.
pub fn read_title_ids<R: io::Read>(reader: R) -> AppResult<Vec<String>> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut column = 0;
    let mut ids = Vec::new();
    for (index, record) in csv.records().enumerate() {
        let record = record?;
        if index == 0 {
            if let Some(position) = record.iter().position(|field| field.trim() == "tconst") {
                column = position;
                continue;
            }
        }
        if let Some(field) = record.get(column) {
            ids.push(field.trim().to_string());
        }
    }
    Ok(ids)
}

/// Keeps well-formed title ids, first occurrence only.
pub fn prepare_titles<I, S>(ids: I) -> Vec<TitleId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter_map(|id| match TitleId::parse(id.as_ref()) {
            Ok(title) => Some(title),
            Err(err) => {
                debug!(%err, "skipping title id");
                None
            }
        })
        .filter(|title| seen.insert(title.clone()))
        .collect()
}

pub struct LocationPipeline {
    batch_size: usize,
    fetch_concurrency: usize,
    locations: LocationApiClient,
    enricher: Option<GeocodeEnricher>,
}

impl LocationPipeline {
    /// Fails with `MissingCredentials` before any network or disk activity when no API
    /// key is configured.
    pub fn from_config(config: &PipelineConfig) -> AppResult<Self> {
        let api_key = config.require_rapidapi_key()?;
        let cache = Arc::new(JsonFileCache::new(&config.location_cache_dir));
        let locations = LocationApiClient::new(config, api_key, cache)?;
        let enricher = if config.enable_geocoding {
            let store = CacheStore::open(&config.cache_db_path)?;
            let geocoder = Arc::new(NominatimGeocoder::new(config)?);
            Some(GeocodeEnricher::new(store, geocoder, config.geocode_sleep))
        } else {
            None
        };
        Ok(Self::with_parts(config, locations, enricher))
    }

    pub fn with_parts(
        config: &PipelineConfig,
        locations: LocationApiClient,
        enricher: Option<GeocodeEnricher>,
    ) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            fetch_concurrency: config.fetch_concurrency.max(1),
            locations,
            enricher,
        }
    }

    pub async fn run<I, S>(&self, title_ids: I) -> PipelineOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let titles = prepare_titles(title_ids);
        info!(titles = titles.len(), "loaded titles");

        let (locations, fetch, geocode) = self.build_location_table(&titles).await;
        info!(rows = locations.len(), "location rows");

        let features = title_features(&titles, &locations);
        PipelineOutput {
            titles,
            locations,
            features,
            fetch,
            geocode,
        }
    }

    /// Fetches, classifies and optionally geocodes every title into the long table.
    pub async fn build_location_table(
        &self,
        titles: &[TitleId],
    ) -> (Vec<LocationRecord>, FetchStats, Option<GeocodeStats>) {
        let mut stats = FetchStats {
            titles: titles.len(),
            ..FetchStats::default()
        };
        let mut records = Vec::new();

        let total_batches = titles.len().div_ceil(self.batch_size);
        for (index, batch) in titles.chunks(self.batch_size).enumerate() {
            let results: Vec<_> = stream::iter(batch)
                .map(|title| self.locations.filming_locations(title))
                .buffered(self.fetch_concurrency)
                .collect()
                .await;

            for result in results {
                match result.outcome {
                    FetchOutcome::Cached => stats.cache_hits += 1,
                    FetchOutcome::Fetched => stats.fetched += 1,
                    FetchOutcome::Failed => stats.failed += 1,
                }
                records.extend(result.into_raw().into_iter().map(LocationRecord::classified));
            }
            info!(
                batch = index + 1,
                batches = total_batches,
                cache_hits = stats.cache_hits,
                fetched = stats.fetched,
                failed = stats.failed,
                "location batch complete"
            );
        }

        let geocode = match &self.enricher {
            Some(enricher) => {
                let (enriched, geocode_stats) = enricher.enrich(records).await;
                records = enriched;
                info!(
                    resolved = geocode_stats.resolved,
                    unresolved = geocode_stats.unresolved,
                    cache_hits = geocode_stats.cache_hits,
                    "geocoding complete"
                );
                Some(geocode_stats)
            }
            None => None,
        };

        stats.location_rows = records.len();
        (records, stats, geocode)
    }
}
