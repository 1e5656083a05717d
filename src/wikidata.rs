use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::db::CacheStore;
use crate::errors::{AppError, AppResult};
use crate::http::{ResilientClient, RetryPolicy};
use crate::models::{GeoPoint, LocationKind, RawLocation, TitleId};

const SPARQL_TIMEOUT: Duration = Duration::from_secs(90);
const SPARQL_ACCEPT: &str = "application/sparql-results+json";

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlValue>>,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

/// Filming (P915) and narrative (P840) locations from the Wikidata query service.
///
/// Alternate source; the default pipeline run does not call it.
pub struct WikidataClient {
    http: ResilientClient,
    endpoint: String,
    store: Option<CacheStore>,
    pause_after_query: Duration,
}

impl WikidataClient {
    pub fn new(config: &PipelineConfig, store: Option<CacheStore>) -> AppResult<Self> {
        let http = ResilientClient::with_policy(
            SPARQL_TIMEOUT,
            &config.user_agent,
            RetryPolicy::from_config(config),
        )?;
        Ok(Self {
            http,
            endpoint: config.wikidata_sparql_url.clone(),
            store,
            pause_after_query: Duration::from_secs(1),
        })
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_after_query = pause;
        self
    }

    pub async fn fetch_all(
        &self,
        titles: &[TitleId],
        batch_size: usize,
    ) -> AppResult<BTreeMap<TitleId, Vec<RawLocation>>> {
        let mut out = BTreeMap::new();
        for (index, batch) in titles.chunks(batch_size.max(1)).enumerate() {
            info!(batch = index + 1, titles = batch.len(), "querying wikidata batch");
            out.extend(self.fetch_locations_batch(batch).await?);
        }
        Ok(out)
    }

    /// Every requested title appears in the result, with an empty list when it has no
    /// bindings.
    pub async fn fetch_locations_batch(
        &self,
        titles: &[TitleId],
    ) -> AppResult<BTreeMap<TitleId, Vec<RawLocation>>> {
        let mut out: BTreeMap<TitleId, Vec<RawLocation>> = BTreeMap::new();
        let mut missing = Vec::new();
        for title in titles {
            match self.cached_rows(title) {
                Some(rows) => {
                    out.insert(title.clone(), rows);
                }
                None => missing.push(title.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(out);
        }

        let mut fetched: BTreeMap<TitleId, Vec<RawLocation>> =
            missing.iter().map(|title| (title.clone(), Vec::new())).collect();
        for row in self.query(&missing).await? {
            fetched.entry(row.title_id.clone()).or_default().push(row);
        }

        if let Some(store) = &self.store {
            for title in &missing {
                let rows = fetched.get(title).map(Vec::as_slice).unwrap_or(&[]);
                if let Err(err) = store.set_wikidata(title.as_str(), &serde_json::to_value(rows)?) {
                    warn!(title_id = %title, ?err, "failed to cache wikidata rows");
                }
            }
        }
        out.extend(fetched);
        Ok(out)
    }

    fn cached_rows(&self, title: &TitleId) -> Option<Vec<RawLocation>> {
        let store = self.store.as_ref()?;
        let entry = match store.get_wikidata(title.as_str()) {
            Ok(entry) => entry?,
            Err(err) => {
                debug!(title_id = %title, ?err, "unreadable wikidata cache row");
                return None;
            }
        };
        serde_json::from_value(entry.payload).ok()
    }

    async fn query(&self, titles: &[TitleId]) -> AppResult<Vec<RawLocation>> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(SPARQL_ACCEPT));
        let query = build_query(titles);
        let response = self
            .http
            .get(&self.endpoint, &[("query", query.as_str())], &headers)
            .await?;
        if !response.is_success() {
            return Err(AppError::Upstream(format!(
                "wikidata query returned status {}",
                response.status
            )));
        }
        let parsed: SparqlResponse = serde_json::from_slice(&response.body)?;
        sleep(self.pause_after_query).await;
        Ok(parse_bindings(parsed.results.bindings))
    }
}

pub fn build_query(titles: &[TitleId]) -> String {
    let values = titles
        .iter()
        .map(|title| format!("\"{title}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        r#"SELECT ?tconst ?kind ?loc ?locLabel ?coord WHERE {{
  VALUES ?tconst {{ {values} }}
  ?film wdt:P345 ?tconst .
  {{ ?film wdt:P915 ?loc . BIND("filming" AS ?kind) }}
  UNION
  {{ ?film wdt:P840 ?loc . BIND("featured" AS ?kind) }}
  OPTIONAL {{ ?loc wdt:P625 ?coord . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

fn parse_bindings(bindings: Vec<HashMap<String, SparqlValue>>) -> Vec<RawLocation> {
    bindings
        .into_iter()
        .filter_map(|binding| {
            let value = |key: &str| binding.get(key).map(|v| v.value.as_str());
            let title_id = TitleId::parse(value("tconst")?).ok()?;
            let kind = LocationKind::parse(value("kind")?).ok()?;
            let item = value("loc")?.to_string();
            let label = value("locLabel")
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| item.rsplit('/').next().unwrap_or(&item).to_string());
            let point = value("coord").and_then(parse_wkt_point);
            Some(RawLocation {
                title_id,
                kind,
                item: Some(item),
                label,
                point,
            })
        })
        .collect()
}

/// Parses a WKT `Point(lon lat)` literal.
pub fn parse_wkt_point(value: &str) -> Option<GeoPoint> {
    let inside = value.trim().strip_prefix("Point(")?.strip_suffix(')')?;
    let mut parts = inside.split_whitespace();
    let lon = parts.next()?.parse::<f64>().ok()?;
    let lat = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(GeoPoint::new(lat, lon))
}
