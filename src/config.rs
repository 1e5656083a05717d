use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_RAPIDAPI_HOST: &str = "imdb-com.p.rapidapi.com";
pub const DEFAULT_RAPIDAPI_KEY_ENV_VAR: &str = "IMDB_RAPIDAPI_KEY";
pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_WIKIDATA_SPARQL_URL: &str = "https://query.wikidata.org/sparql";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub user_agent: String,
    pub out_dir: PathBuf,
    pub cache_db_path: PathBuf,
    pub rapidapi_host: String,
    pub rapidapi_key_env_var: String,
    pub rapidapi_key: Option<SecretString>,
    pub batch_size: usize,
    pub request_sleep: Duration,
    pub location_cache_dir: PathBuf,
    pub fetch_concurrency: usize,
    pub request_timeout: Duration,
    pub retry_total: u32,
    pub backoff_factor: f64,
    pub enable_geocoding: bool,
    pub geocode_sleep: Duration,
    pub geocode_provider: String,
    pub geocoder_endpoint: String,
    pub wikidata_sparql_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicPipelineConfig {
    pub user_agent: String,
    pub out_dir: String,
    pub cache_db_path: String,
    pub rapidapi_host: String,
    pub batch_size: usize,
    pub request_sleep_ms: u64,
    pub location_cache_dir: String,
    pub fetch_concurrency: usize,
    pub request_timeout_secs: u64,
    pub retry_total: u32,
    pub backoff_factor: f64,
    pub enable_geocoding: bool,
    pub geocode_sleep_ms: u64,
    pub geocode_provider: String,
    pub has_rapidapi_key: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: "film-locations/0.1 (contact: you@example.com)".to_string(),
            out_dir: PathBuf::from("data_out"),
            cache_db_path: PathBuf::from("cache.sqlite"),
            rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
            rapidapi_key_env_var: DEFAULT_RAPIDAPI_KEY_ENV_VAR.to_string(),
            rapidapi_key: None,
            batch_size: 150,
            request_sleep: Duration::from_millis(300),
            location_cache_dir: PathBuf::from("data_out/rapidapi_location_cache"),
            fetch_concurrency: 1,
            request_timeout: Duration::from_secs(60),
            retry_total: 6,
            backoff_factor: 0.6,
            enable_geocoding: false,
            geocode_sleep: Duration::from_millis(1_000),
            geocode_provider: "nominatim".to_string(),
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            wikidata_sparql_url: DEFAULT_WIKIDATA_SPARQL_URL.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        let rapidapi_key = env::var(&defaults.rapidapi_key_env_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from);
        Self {
            user_agent: env::var("FILMLOC_USER_AGENT").unwrap_or(defaults.user_agent),
            out_dir: env::var("FILMLOC_OUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.out_dir),
            cache_db_path: env::var("FILMLOC_CACHE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_db_path),
            rapidapi_host: env::var("FILMLOC_RAPIDAPI_HOST")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.rapidapi_host),
            rapidapi_key,
            batch_size: parse_usize("FILMLOC_BATCH_SIZE", defaults.batch_size).max(1),
            request_sleep: Duration::from_millis(parse_u64("FILMLOC_SLEEP_MS", 300)),
            location_cache_dir: env::var("FILMLOC_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.location_cache_dir),
            fetch_concurrency: parse_usize("FILMLOC_FETCH_CONCURRENCY", 1).max(1),
            request_timeout: Duration::from_secs(parse_u64("FILMLOC_TIMEOUT_SECS", 60)),
            retry_total: parse_u32("FILMLOC_RETRIES", defaults.retry_total),
            backoff_factor: parse_f64("FILMLOC_BACKOFF_FACTOR", defaults.backoff_factor).max(0.0),
            enable_geocoding: parse_bool("FILMLOC_ENABLE_GEOCODING", defaults.enable_geocoding),
            geocode_sleep: Duration::from_millis(parse_u64("FILMLOC_GEOCODE_SLEEP_MS", 1_000)),
            geocoder_endpoint: env::var("FILMLOC_GEOCODER_URL")
                .unwrap_or(defaults.geocoder_endpoint),
            wikidata_sparql_url: env::var("FILMLOC_WIKIDATA_URL")
                .unwrap_or(defaults.wikidata_sparql_url),
            ..defaults
        }
    }

    pub fn require_rapidapi_key(&self) -> AppResult<&SecretString> {
        self.rapidapi_key
            .as_ref()
            .ok_or_else(|| AppError::MissingCredentials {
                env_var: self.rapidapi_key_env_var.clone(),
            })
    }

    pub fn public_profile(&self) -> PublicPipelineConfig {
        PublicPipelineConfig {
            user_agent: self.user_agent.clone(),
            out_dir: self.out_dir.to_string_lossy().to_string(),
            cache_db_path: self.cache_db_path.to_string_lossy().to_string(),
            rapidapi_host: self.rapidapi_host.clone(),
            batch_size: self.batch_size,
            request_sleep_ms: self.request_sleep.as_millis() as u64,
            location_cache_dir: self.location_cache_dir.to_string_lossy().to_string(),
            fetch_concurrency: self.fetch_concurrency,
            request_timeout_secs: self.request_timeout.as_secs(),
            retry_total: self.retry_total,
            backoff_factor: self.backoff_factor,
            enable_geocoding: self.enable_geocoding,
            geocode_sleep_ms: self.geocode_sleep.as_millis() as u64,
            geocode_provider: self.geocode_provider.clone(),
            has_rapidapi_key: self.rapidapi_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
