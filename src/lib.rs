pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod errors;
pub mod export;
pub mod features;
pub mod geocode;
pub mod http;
pub mod locations;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod ratelimit;
pub mod secrets;
pub mod wikidata;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{CachedPayload, JsonFileCache, PayloadCache};
pub use crate::classify::{classify, LocationClass};
pub use crate::config::PipelineConfig;
pub use crate::db::CacheStore;
pub use crate::errors::{AppError, AppResult};
pub use crate::features::{aggregate, haversine_km, title_features};
pub use crate::geocode::{GeocodeEnricher, GeocodeStats, Geocoder, NominatimGeocoder};
pub use crate::http::{FetchResponse, ResilientClient, RetryPolicy};
pub use crate::locations::{FetchOutcome, LocationApiClient, TitleLocations};
pub use crate::models::{GeoPoint, LocationKind, LocationRecord, RawLocation, TitleFeatures, TitleId};
pub use crate::normalize::location_labels;
pub use crate::pipeline::{FetchStats, LocationPipeline, PipelineOutput};
pub use crate::secrets::{resolve_rapidapi_key, SecretVault};

/// Installs the global fmt subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,film_locations=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
