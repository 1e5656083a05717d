use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use film_locations::config::PipelineConfig;
use film_locations::export::write_tables;
use film_locations::pipeline::{read_title_ids, LocationPipeline};
use film_locations::secrets::{resolve_rapidapi_key, SecretVault, VAULT_SERVICE_NAME};

/// Builds the filming-location long table and per-title features for a list of IMDb ids.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File with one title id per line, or a TSV with a `tconst` column
    #[arg(short, long)]
    titles: PathBuf,

    /// Output directory for the CSV tables (overrides FILMLOC_OUT_DIR)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Geocode rows without coordinates (overrides FILMLOC_ENABLE_GEOCODING)
    #[arg(long)]
    geocode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    film_locations::init_tracing();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(out_dir) = args.out_dir {
        if std::env::var_os("FILMLOC_CACHE_DIR").is_none() {
            config.location_cache_dir = out_dir.join("rapidapi_location_cache");
        }
        config.out_dir = out_dir;
    }
    if args.geocode {
        config.enable_geocoding = true;
    }
    resolve_rapidapi_key(&mut config, &SecretVault::new(VAULT_SERVICE_NAME));
    info!(config = ?config.public_profile(), "starting location pipeline");

    let pipeline = LocationPipeline::from_config(&config)?;

    let file = File::open(&args.titles)
        .with_context(|| format!("opening title list {}", args.titles.display()))?;
    let ids = read_title_ids(file)?;
    let output = pipeline.run(ids).await;

    info!(
        titles = output.fetch.titles,
        cache_hits = output.fetch.cache_hits,
        fetched = output.fetch.fetched,
        failed = output.fetch.failed,
        rows = output.fetch.location_rows,
        "fetch summary"
    );

    let (long_path, wide_path) = write_tables(&config.out_dir, &output.locations, &output.features)?;
    info!(path = %long_path.display(), "wrote location table");
    info!(path = %wide_path.display(), "wrote title features");
    Ok(())
}
