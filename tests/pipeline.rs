use std::fs;
use std::path::Path;
use std::time::Duration;

use httptest::matchers::{all_of, contains, key, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;
use tempfile::tempdir;

use film_locations::classify::LocationClass;
use film_locations::config::PipelineConfig;
use film_locations::export::{write_tables, FEATURE_TABLE_FILE, LONG_TABLE_FILE};
use film_locations::models::LocationKind;
use film_locations::pipeline::LocationPipeline;

const ENDPOINT: &str = "/title/get-filming-locations";

fn test_config(server: &Server, root: &Path) -> PipelineConfig {
    PipelineConfig {
        rapidapi_host: server.url_str(""),
        rapidapi_key: Some(SecretString::from("test-key".to_string())),
        request_sleep: Duration::ZERO,
        retry_total: 1,
        backoff_factor: 0.0,
        batch_size: 2,
        out_dir: root.join("out"),
        location_cache_dir: root.join("cache"),
        cache_db_path: root.join("cache.sqlite"),
        ..PipelineConfig::default()
    }
}

fn expect_title(server: &Server, tconst: &'static str, body: serde_json::Value) {
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", ENDPOINT),
            request::query(url_decoded(contains(("tconst", tconst)))),
            request::headers(contains(key("x-rapidapi-key"))),
            request::headers(contains(key("x-rapidapi-host"))),
        ])
        .times(1)
        .respond_with(json_encoded(body)),
    );
}

#[tokio::test]
async fn builds_long_table_and_left_joined_features() {
    let server = Server::run();
    expect_title(
        &server,
        "tt0000001",
        json!({"locations": ["Gotham City", "New York City, New York, USA"]}),
    );
    expect_title(&server, "tt0000002", json!([]));

    let dir = tempdir().unwrap();
    let config = test_config(&server, dir.path());
    let pipeline = LocationPipeline::from_config(&config).unwrap();
    let output = pipeline
        .run(["tt0000001", "bogus", "tt0000002", "tt0000001"])
        .await;

    assert_eq!(output.titles.len(), 2);
    assert_eq!(output.locations.len(), 2);
    let first = &output.locations[0];
    assert_eq!(first.title_id().as_str(), "tt0000001");
    assert_eq!(first.kind(), LocationKind::Filming);
    assert_eq!(first.label(), "Gotham City");
    assert_eq!(first.class(), LocationClass::Fictional);
    assert!(first.is_fictional());
    let second = &output.locations[1];
    assert_eq!(second.label(), "New York City, New York, USA");
    assert_eq!(second.class(), LocationClass::Unknown);
    assert!(!second.is_fictional());

    assert_eq!(output.features.len(), 2);
    let with_rows = &output.features[0];
    assert_eq!(with_rows.title_id.as_str(), "tt0000001");
    assert_eq!(with_rows.count(LocationKind::Filming), Some(2));
    assert!(with_rows.has_fictional_featured_or_unknown);
    assert_eq!(with_rows.min_km_film_to_featured, None);
    let empty = &output.features[1];
    assert_eq!(empty.title_id.as_str(), "tt0000002");
    assert_eq!(empty.count(LocationKind::Filming), Some(0));
    assert!(!empty.has_fictional_featured_or_unknown);

    assert_eq!(output.fetch.fetched, 2);
    assert_eq!(output.fetch.cache_hits, 0);
    assert_eq!(output.fetch.location_rows, 2);
    assert!(output.geocode.is_none());

    let (long_path, wide_path) =
        write_tables(&config.out_dir, &output.locations, &output.features).unwrap();
    assert!(long_path.ends_with(LONG_TABLE_FILE));
    assert!(wide_path.ends_with(FEATURE_TABLE_FILE));
    let wide = fs::read_to_string(wide_path).unwrap();
    assert!(wide.contains("tt0000002,0,false,"));
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let server = Server::run();
    expect_title(&server, "tt0000001", json!({"locations": [{"location": "Paris, France"}]}));

    let dir = tempdir().unwrap();
    let config = test_config(&server, dir.path());

    let first = LocationPipeline::from_config(&config)
        .unwrap()
        .run(["tt0000001"])
        .await;
    let second = LocationPipeline::from_config(&config)
        .unwrap()
        .run(["tt0000001"])
        .await;

    assert_eq!(first.fetch.fetched, 1);
    assert_eq!(second.fetch.cache_hits, 1);
    assert_eq!(second.fetch.fetched, 0);
    let labels: Vec<&str> = second.locations.iter().map(|r| r.label()).collect();
    assert_eq!(labels, vec!["Paris, France"]);
    assert!(config.location_cache_dir.join("tt0000001.json").exists());
}

#[tokio::test]
async fn exhausted_titles_are_not_cached() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", ENDPOINT))
            .times(2)
            .respond_with(status_code(503)),
    );

    let dir = tempdir().unwrap();
    let config = test_config(&server, dir.path());
    let output = LocationPipeline::from_config(&config)
        .unwrap()
        .run(["tt0000003"])
        .await;

    assert_eq!(output.fetch.failed, 1);
    assert!(output.locations.is_empty());
    assert_eq!(output.features.len(), 1);
    assert!(output.features[0].counts.is_empty());
    assert!(!config.location_cache_dir.join("tt0000003.json").exists());
}

#[tokio::test]
async fn geocoding_promotes_unknown_rows() {
    let server = Server::run();
    expect_title(
        &server,
        "tt0000004",
        json!({"filmingLocations": [{"text": "Paris, France"}, {"text": "Hogwarts"}]}),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("q", "Paris, France")))),
        ])
        .times(1)
        .respond_with(json_encoded(json!([{"lat": "48.8566", "lon": "2.3522"}]))),
    );

    let dir = tempdir().unwrap();
    let config = PipelineConfig {
        enable_geocoding: true,
        geocode_sleep: Duration::ZERO,
        geocoder_endpoint: server.url_str("/search"),
        ..test_config(&server, dir.path())
    };
    let output = LocationPipeline::from_config(&config)
        .unwrap()
        .run(["tt0000004"])
        .await;

    assert_eq!(output.locations.len(), 2);
    let paris = &output.locations[0];
    assert_eq!(paris.class(), LocationClass::Real);
    assert_eq!(paris.lat(), Some(48.8566));
    let hogwarts = &output.locations[1];
    assert_eq!(hogwarts.class(), LocationClass::Fictional);
    assert!(hogwarts.point().is_none());

    let stats = output.geocode.unwrap();
    assert_eq!(stats.candidates, 1);
    assert_eq!(stats.resolved, 1);
    assert!(config.cache_db_path.exists());
}
