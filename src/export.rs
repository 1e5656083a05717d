use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::AppResult;
use crate::models::{LocationKind, LocationRecord, TitleFeatures};

pub const LONG_TABLE_FILE: &str = "movies_locations_long.csv";
pub const FEATURE_TABLE_FILE: &str = "movies_locations_title_features.csv";

#[derive(Serialize)]
struct LongRow<'a> {
    tconst: &'a str,
    location_kind: &'a str,
    location_item: Option<&'a str>,
    location_label: &'a str,
    lat: Option<f64>,
    lon: Option<f64>,
    location_class: &'a str,
    is_fictional: bool,
}

impl<'a> From<&'a LocationRecord> for LongRow<'a> {
    fn from(record: &'a LocationRecord) -> Self {
        Self {
            tconst: record.title_id().as_str(),
            location_kind: record.kind().as_str(),
            location_item: record.item(),
            location_label: record.label(),
            lat: record.lat(),
            lon: record.lon(),
            location_class: record.class().as_str(),
            is_fictional: record.is_fictional(),
        }
    }
}

pub fn write_long_table<W: io::Write>(writer: W, records: &[LocationRecord]) -> AppResult<()> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record([
        "tconst",
        "location_kind",
        "location_item",
        "location_label",
        "lat",
        "lon",
        "location_class",
        "is_fictional",
    ])?;
    for record in records {
        csv.serialize(LongRow::from(record))?;
    }
    csv.flush()?;
    Ok(())
}

/// Count columns follow the kinds present in `features`; null values are empty cells.
pub fn write_feature_table<W: io::Write>(writer: W, features: &[TitleFeatures]) -> AppResult<()> {
    let kinds: BTreeSet<LocationKind> = features
        .iter()
        .flat_map(|row| row.counts.keys().copied())
        .collect();

    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec!["tconst".to_string()];
    header.extend(kinds.iter().map(LocationKind::count_column));
    header.push("has_fictional_featured_or_unknown".into());
    header.push("min_km_film_to_featured".into());
    csv.write_record(&header)?;

    for row in features {
        let mut record = vec![row.title_id.to_string()];
        record.extend(
            kinds
                .iter()
                .map(|kind| row.count(*kind).unwrap_or(0).to_string()),
        );
        record.push(row.has_fictional_featured_or_unknown.to_string());
        record.push(
            row.min_km_film_to_featured
                .map(|km| km.to_string())
                .unwrap_or_default(),
        );
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes both tables under `out_dir` and returns their paths.
pub fn write_tables(
    out_dir: &Path,
    records: &[LocationRecord],
    features: &[TitleFeatures],
) -> AppResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)?;
    let long_path = out_dir.join(LONG_TABLE_FILE);
    let wide_path = out_dir.join(FEATURE_TABLE_FILE);
    write_long_table(fs::File::create(&long_path)?, records)?;
    write_feature_table(fs::File::create(&wide_path)?, features)?;
    Ok((long_path, wide_path))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::{GeoPoint, RawLocation, TitleId};

    #[test]
    fn long_table_has_fixed_columns() {
        let records = vec![
            LocationRecord::classified(RawLocation {
                title_id: TitleId::parse("tt0000001").unwrap(),
                kind: LocationKind::Filming,
                item: None,
                label: "Gotham City".into(),
                point: None,
            }),
            LocationRecord::classified(RawLocation {
                title_id: TitleId::parse("tt0000001").unwrap(),
                kind: LocationKind::Featured,
                item: Some("http://www.wikidata.org/entity/Q90".into()),
                label: "Paris, France".into(),
                point: Some(GeoPoint::new(48.5, 2.25)),
            }),
        ];
        let mut out = Vec::new();
        write_long_table(&mut out, &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "tconst,location_kind,location_item,location_label,lat,lon,location_class,is_fictional"
        );
        assert_eq!(lines[1], "tt0000001,filming,,Gotham City,,,fictional,true");
        assert_eq!(
            lines[2],
            "tt0000001,featured,http://www.wikidata.org/entity/Q90,\"Paris, France\",48.5,2.25,real,false"
        );
    }

    #[test]
    fn feature_table_columns_follow_observed_kinds() {
        let features = vec![
            TitleFeatures {
                title_id: TitleId::parse("tt0000001").unwrap(),
                counts: BTreeMap::from([(LocationKind::Filming, 2)]),
                has_fictional_featured_or_unknown: true,
                min_km_film_to_featured: None,
            },
            TitleFeatures {
                title_id: TitleId::parse("tt0000002").unwrap(),
                counts: BTreeMap::from([(LocationKind::Filming, 0)]),
                has_fictional_featured_or_unknown: false,
                min_km_film_to_featured: Some(12.5),
            },
        ];
        let mut out = Vec::new();
        write_feature_table(&mut out, &features).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "tconst,n_filming_locations,has_fictional_featured_or_unknown,min_km_film_to_featured",
                "tt0000001,2,true,",
                "tt0000002,0,false,12.5",
            ]
        );
    }
}
