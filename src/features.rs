use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::models::{GeoPoint, LocationKind, LocationRecord, TitleFeatures, TitleId};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).abs().to_radians();
    let dlon = (b.lon - a.lon).abs().to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push h a hair past 1 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Smallest distance over every filming × featured pair. Brute force; titles carry tens
/// of locations, not thousands.
pub fn min_film_to_featured_km<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a LocationRecord>,
{
    let mut filming = Vec::new();
    let mut featured = Vec::new();
    for record in records {
        match (record.kind(), record.point()) {
            (LocationKind::Filming, Some(point)) => filming.push(point),
            (LocationKind::Featured, Some(point)) => featured.push(point),
            _ => {}
        }
    }

    let mut best: Option<f64> = None;
    for &f in &filming {
        for &g in &featured {
            let distance = haversine_km(f, g);
            if best.map_or(true, |current| distance < current) {
                best = Some(distance);
            }
        }
    }
    best
}

/// One feature row per title id in `titles` (left join), in input order without
/// duplicates. Records for titles outside `titles` are ignored.
pub fn title_features(titles: &[TitleId], records: &[LocationRecord]) -> Vec<TitleFeatures> {
    let observed_kinds: BTreeSet<LocationKind> = records.iter().map(|r| r.kind()).collect();
    let mut by_title: HashMap<&TitleId, Vec<&LocationRecord>> = HashMap::new();
    for record in records {
        by_title.entry(record.title_id()).or_default().push(record);
    }

    let mut seen = HashSet::new();
    titles
        .iter()
        .filter(|title| seen.insert(*title))
        .map(|title| {
            let rows = by_title.get(title).map(Vec::as_slice).unwrap_or(&[]);
            features_for(title, rows, &observed_kinds)
        })
        .collect()
}

/// Feature rows for every title present in `records`, ordered by title id.
pub fn aggregate(records: &[LocationRecord]) -> Vec<TitleFeatures> {
    let titles: BTreeSet<TitleId> = records.iter().map(|r| r.title_id().clone()).collect();
    let titles: Vec<TitleId> = titles.into_iter().collect();
    title_features(&titles, records)
}

fn features_for(
    title: &TitleId,
    rows: &[&LocationRecord],
    observed_kinds: &BTreeSet<LocationKind>,
) -> TitleFeatures {
    let mut counts: BTreeMap<LocationKind, usize> =
        observed_kinds.iter().map(|kind| (*kind, 0)).collect();
    for row in rows {
        *counts.entry(row.kind()).or_insert(0) += 1;
    }

    TitleFeatures {
        title_id: title.clone(),
        counts,
        has_fictional_featured_or_unknown: rows.iter().any(|row| row.is_fictional()),
        min_km_film_to_featured: min_film_to_featured_km(rows.iter().copied()),
    }
}
