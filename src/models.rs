use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::{classify, LocationClass};
use crate::errors::{AppError, AppResult};

/// IMDb title identifier, `tt` followed by one or more ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TitleId(String);

impl TitleId {
    pub fn parse(value: &str) -> AppResult<Self> {
        let trimmed = value.trim();
        let valid = trimmed
            .strip_prefix("tt")
            .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AppError::Parse(format!("invalid title id: {value:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TitleId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TitleId> for String {
    fn from(value: TitleId) -> Self {
        value.0
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Filming,
    Featured,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Filming => "filming",
            LocationKind::Featured => "featured",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "filming" => Ok(LocationKind::Filming),
            "featured" => Ok(LocationKind::Featured),
            _ => Err(AppError::Parse(format!("invalid location kind: {value}"))),
        }
    }

    /// Column name used in the feature table.
    pub fn count_column(&self) -> String {
        format!("n_{}_locations", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Coordinates are only meaningful as a pair.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Self { lat, lon }),
            _ => None,
        }
    }
}

/// A location row before classification, as produced by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub title_id: TitleId,
    pub kind: LocationKind,
    pub item: Option<String>,
    pub label: String,
    pub point: Option<GeoPoint>,
}

/// One row of the long table. Class and fictional flag are derived from label and
/// coordinates and cannot be set independently.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    title_id: TitleId,
    kind: LocationKind,
    item: Option<String>,
    label: String,
    point: Option<GeoPoint>,
    class: LocationClass,
    is_fictional: bool,
}

impl LocationRecord {
    pub fn classified(raw: RawLocation) -> Self {
        let (class, is_fictional) = classify(
            &raw.label,
            raw.point.map(|p| p.lat),
            raw.point.map(|p| p.lon),
        );
        Self {
            title_id: raw.title_id,
            kind: raw.kind,
            item: raw.item,
            label: raw.label,
            point: raw.point,
            class,
            is_fictional,
        }
    }

    /// Returns a copy carrying `point`, reclassified.
    pub fn with_point(self, point: GeoPoint) -> Self {
        Self::classified(RawLocation {
            title_id: self.title_id,
            kind: self.kind,
            item: self.item,
            label: self.label,
            point: Some(point),
        })
    }

    pub fn title_id(&self) -> &TitleId {
        &self.title_id
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn item(&self) -> Option<&str> {
        self.item.as_deref()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn point(&self) -> Option<GeoPoint> {
        self.point
    }

    pub fn lat(&self) -> Option<f64> {
        self.point.map(|p| p.lat)
    }

    pub fn lon(&self) -> Option<f64> {
        self.point.map(|p| p.lon)
    }

    pub fn class(&self) -> LocationClass {
        self.class
    }

    pub fn is_fictional(&self) -> bool {
        self.is_fictional
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleFeatures {
    pub title_id: TitleId,
    /// One entry per kind observed anywhere in the long table, zero-filled.
    pub counts: BTreeMap<LocationKind, usize>,
    pub has_fictional_featured_or_unknown: bool,
    pub min_km_film_to_featured: Option<f64>,
}

impl TitleFeatures {
    pub fn count(&self, kind: LocationKind) -> Option<usize> {
        self.counts.get(&kind).copied()
    }
}
