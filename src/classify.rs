use serde::{Deserialize, Serialize};

/// Place names that only exist in fiction. Matched case-insensitively as substrings.
const FICTIONAL_PLACES: &[&str] = &[
    "gotham",
    "metropolis",
    "hogwarts",
    "middle-earth",
    "westeros",
    "atlantis",
    "pandora",
    "springfield (fictional)",
    "tatooine",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationClass {
    Real,
    Fictional,
    Unknown,
}

impl LocationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationClass::Real => "real",
            LocationClass::Fictional => "fictional",
            LocationClass::Unknown => "unknown",
        }
    }
}

/// Returns `(class, is_fictional)`. Coordinates always win over the lexicon.
pub fn classify(label: &str, lat: Option<f64>, lon: Option<f64>) -> (LocationClass, bool) {
    if lat.is_some() && lon.is_some() {
        return (LocationClass::Real, false);
    }
    if matches_fictional_place(label) {
        return (LocationClass::Fictional, true);
    }
    (LocationClass::Unknown, false)
}

fn matches_fictional_place(label: &str) -> bool {
    if label.trim().is_empty() {
        return false;
    }
    let lowered = label.to_lowercase();
    FICTIONAL_PLACES.iter().any(|place| lowered.contains(place))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_match_without_coordinates_is_fictional() {
        assert_eq!(
            classify("Gotham City", None, None),
            (LocationClass::Fictional, true)
        );
        assert_eq!(
            classify("The Shire, MIDDLE-EARTH", None, None),
            (LocationClass::Fictional, true)
        );
        assert_eq!(
            classify("Springfield (fictional)", None, None),
            (LocationClass::Fictional, true)
        );
    }

    #[test]
    fn coordinates_dominate_lexicon() {
        assert_eq!(
            classify("Paris", Some(48.8566), Some(2.3522)),
            (LocationClass::Real, false)
        );
        assert_eq!(
            classify("Gotham", Some(40.0), Some(-74.0)),
            (LocationClass::Real, false)
        );
    }

    #[test]
    fn everything_else_is_unknown() {
        assert_eq!(
            classify("Unknown Place", None, None),
            (LocationClass::Unknown, false)
        );
        assert_eq!(classify("", None, None), (LocationClass::Unknown, false));
        // generic words alone are not evidence of fiction
        assert_eq!(
            classify("Kingdom of Fife", None, None),
            (LocationClass::Unknown, false)
        );
        // half a coordinate pair is no coordinate
        assert_eq!(
            classify("Springfield, Illinois", Some(39.8), None),
            (LocationClass::Unknown, false)
        );
    }
}
