use std::collections::HashSet;

use serde_json::{Map, Value};

/// Container keys probed on the top-level object, in priority order.
const CONTAINER_KEYS: &[&str] = &["locations", "filmingLocations", "results", "data"];
/// Keys probed one level deeper when the first container is itself an object.
const NESTED_CONTAINER_KEYS: &[&str] = &["locations", "filmingLocations", "results"];
/// String fields that may carry the label of a location item.
const LABEL_KEYS: &[&str] = &[
    "location",
    "locationName",
    "name",
    "label",
    "text",
    "place",
    "value",
];
/// Item fields that may wrap the label in another object.
const WRAPPER_KEYS: &[&str] = &["location", "place"];
const NESTED_LABEL_KEYS: &[&str] = &["text", "label", "name", "value"];

/// Extracts the location labels from an arbitrary upstream payload.
///
/// Total over any JSON value: unrecognised shapes yield an empty list. Labels are
/// trimmed and de-duplicated case-insensitively, keeping first-seen order and casing.
pub fn location_labels(payload: &Value) -> Vec<String> {
    let Some(candidates) = candidate_items(payload) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter_map(item_label)
        .filter(|label| seen.insert(label.to_lowercase()))
        .collect()
}

fn candidate_items(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => match first_present(map, CONTAINER_KEYS)? {
            Value::Array(items) => Some(items),
            Value::Object(inner) => match first_present(inner, NESTED_CONTAINER_KEYS)? {
                Value::Array(items) => Some(items),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// The first key present wins, whatever its value.
fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

fn item_label(item: &Value) -> Option<String> {
    match item {
        Value::String(text) => non_empty(text),
        Value::Object(map) => string_field(map, LABEL_KEYS).or_else(|| {
            WRAPPER_KEYS.iter().find_map(|key| match map.get(*key) {
                Some(Value::Object(inner)) => string_field(inner, NESTED_LABEL_KEYS),
                _ => None,
            })
        }),
        _ => None,
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(text)) => non_empty(text),
        _ => None,
    })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dedups_case_insensitively_keeping_first_casing() {
        let payload = json!(["Paris, France", "paris, france", "London"]);
        assert_eq!(location_labels(&payload), vec!["Paris, France", "London"]);
    }

    #[test]
    fn unrecognised_shapes_are_empty() {
        for payload in [
            json!(null),
            json!(42),
            json!("Paris"),
            json!(true),
            json!({"unexpected": ["Paris"]}),
            json!({"locations": "Paris"}),
            json!({"data": {"data": ["Paris"]}}),
        ] {
            assert!(location_labels(&payload).is_empty(), "{payload}");
        }
    }

    #[test]
    fn first_container_key_wins_even_when_unusable() {
        let payload = json!({"locations": null, "results": ["Rome"]});
        assert!(location_labels(&payload).is_empty());

        let payload = json!({"results": ["Rome"], "filmingLocations": ["Oslo"]});
        assert_eq!(location_labels(&payload), vec!["Oslo"]);
    }

    #[test]
    fn unwraps_one_nested_container() {
        let payload = json!({
            "data": {
                "results": [
                    {"location": "  Vancouver, British Columbia, Canada  "},
                    {"locationName": "Prague"},
                    {"text": "vancouver, british columbia, canada"}
                ]
            }
        });
        assert_eq!(
            location_labels(&payload),
            vec!["Vancouver, British Columbia, Canada", "Prague"]
        );
    }

    #[test]
    fn probes_label_fields_and_nested_wrappers() {
        let payload = json!({
            "locations": [
                {"location": {"text": "Wellington, New Zealand"}},
                {"place": {"label": "Matamata"}},
                {"location": "", "name": "Dubrovnik"},
                {"location": {"text": "ignored"}, "label": "Belfast"},
                {"value": "Reykjavik"},
                {"id": 7},
                17,
                null,
                "   ",
                ["nested list"]
            ]
        });
        assert_eq!(
            location_labels(&payload),
            vec![
                "Wellington, New Zealand",
                "Matamata",
                "Dubrovnik",
                "Belfast",
                "Reykjavik"
            ]
        );
    }
}
