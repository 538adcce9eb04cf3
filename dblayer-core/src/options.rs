//! Post-processing applied to every document returned to the caller.
//!
//! With `auto_sort_arrays` set, object keys are sorted lexicographically and array
//! elements are ordered by a type-tagged key:
//!
//! `null < bool < integer < float < string < date < array < object`
//!
//! Arrays and objects order by their length, never by their contents. Strings that parse
//! as RFC 3339 timestamps count as dates. Sorting is stable, so re-applying the options
//! to a processed document leaves it unchanged.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use crate::document::Document;

/// Options controlling the shape of returned documents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Sort object keys and array elements recursively.
    pub auto_sort_arrays: bool,
    /// Fold floats with no fractional part (`3.0`) into integers (`3`).
    pub auto_convert_round_floats_to_integers: bool,
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_sort_arrays(mut self, enabled: bool) -> Self {
        self.auto_sort_arrays = enabled;
        self
    }

    pub fn with_auto_convert_round_floats_to_integers(mut self, enabled: bool) -> Self {
        self.auto_convert_round_floats_to_integers = enabled;
        self
    }

    fn is_noop(&self) -> bool {
        !self.auto_sort_arrays && !self.auto_convert_round_floats_to_integers
    }

    /// Applies the enabled post-processing steps to a document.
    pub fn apply(&self, document: Document) -> Document {
        if self.is_noop() {
            return document;
        }
        self.process_map(document)
    }

    /// Applies the enabled post-processing steps to any JSON value.
    pub fn apply_value(&self, value: Value) -> Value {
        if self.is_noop() {
            return value;
        }
        self.process_value(value)
    }

    fn process_map(&self, map: Map<String, Value>) -> Map<String, Value> {
        let mut entries = map
            .into_iter()
            .map(|(name, value)| (name, self.process_value(value)))
            .collect::<Vec<_>>();
        if self.auto_sort_arrays {
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
        }
        entries.into_iter().collect()
    }

    fn process_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.process_map(map)),
            Value::Array(items) => {
                let mut items = items
                    .into_iter()
                    .map(|item| self.process_value(item))
                    .collect::<Vec<_>>();
                if self.auto_sort_arrays {
                    items.sort_by(|left, right| SortKey::of(left).cmp(&SortKey::of(right)));
                }
                Value::Array(items)
            }
            Value::Number(number) if self.auto_convert_round_floats_to_integers => {
                Value::Number(fold_round_float(number))
            }
            other => other,
        }
    }
}

fn fold_round_float(number: Number) -> Number {
    if number.is_f64() {
        if let Some(float) = number.as_f64() {
            if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 {
                return Number::from(float as i64);
            }
        }
    }
    number
}

/// The sortable projection of a JSON value.
#[derive(Debug, PartialEq)]
enum SortKey<'a> {
    Null,
    Bool(bool),
    Integer(i128),
    Float(f64),
    String(&'a str),
    Date(DateTime<FixedOffset>),
    Array(usize),
    Object(usize),
}

impl<'a> SortKey<'a> {
    fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => SortKey::Null,
            Value::Bool(b) => SortKey::Bool(*b),
            Value::Number(number) => {
                if let Some(i) = number.as_i64() {
                    SortKey::Integer(i as i128)
                } else if let Some(u) = number.as_u64() {
                    SortKey::Integer(u as i128)
                } else {
                    SortKey::Float(number.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(date) => SortKey::Date(date),
                Err(_) => SortKey::String(s),
            },
            Value::Array(items) => SortKey::Array(items.len()),
            Value::Object(map) => SortKey::Object(map.len()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Bool(_) => 1,
            SortKey::Integer(_) => 2,
            SortKey::Float(_) => 3,
            SortKey::String(_) => 4,
            SortKey::Date(_) => 5,
            SortKey::Array(_) => 6,
            SortKey::Object(_) => 7,
        }
    }
}

impl Eq for SortKey<'_> {}

impl PartialOrd for SortKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Integer(a), SortKey::Integer(b)) => a.cmp(b),
            (SortKey::Float(a), SortKey::Float(b)) => a.total_cmp(b),
            (SortKey::String(a), SortKey::String(b)) => a.cmp(b),
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Array(a), SortKey::Array(b)) | (SortKey::Object(a), SortKey::Object(b)) => {
                a.cmp(b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn document() -> Document {
        json!({
            "zeta": [3.0, "b", null, true, 2, { "k": 1 }, [1, 2], "2024-01-01T00:00:00Z", 1.5, "a", [0], false],
            "alpha": { "y": 2.0, "x": [2, 1] },
            "mid": 7.25,
            "whole": 10.0,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[rstest]
    #[case::nothing(DatabaseOptions::new())]
    #[case::sort(DatabaseOptions::new().with_auto_sort_arrays(true))]
    #[case::fold(DatabaseOptions::new().with_auto_convert_round_floats_to_integers(true))]
    #[case::both(
        DatabaseOptions::new()
            .with_auto_sort_arrays(true)
            .with_auto_convert_round_floats_to_integers(true)
    )]
    fn post_processing_is_idempotent(#[case] options: DatabaseOptions) {
        let once = options.apply(document());
        let twice = options.apply(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn sorts_by_type_tag_then_value() {
        let options = DatabaseOptions::new().with_auto_sort_arrays(true);
        let processed = options.apply(document());

        assert_eq!(
            processed["zeta"],
            json!([null, false, true, 2, 1.5, 3.0, "a", "b", "2024-01-01T00:00:00Z", [0], [1, 2], { "k": 1 }])
        );
        assert_eq!(
            processed.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["alpha", "mid", "whole", "zeta"]
        );
        assert_eq!(processed["alpha"]["x"], json!([1, 2]));
    }

    #[test]
    fn folds_round_floats_while_sorting() {
        let options = DatabaseOptions::new()
            .with_auto_sort_arrays(true)
            .with_auto_convert_round_floats_to_integers(true);
        let processed = options.apply(document());

        assert_eq!(processed["whole"], json!(10));
        assert!(processed["whole"].is_i64());
        assert_eq!(processed["mid"], json!(7.25));
        assert_eq!(processed["alpha"]["y"], json!(2));
        // 3.0 becomes the integer 3 and sorts among the integers.
        assert_eq!(processed["zeta"][3], json!(2));
        assert_eq!(processed["zeta"][4], json!(3));
        assert_eq!(processed["zeta"][5], json!(1.5));
    }

    #[test]
    fn folding_alone_keeps_order() {
        let options = DatabaseOptions::new().with_auto_convert_round_floats_to_integers(true);
        let processed = options.apply(document());

        assert_eq!(processed.keys().next().map(String::as_str), Some("zeta"));
        assert_eq!(processed["zeta"][0], json!(3));
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: DatabaseOptions =
            serde_json::from_value(json!({ "auto_sort_arrays": true })).unwrap();
        assert!(options.auto_sort_arrays);
        assert!(!options.auto_convert_round_floats_to_integers);
    }
}
