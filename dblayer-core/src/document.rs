//! The JSON document model shared by every backend.
//!
//! Items travel between the caller and the backends as ordered JSON objects
//! ([`Document`]). This module provides the conversions from typed values and the
//! merge/projection helpers that give every backend the same externally observable
//! behavior.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, from_value, to_value};

use crate::{
    error::{DatabaseError, DatabaseResult},
    key::ItemKey,
};

/// An item: an ordered map from attribute name to JSON value.
pub type Document = Map<String, Value>;

/// Converts a JSON value into a document, failing with `BadRequest` if it is not an object.
pub fn into_document(value: Value) -> DatabaseResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::BadRequest(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Serializes a typed value into a document.
pub fn to_document<T: Serialize>(value: &T) -> DatabaseResult<Document> {
    into_document(to_value(value)?)
}

/// Deserializes a document into a typed value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> DatabaseResult<T> {
    Ok(from_value(Value::Object(document))?)
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merges `patch` into `target`: every top-level attribute of the patch replaces the
/// attribute of the same name, arrays and nested objects included.
pub fn merge_attributes(target: &mut Document, patch: Document) {
    for (name, value) in patch {
        target.insert(name, value);
    }
}

/// Returns a copy of `document` whose first attribute is the key, stored as a string.
pub fn with_key(document: Document, key: &ItemKey) -> Document {
    let mut keyed = Document::new();
    keyed.insert(key.name.clone(), Value::String(key.string_value()));
    for (name, value) in document {
        if name != key.name {
            keyed.insert(name, value);
        }
    }
    keyed
}

/// Keeps the key attribute and the listed top-level attributes.
pub fn project_attributes(document: Document, key_name: &str, attributes: &[String]) -> Document {
    document
        .into_iter()
        .filter(|(name, _)| name == key_name || attributes.iter().any(|wanted| wanted == name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        total: i64,
    }

    #[test]
    fn typed_values_round_trip() {
        let order = Order { id: "o-1".into(), total: 10 };
        let document = to_document(&order).unwrap();
        assert_eq!(document.get("total"), Some(&json!(10)));
        assert_eq!(from_document::<Order>(document).unwrap(), order);
    }

    #[test]
    fn scalars_are_not_documents() {
        let err = into_document(json!([1, 2])).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn merge_replaces_arrays_and_objects_wholesale() {
        let mut target = into_document(json!({ "a": [1, 2], "o": { "x": 1 }, "keep": true })).unwrap();
        merge_attributes(&mut target, into_document(json!({ "a": [3], "o": { "y": 2 } })).unwrap());
        assert_eq!(
            Value::Object(target),
            json!({ "a": [3], "o": { "y": 2 }, "keep": true })
        );
    }

    #[test]
    fn key_is_injected_first_as_string() {
        let document = into_document(json!({ "name": "n", "id": 99 })).unwrap();
        let keyed = with_key(document, &ItemKey::new("id", 7i64));
        assert_eq!(keyed.keys().next().map(String::as_str), Some("id"));
        assert_eq!(keyed.get("id"), Some(&json!("7")));
        assert_eq!(keyed.len(), 2);
    }

    #[test]
    fn projection_keeps_key_and_requested_attributes() {
        let document = into_document(json!({ "id": "1", "a": 1, "b": 2 })).unwrap();
        let projected = project_attributes(document, "id", &["b".to_string()]);
        assert_eq!(Value::Object(projected), json!({ "id": "1", "b": 2 }));
    }
}
