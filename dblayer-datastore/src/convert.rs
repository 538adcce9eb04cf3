//! Conversions between JSON documents and entities, and error mapping.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

use dblayer_core::{
    document::{Document, with_key},
    error::{DatabaseError, DatabaseResult},
    key::ItemKey,
    retry::AttemptError,
};

use crate::{
    client::DatastoreError,
    entity::{Entity, EntityKey, EntityValue},
};

/// Converts a JSON value to an entity value.
///
/// Integers beyond the signed 64-bit range have no exact entity representation and are
/// rejected rather than widened to doubles.
pub fn value_to_entity_value(value: &Value) -> DatabaseResult<EntityValue> {
    Ok(match value {
        Value::Null => EntityValue::Null,
        Value::Bool(b) => EntityValue::Boolean(*b),
        Value::Number(number) => match (number.as_i64(), number.as_u64()) {
            (Some(i), _) => EntityValue::Integer(i),
            (None, Some(u)) => {
                return Err(DatabaseError::BadRequest(format!(
                    "integer {u} does not fit in a signed 64-bit integer"
                )));
            }
            (None, None) => EntityValue::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(s) => EntityValue::String(s.clone()),
        Value::Array(items) => EntityValue::Array(
            items
                .iter()
                .map(value_to_entity_value)
                .collect::<DatabaseResult<_>>()?,
        ),
        Value::Object(map) => EntityValue::Entity(Entity::embedded(properties_of(map.iter())?)),
    })
}

fn properties_of<'a>(
    attributes: impl Iterator<Item = (&'a String, &'a Value)>,
) -> DatabaseResult<BTreeMap<String, EntityValue>> {
    attributes
        .map(|(name, value)| Ok((name.clone(), value_to_entity_value(value)?)))
        .collect()
}

pub fn entity_value_to_value(value: &EntityValue) -> DatabaseResult<Value> {
    Ok(match value {
        EntityValue::Null => Value::Null,
        EntityValue::Boolean(b) => Value::Bool(*b),
        EntityValue::Integer(i) => Value::from(*i),
        EntityValue::Double(d) => Number::from_f64(*d).map(Value::Number).ok_or_else(|| {
            DatabaseError::InternalServerError(format!("cannot represent {d} as a JSON number"))
        })?,
        EntityValue::String(s) => Value::String(s.clone()),
        EntityValue::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
        EntityValue::Array(items) => Value::Array(
            items
                .iter()
                .map(entity_value_to_value)
                .collect::<DatabaseResult<_>>()?,
        ),
        EntityValue::Entity(entity) => Value::Object(properties_to_document(&entity.properties)?),
    })
}

fn properties_to_document(properties: &BTreeMap<String, EntityValue>) -> DatabaseResult<Document> {
    properties
        .iter()
        .map(|(name, value)| Ok((name.clone(), entity_value_to_value(value)?)))
        .collect()
}

/// Builds the stored entity for an item. The key lives in the entity key only.
pub fn document_to_entity(
    entity_key: EntityKey,
    key: &ItemKey,
    document: &Document,
) -> DatabaseResult<Entity> {
    Ok(Entity {
        key: Some(entity_key),
        properties: properties_of(document.iter().filter(|(name, _)| **name != key.name))?,
    })
}

/// Materializes an entity as a document with the key attribute injected first.
pub fn entity_to_document(entity: &Entity, key: &ItemKey) -> DatabaseResult<Document> {
    Ok(with_key(properties_to_document(&entity.properties)?, key))
}

/// Recovers the item key from a stored entity's native name.
pub fn item_key_of(entity: &Entity) -> DatabaseResult<ItemKey> {
    entity
        .key
        .as_ref()
        .and_then(|key| ItemKey::from_native_name(&key.name))
        .ok_or_else(|| {
            DatabaseError::InternalServerError(format!(
                "entity {:?} has no item key name",
                entity.key
            ))
        })
}

/// Maps a client error to the database error taxonomy.
pub fn map_datastore_error(error: DatastoreError) -> DatabaseError {
    match error {
        DatastoreError::Aborted(message) => DatabaseError::TooManyRequests(message),
        DatastoreError::Unavailable(message) => DatabaseError::ServiceUnavailable(message),
        DatastoreError::AlreadyExists(message) => DatabaseError::Conflict(message),
        DatastoreError::NotFound(message) => DatabaseError::NotFound(message),
        DatastoreError::InvalidArgument(message) => DatabaseError::BadRequest(message),
        DatastoreError::Internal(message) => DatabaseError::InternalServerError(message),
    }
}

/// Splits client errors into retryable contention and terminal failures.
pub fn classify(error: DatastoreError) -> AttemptError {
    if error.is_contention() {
        AttemptError::Contention(error.to_string())
    } else {
        AttemptError::Failed(map_datastore_error(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn documents_round_trip_through_entities() {
        let key = ItemKey::new("id", 3i64);
        let document = json!({
            "id": "3",
            "n": 4,
            "ratio": 0.25,
            "flag": true,
            "none": null,
            "tags": ["a", 1],
            "nested": { "deep": { "x": [1.5] } },
        })
        .as_object()
        .cloned()
        .unwrap();

        let entity = document_to_entity(EntityKey::new("t", key.native_name()), &key, &document).unwrap();
        assert!(!entity.properties.contains_key("id"));
        assert_eq!(entity.properties["n"], EntityValue::Integer(4));

        let restored = entity_to_document(&entity, &key).unwrap();
        assert_eq!(restored.keys().next().map(String::as_str), Some("id"));
        assert_eq!(restored["nested"], json!({ "deep": { "x": [1.5] } }));
        assert_eq!(restored["tags"], json!(["a", 1]));
        assert_eq!(restored["none"], Value::Null);
        assert_eq!(item_key_of(&entity).unwrap(), ItemKey::new("id", "3"));
    }

    #[test]
    fn integers_beyond_i64_are_rejected() {
        let err = value_to_entity_value(&json!({ "big": 18446744073709551615u64 })).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
        assert_eq!(
            value_to_entity_value(&json!(9223372036854775807i64)).unwrap(),
            EntityValue::Integer(i64::MAX)
        );
        assert_eq!(value_to_entity_value(&json!(2.5)).unwrap(), EntityValue::Double(2.5));
    }

    #[test]
    fn blobs_become_base64_and_nan_is_rejected() {
        assert_eq!(
            entity_value_to_value(&EntityValue::Blob(vec![0, 1])).unwrap(),
            json!("AAE=")
        );
        assert!(entity_value_to_value(&EntityValue::Double(f64::NAN)).is_err());
    }

    #[test]
    fn contention_is_retryable() {
        assert!(matches!(classify(DatastoreError::Aborted("x".into())), AttemptError::Contention(_)));
        assert!(matches!(classify(DatastoreError::Unavailable("x".into())), AttemptError::Contention(_)));
        assert_eq!(
            classify(DatastoreError::AlreadyExists("x".into())),
            AttemptError::Failed(DatabaseError::Conflict("x".into()))
        );
    }
}
