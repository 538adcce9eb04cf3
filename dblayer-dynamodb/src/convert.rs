//! Conversions between JSON documents and DynamoDB items.

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;
use std::collections::HashMap;

use dblayer_core::{
    document::{Document, with_key},
    error::{DatabaseError, DatabaseResult},
    key::ItemKey,
    page::PageToken,
    primitive::Primitive,
};

/// A native item.
pub type Item = HashMap<String, AttributeValue>;

fn conversion_error(error: serde_dynamo::Error) -> DatabaseError {
    DatabaseError::InternalServerError(format!("item conversion failed: {error}"))
}

pub fn document_to_item(document: &Document) -> DatabaseResult<Item> {
    serde_dynamo::to_item(document).map_err(conversion_error)
}

pub fn item_to_document(item: Item) -> DatabaseResult<Document> {
    serde_dynamo::from_item(item).map_err(conversion_error)
}

pub fn value_to_attribute_value(value: &Value) -> DatabaseResult<AttributeValue> {
    serde_dynamo::to_attribute_value(value).map_err(conversion_error)
}

/// Converts a primitive the way it is stored inside documents.
pub fn primitive_to_attribute_value(value: &Primitive) -> DatabaseResult<AttributeValue> {
    if let Primitive::Double(double) = value
        && !double.is_finite()
    {
        return Err(DatabaseError::BadRequest(format!(
            "{double} cannot be stored as a number"
        )));
    }
    value_to_attribute_value(&value.to_json_value())
}

/// The primary key of an item. Keys are always stored as strings.
pub fn key_to_item(key: &ItemKey) -> Item {
    HashMap::from([(key.name.clone(), AttributeValue::S(key.string_value()))])
}

/// Materializes a scanned item, putting its key attribute first.
pub fn scanned_item_to_document(item: Item, key_attribute: &str) -> DatabaseResult<Document> {
    let document = item_to_document(item)?;
    let key = document
        .get(key_attribute)
        .and_then(Value::as_str)
        .map(|value| ItemKey::new(key_attribute, value))
        .ok_or_else(|| {
            DatabaseError::InternalServerError(format!(
                "scanned item has no string key attribute {key_attribute}"
            ))
        })?;
    Ok(with_key(document, &key))
}

/// Wraps a `LastEvaluatedKey` into an opaque page token.
pub fn encode_cursor(last_evaluated_key: Item) -> DatabaseResult<PageToken> {
    let key = item_to_document(last_evaluated_key)?;
    Ok(PageToken::from_cursor(&serde_json::to_vec(&key)?))
}

/// Recovers the `ExclusiveStartKey` from a page token.
pub fn decode_cursor(token: &PageToken) -> DatabaseResult<Item> {
    let key = serde_json::from_slice::<Document>(&token.to_cursor()?)
        .map_err(|error| DatabaseError::BadRequest(format!("malformed page token: {error}")))?;
    document_to_item(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn documents_map_onto_native_types() {
        let document = json!({
            "id": "a",
            "n": 3,
            "ratio": 0.5,
            "flag": false,
            "none": null,
            "tags": ["x", 2],
            "nested": { "k": "v" },
        })
        .as_object()
        .cloned()
        .unwrap();

        let item = document_to_item(&document).unwrap();
        assert_eq!(item["id"], AttributeValue::S("a".into()));
        assert_eq!(item["n"], AttributeValue::N("3".into()));
        assert_eq!(item["flag"], AttributeValue::Bool(false));
        assert_eq!(item["none"], AttributeValue::Null(true));
        assert!(matches!(item["tags"], AttributeValue::L(_)));
        assert!(matches!(item["nested"], AttributeValue::M(_)));

        let restored = item_to_document(item).unwrap();
        assert_eq!(restored["ratio"], json!(0.5));
        assert_eq!(restored["nested"], json!({ "k": "v" }));
    }

    #[test]
    fn byte_arrays_are_stored_as_base64() {
        let value = primitive_to_attribute_value(&Primitive::from(vec![0u8, 1])).unwrap();
        assert_eq!(value, AttributeValue::S("AAE=".into()));
        assert!(primitive_to_attribute_value(&Primitive::from(f64::INFINITY)).is_err());
    }

    #[test]
    fn keys_are_strings() {
        let item = key_to_item(&ItemKey::new("id", 7i64));
        assert_eq!(item["id"], AttributeValue::S("7".into()));
    }

    #[test]
    fn cursors_survive_the_token_round_trip() {
        let key = key_to_item(&ItemKey::new("id", "last"));
        let token = encode_cursor(key.clone()).unwrap();
        assert_eq!(decode_cursor(&token).unwrap(), key);

        let err = decode_cursor(&PageToken::from("not a cursor")).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn scanned_items_need_their_key() {
        let item = key_to_item(&ItemKey::new("id", "a"));
        let document = scanned_item_to_document(item, "id").unwrap();
        assert_eq!(document["id"], json!("a"));
        assert!(scanned_item_to_document(Item::new(), "id").is_err());
    }
}
