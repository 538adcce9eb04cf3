//! The closed set of scalar values exchanged by every backend.
//!
//! [`Primitive`] is used for item keys, condition operands and array elements. Its
//! [`Display`](std::fmt::Display) form is the canonical textual encoding used to build
//! backend keys, and its serde implementation is the prefixed wire encoding:
//!
//! | Kind | Wire form |
//! |---|---|
//! | String | `"s-<text>"` |
//! | Integer | JSON integer |
//! | Double | `"d-<decimal>"` |
//! | Boolean | JSON boolean |
//! | ByteArray | `"b-<base64>"` |

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use serde_json::{Number, Value};
use std::{
    fmt,
    hash::{Hash, Hasher},
};
use thiserror::Error;

/// Tolerance used when comparing doubles.
pub const DOUBLE_EPSILON: f64 = 1e-7;

const STRING_PREFIX: &str = "s-";
const DOUBLE_PREFIX: &str = "d-";
const BYTES_PREFIX: &str = "b-";

/// Discriminant of a [`Primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Integer,
    Double,
    Boolean,
    ByteArray,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveKind::String => "String",
            PrimitiveKind::Integer => "Integer",
            PrimitiveKind::Double => "Double",
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::ByteArray => "ByteArray",
        };
        f.write_str(name)
    }
}

/// Raised by the `as_*` accessors when the requested kind does not match.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("Invalid operation: primitive is {actual}, not {expected}")]
    InvalidOperation {
        expected: PrimitiveKind,
        actual: PrimitiveKind,
    },
}

/// An immutable scalar value.
///
/// Byte arrays are owned by the value; accessors only ever hand out shared borrows, so the
/// stored bytes cannot be altered after construction.
#[derive(Debug, Clone)]
pub enum Primitive {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    ByteArray(Vec<u8>),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::String(_) => PrimitiveKind::String,
            Primitive::Integer(_) => PrimitiveKind::Integer,
            Primitive::Double(_) => PrimitiveKind::Double,
            Primitive::Boolean(_) => PrimitiveKind::Boolean,
            Primitive::ByteArray(_) => PrimitiveKind::ByteArray,
        }
    }

    fn mismatch(&self, expected: PrimitiveKind) -> PrimitiveError {
        PrimitiveError::InvalidOperation {
            expected,
            actual: self.kind(),
        }
    }

    pub fn as_string(&self) -> Result<&str, PrimitiveError> {
        self.try_as_string()
            .ok_or_else(|| self.mismatch(PrimitiveKind::String))
    }

    pub fn as_integer(&self) -> Result<i64, PrimitiveError> {
        self.try_as_integer()
            .ok_or_else(|| self.mismatch(PrimitiveKind::Integer))
    }

    pub fn as_double(&self) -> Result<f64, PrimitiveError> {
        self.try_as_double()
            .ok_or_else(|| self.mismatch(PrimitiveKind::Double))
    }

    pub fn as_boolean(&self) -> Result<bool, PrimitiveError> {
        self.try_as_boolean()
            .ok_or_else(|| self.mismatch(PrimitiveKind::Boolean))
    }

    pub fn as_byte_array(&self) -> Result<&[u8], PrimitiveError> {
        self.try_as_byte_array()
            .ok_or_else(|| self.mismatch(PrimitiveKind::ByteArray))
    }

    pub fn try_as_string(&self) -> Option<&str> {
        match self {
            Primitive::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn try_as_integer(&self) -> Option<i64> {
        match self {
            Primitive::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn try_as_double(&self) -> Option<f64> {
        match self {
            Primitive::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn try_as_boolean(&self) -> Option<bool> {
        match self {
            Primitive::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn try_as_byte_array(&self) -> Option<&[u8]> {
        match self {
            Primitive::ByteArray(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric view used for cross-kind comparison of integers and doubles.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Primitive::Integer(value) => Some(*value as f64),
            Primitive::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts this value into its JSON document representation.
    ///
    /// Byte arrays become base64 strings; non-finite doubles become `null`.
    pub fn to_json_value(&self) -> Value {
        match self {
            Primitive::String(value) => Value::String(value.clone()),
            Primitive::Integer(value) => Value::Number(Number::from(*value)),
            Primitive::Double(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Primitive::Boolean(value) => Value::Bool(*value),
            Primitive::ByteArray(value) => Value::String(STANDARD.encode(value)),
        }
    }

    /// Reads a scalar JSON value back into a primitive.
    ///
    /// Returns `None` for `null`, arrays and objects.
    pub fn from_json_value(value: &Value) -> Option<Primitive> {
        match value {
            Value::String(text) => Some(Primitive::String(text.clone())),
            Value::Bool(flag) => Some(Primitive::Boolean(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Some(Primitive::Integer(integer)),
                None => number.as_f64().map(Primitive::Double),
            },
            _ => None,
        }
    }

    /// Value equality between this primitive and a JSON document value.
    ///
    /// Numbers compare across integer/float representations; byte arrays compare
    /// against their base64 string form.
    pub fn matches_json(&self, value: &Value) -> bool {
        match (self, value) {
            (Primitive::String(left), Value::String(right)) => left == right,
            (Primitive::Boolean(left), Value::Bool(right)) => left == right,
            (Primitive::ByteArray(left), Value::String(right)) => STANDARD.encode(left) == *right,
            (Primitive::Integer(left), Value::Number(right)) => match right.as_i64() {
                Some(right) => *left == right,
                None => right
                    .as_f64()
                    .is_some_and(|right| doubles_equal(*left as f64, right)),
            },
            (Primitive::Double(left), Value::Number(right)) => right
                .as_f64()
                .is_some_and(|right| doubles_equal(*left, right)),
            _ => false,
        }
    }
}

pub(crate) fn doubles_equal(left: f64, right: f64) -> bool {
    left == right || (left - right).abs() < DOUBLE_EPSILON
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Primitive::String(a), Primitive::String(b)) => a == b,
            (Primitive::Integer(a), Primitive::Integer(b)) => a == b,
            (Primitive::Double(a), Primitive::Double(b)) => doubles_equal(*a, *b),
            (Primitive::Boolean(a), Primitive::Boolean(b)) => a == b,
            (Primitive::ByteArray(a), Primitive::ByteArray(b)) => a == b,
            _ => false,
        }
    }
}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Primitive::String(value) => value.hash(state),
            Primitive::Integer(value) => value.hash(state),
            // Equality is tolerance based, so only the kind is hashed.
            Primitive::Double(_) => {}
            Primitive::Boolean(value) => value.hash(state),
            Primitive::ByteArray(value) => value.hash(state),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::String(value) => f.write_str(value),
            Primitive::Integer(value) => write!(f, "{value}"),
            Primitive::Double(value) => write!(f, "{value}"),
            Primitive::Boolean(value) => write!(f, "{value}"),
            Primitive::ByteArray(value) => f.write_str(&STANDARD.encode(value)),
        }
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::String(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::String(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Integer(value)
    }
}

impl From<i32> for Primitive {
    fn from(value: i32) -> Self {
        Primitive::Integer(value as i64)
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Double(value)
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Boolean(value)
    }
}

impl From<Vec<u8>> for Primitive {
    fn from(value: Vec<u8>) -> Self {
        Primitive::ByteArray(value)
    }
}

impl From<&[u8]> for Primitive {
    fn from(value: &[u8]) -> Self {
        Primitive::ByteArray(value.to_vec())
    }
}

impl Serialize for Primitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Primitive::String(value) => serializer.serialize_str(&format!("{STRING_PREFIX}{value}")),
            Primitive::Integer(value) => serializer.serialize_i64(*value),
            Primitive::Double(value) => serializer.serialize_str(&format!("{DOUBLE_PREFIX}{value}")),
            Primitive::Boolean(value) => serializer.serialize_bool(*value),
            Primitive::ByteArray(value) => {
                serializer.serialize_str(&format!("{BYTES_PREFIX}{}", STANDARD.encode(value)))
            }
        }
    }
}

struct PrimitiveVisitor;

impl<'de> Visitor<'de> for PrimitiveVisitor {
    type Value = Primitive;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, a boolean or a string prefixed with s-, d- or b-")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Primitive, E> {
        Ok(Primitive::Boolean(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Primitive, E> {
        Ok(Primitive::Integer(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Primitive, E> {
        i64::try_from(value)
            .map(Primitive::Integer)
            .map_err(|_| E::custom(format!("integer {value} does not fit in 64 signed bits")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Primitive, E> {
        if let Some(text) = value.strip_prefix(STRING_PREFIX) {
            Ok(Primitive::String(text.to_string()))
        } else if let Some(text) = value.strip_prefix(DOUBLE_PREFIX) {
            text.parse::<f64>()
                .map(Primitive::Double)
                .map_err(|e| E::custom(format!("invalid double {text:?}: {e}")))
        } else if let Some(text) = value.strip_prefix(BYTES_PREFIX) {
            STANDARD
                .decode(text)
                .map(Primitive::ByteArray)
                .map_err(|e| E::custom(format!("invalid base64 payload: {e}")))
        } else {
            Err(E::custom(format!("unrecognized primitive encoding {value:?}")))
        }
    }
}

impl<'de> Deserialize<'de> for Primitive {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PrimitiveVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn hash_of(primitive: &Primitive) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        primitive.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equal_doubles_hash_alike() {
        let below = Primitive::from(1.49999e-7);
        let above = Primitive::from(1.50001e-7);
        assert_eq!(below, above);
        assert_eq!(hash_of(&below), hash_of(&above));
        assert_eq!(hash_of(&Primitive::from(0.1 + 0.2)), hash_of(&Primitive::from(0.3)));
        assert_ne!(hash_of(&Primitive::from(1.0)), hash_of(&Primitive::from(1i64)));
    }

    #[rstest]
    #[case::string(Primitive::from("hello"), json!("s-hello"))]
    #[case::string_with_prefix_like_text(Primitive::from("d-1"), json!("s-d-1"))]
    #[case::integer(Primitive::from(-42i64), json!(-42))]
    #[case::double(Primitive::from(1.5), json!("d-1.5"))]
    #[case::boolean(Primitive::from(true), json!(true))]
    #[case::bytes_with_zeros(Primitive::from(vec![0u8, 1, 0, 255]), json!("b-AAEA/w=="))]
    fn wire_encoding_round_trips(#[case] primitive: Primitive, #[case] wire: Value) {
        let encoded = serde_json::to_value(&primitive).unwrap();
        assert_eq!(encoded, wire);

        let decoded: Primitive = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, primitive);
        assert_eq!(decoded.kind(), primitive.kind());
    }

    #[test]
    fn rejects_unprefixed_strings() {
        assert!(serde_json::from_value::<Primitive>(json!("plain")).is_err());
        assert!(serde_json::from_value::<Primitive>(json!("b-***")).is_err());
    }

    #[test]
    fn accessors_fail_on_kind_mismatch() {
        let value = Primitive::from(7i64);
        assert_eq!(value.as_integer(), Ok(7));
        assert_eq!(
            value.as_string(),
            Err(PrimitiveError::InvalidOperation {
                expected: PrimitiveKind::String,
                actual: PrimitiveKind::Integer,
            })
        );
        assert_eq!(value.try_as_boolean(), None);
        assert!(value.as_byte_array().is_err());
    }

    #[test]
    fn doubles_compare_with_tolerance() {
        assert_eq!(Primitive::from(0.1 + 0.2), Primitive::from(0.3));
        assert_ne!(Primitive::from(0.3), Primitive::from(0.31));
        assert_ne!(Primitive::from(1i64), Primitive::from(1.0));
    }

    #[rstest]
    #[case::string(Primitive::from("abc"), "abc")]
    #[case::integer(Primitive::from(12i64), "12")]
    #[case::whole_double(Primitive::from(3.0), "3")]
    #[case::double(Primitive::from(2.25), "2.25")]
    #[case::boolean(Primitive::from(false), "false")]
    #[case::bytes(Primitive::from(&b"hi"[..]), "aGk=")]
    fn canonical_text(#[case] primitive: Primitive, #[case] text: &str) {
        assert_eq!(primitive.to_string(), text);
    }

    #[test]
    fn json_matching_crosses_numeric_kinds() {
        assert!(Primitive::from(2i64).matches_json(&json!(2.0)));
        assert!(Primitive::from(2.0).matches_json(&json!(2)));
        assert!(Primitive::from(vec![1u8]).matches_json(&json!("AQ==")));
        assert!(!Primitive::from("2").matches_json(&json!(2)));
    }
}
