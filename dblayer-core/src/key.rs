//! Item keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::primitive::Primitive;

/// Separates the key name from the value in [`ItemKey::native_name`]. Key names may
/// not contain it.
pub const KEY_NAME_SEPARATOR: char = ':';

/// Identifies one item within a table: the key attribute name and its value.
///
/// Backends always materialize the key attribute as a string (see
/// [`ItemKey::string_value`]), which keeps tables usable with any key kind.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub name: String,
    pub value: Primitive,
}

impl ItemKey {
    pub fn new(name: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The key value as stored by backends.
    pub fn string_value(&self) -> String {
        self.value.to_string()
    }

    /// `"{name}:{value}"`, the native key name used by hierarchical backends.
    pub fn native_name(&self) -> String {
        format!("{}{KEY_NAME_SEPARATOR}{}", self.name, self.value)
    }

    /// Splits a native key name produced by [`ItemKey::native_name`].
    ///
    /// Values may contain the separator; names may not.
    ///
    /// The value comes back as a string primitive since the original kind is not recorded.
    pub fn from_native_name(native: &str) -> Option<Self> {
        native
            .split_once(KEY_NAME_SEPARATOR)
            .map(|(name, value)| ItemKey::new(name, value))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_name_round_trips_through_string_value() {
        let key = ItemKey::new("id", 42i64);
        assert_eq!(key.native_name(), "id:42");

        let parsed = ItemKey::from_native_name(&key.native_name()).unwrap();
        assert_eq!(parsed.name, "id");
        assert_eq!(parsed.value, Primitive::from("42"));
    }

    #[test]
    fn only_the_first_colon_separates_name_and_value() {
        let parsed = ItemKey::from_native_name("id:a:b").unwrap();
        assert_eq!(parsed.value, Primitive::from("a:b"));
    }
}
