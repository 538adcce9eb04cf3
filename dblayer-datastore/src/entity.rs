//! The native entity model of the hierarchical store.

use std::{collections::BTreeMap, fmt};

/// Identifies an entity: its kind and its string name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub kind: String,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Array(Vec<EntityValue>),
    /// An embedded entity, which carries no key.
    Entity(Entity),
}

/// A keyed (or embedded) set of named properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pub key: Option<EntityKey>,
    pub properties: BTreeMap<String, EntityValue>,
}

impl Entity {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key: Some(key),
            properties: BTreeMap::new(),
        }
    }

    pub fn embedded(properties: BTreeMap<String, EntityValue>) -> Self {
        Self {
            key: None,
            properties,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: EntityValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// The same entity without its properties, as returned by keys-only queries.
    pub fn key_only(&self) -> Self {
        Self {
            key: self.key.clone(),
            properties: BTreeMap::new(),
        }
    }
}
