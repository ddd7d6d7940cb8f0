//! Decoded archive values.
//!
//! Containers never own other containers directly: a nested array or
//! dictionary is stored once in the [`ObjectTable`] and referenced by index.
//! Primitive children are copied inline.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DecodedValue {
    Null,
    Boolean(bool),
    Integer(i64),
    FloatingPoint(f64),
    Text(String),
    ByteSequence(Vec<u8>),
    OrderedSequence(Vec<DecodedValue>),
    Mapping(Mapping),
    /// Index into the owning [`ObjectTable`].
    BackReference(usize),
}

/// Key/value node. `class` carries the archived class name when the node was
/// reconstructed from a keyed archive; it is informational only.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Mapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub entries: BTreeMap<String, DecodedValue>,
}

impl Mapping {
    pub fn new(class: Option<String>) -> Self {
        Self { class, entries: BTreeMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&DecodedValue> {
        self.entries.get(key)
    }
}

impl DecodedValue {
    pub fn is_container(&self) -> bool {
        matches!(self, DecodedValue::OrderedSequence(_) | DecodedValue::Mapping(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render a scalar as a mapping key. Containers and references have no key form.
    pub(crate) fn key_text(&self) -> Option<String> {
        match self {
            DecodedValue::Text(s) => Some(s.clone()),
            DecodedValue::Integer(i) => Some(i.to_string()),
            DecodedValue::FloatingPoint(f) => Some(f.to_string()),
            DecodedValue::Boolean(b) => Some(b.to_string()),
            DecodedValue::Null => Some("$null".to_string()),
            _ => None,
        }
    }
}

/// Flat, index-addressable list of every object in one archive.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ObjectTable {
    objects: Vec<DecodedValue>,
}

impl ObjectTable {
    pub(crate) fn from_vec(objects: Vec<DecodedValue>) -> Self {
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DecodedValue> {
        self.objects.get(index)
    }

    /// Follow back-references until a concrete value is reached.
    /// Returns `None` for dangling or self-referential chains.
    pub fn resolve<'a>(&'a self, value: &'a DecodedValue) -> Option<&'a DecodedValue> {
        let mut current = value;
        for _ in 0..=self.objects.len() {
            match current {
                DecodedValue::BackReference(index) => current = self.objects.get(*index)?,
                other => return Some(other),
            }
        }
        None
    }
}

/// Result of decoding one archive: the object table plus the top object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedArchive {
    pub root: DecodedValue,
    pub objects: ObjectTable,
}

impl DecodedArchive {
    pub fn resolve<'a>(&'a self, value: &'a DecodedValue) -> Option<&'a DecodedValue> {
        self.objects.resolve(value)
    }
}
