//! Field values of managed objects.

use crate::entity::EntityRef;
use std::collections::BTreeMap;

static NULL: Value = Value::Null;

/// The value of one attribute.
///
/// References hold the target instance itself, so object graphs (including
/// cycles) are expressed directly. Equality of references is identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    /// A native value (string, number, bool, date string, JSON).
    Basic(serde_json::Value),
    Ref(EntityRef),
    Embedded(Embedded),
    List(Vec<Value>),
    /// Insertion-ordered set; [`Value::set`] drops duplicates.
    Set(Vec<Value>),
    /// Insertion-ordered map entries.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds a set value, dropping duplicate elements.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Value::Set(unique)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_basic(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Basic(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_basic().and_then(serde_json::Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_basic().and_then(serde_json::Value::as_i64)
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Ref(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&Embedded> {
        match self {
            Value::Embedded(e) => Some(e),
            _ => None,
        }
    }

    /// Elements of a list or set.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Value stored under `key` in a map.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts or replaces a map entry; turns `Null` into an empty map first.
    /// Returns `false` if the value is neither a map nor null.
    pub fn insert(&mut self, key: Value, value: Value) -> bool {
        if self.is_null() {
            *self = Value::Map(Vec::new());
        }
        let Value::Map(entries) = self else {
            return false;
        };
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
        true
    }

    /// Appends to a list or (if absent) to a set; turns `Null` into a list.
    /// Returns `false` if the value is not a collection.
    pub fn push(&mut self, item: Value) -> bool {
        if self.is_null() {
            *self = Value::List(Vec::new());
        }
        match self {
            Value::List(items) => items.push(item),
            Value::Set(items) => {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            _ => return false,
        }
        true
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        if v.is_null() {
            Value::Null
        } else {
            Value::Basic(v)
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Basic(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Basic(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Basic(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Basic(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Basic(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Basic(v.into())
    }
}

impl From<EntityRef> for Value {
    fn from(v: EntityRef) -> Self {
        Value::Ref(v)
    }
}

impl From<&EntityRef> for Value {
    fn from(v: &EntityRef) -> Self {
        Value::Ref(v.clone())
    }
}

impl From<Embedded> for Value {
    fn from(v: Embedded) -> Self {
        Value::Embedded(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// An embedded object: fields without identity of their own.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedded {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Embedded {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }
}
