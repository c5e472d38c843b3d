//! Dynamic entity records produced by hydration.

use std::collections::BTreeMap;

use bigdecimal::ToPrimitive;
use pagekit::Value;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};

use crate::error::{PagingError, PagingResult};

/// A materialized entity.
///
/// Root fields are keyed by name, to-one fields by `association.field`, and
/// each to-many association holds its own child records. Element collection
/// children carry their value under [`crate::shape::ELEMENT_FIELD`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    identity: Value,
    values: BTreeMap<String, Value>,
    collections: BTreeMap<String, Vec<Record>>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the entity, `Null` for records built by hand.
    #[must_use]
    pub fn identity(&self) -> &Value {
        &self.identity
    }

    pub(crate) fn with_identity(identity: Value) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Value at `key`, `Null` when absent.
    #[must_use]
    pub fn value(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Children of a to-many association; empty when it has none.
    #[must_use]
    pub fn collection(&self, name: &str) -> &[Record] {
        self.collections.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn collection_mut(&mut self, name: &str) -> &mut Vec<Record> {
        self.collections.entry(name.to_owned()).or_default()
    }

    #[must_use]
    pub fn collections(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.collections
    }

    /// Nested JSON view: to-one fields become objects (or `null` when the
    /// association is absent), collections become arrays.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut root = Map::new();
        let mut nested: BTreeMap<&str, Map<String, Json>> = BTreeMap::new();
        for (key, value) in &self.values {
            match key.split_once('.') {
                Some((assoc, field)) => {
                    nested
                        .entry(assoc)
                        .or_default()
                        .insert(field.to_owned(), value_to_json(value));
                }
                None => {
                    root.insert(key.clone(), value_to_json(value));
                }
            }
        }
        for (assoc, fields) in nested {
            let obj = if fields.values().all(Json::is_null) {
                Json::Null
            } else {
                Json::Object(fields)
            };
            root.insert(assoc.to_owned(), obj);
        }
        for (name, children) in &self.collections {
            let items = children.iter().map(Record::child_json).collect();
            root.insert(name.clone(), Json::Array(items));
        }
        Json::Object(root)
    }

    fn child_json(&self) -> Json {
        match (self.values.len(), self.values.get(crate::shape::ELEMENT_FIELD)) {
            (1, Some(v)) if self.collections.is_empty() => value_to_json(v),
            _ => self.to_json(),
        }
    }

    /// Deserialize into a serde type shaped like [`Record::to_json`].
    ///
    /// # Errors
    /// Returns `PagingError::Decode` when the record does not fit `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> PagingResult<T> {
        serde_json::from_value(self.to_json()).map_err(|e| PagingError::Decode(e.to_string()))
    }
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => match n.to_i64() {
            Some(i) if n.is_integer() => Json::from(i),
            _ => n
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| Json::String(n.to_string()), Json::Number),
        },
        other => Json::String(other.to_string()),
    }
}
