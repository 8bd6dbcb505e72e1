//! Row payload shared by contexts and storage engines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::EntityRef;

static NULL: Value = Value::Null;

/// One materialized row: identity, entity name, insertion order and fields.
///
/// `seq` is allocated from the store's identity space at insert time and
/// provides the default (unsorted) ordering of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_ref: EntityRef,
    pub entity: String,
    pub seq: u64,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new(entity_ref: EntityRef, entity: impl Into<String>, seq: u64) -> Self {
        Self {
            entity_ref,
            entity: entity.into(),
            seq,
            fields: BTreeMap::new(),
        }
    }

    /// Returns a field value; absent fields read as `Value::Null`.
    #[must_use]
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Sets a field. Setting `Null` removes the field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if value.is_null() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Applies a property-level patch on top of this record.
    pub fn apply(&mut self, patch: &BTreeMap<String, Value>) {
        for (field, value) in patch {
            self.set(field.clone(), value.clone());
        }
    }

    /// Returns the subset of fields named in `fields`, nulls included.
    #[must_use]
    pub fn project(&self, fields: &[String]) -> BTreeMap<String, Value> {
        fields
            .iter()
            .map(|f| (f.clone(), self.get(f).clone()))
            .collect()
    }
}
