//! Resolved entity model.
//!
//! The schema is loaded once when a store is opened. Mellon only consumes the
//! resolved form (entity name to field list); `from_json_*` accept the JSON
//! rendition of an external model resource.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entity::Record;
use crate::error::{MellonError, MellonResult, StoreError, ValidationError};
use crate::value::Value;

/// Kind of a modelled field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    String,
    Date,
    /// Attribute holding a list of scalar values.
    List,
    /// To-one relation to another entity.
    Ref { target: String },
    /// To-many relation to another entity.
    ToMany { target: String },
}

impl FieldKind {
    /// Returns a human-readable kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::List => "list",
            Self::Ref { .. } => "ref",
            Self::ToMany { .. } => "list of refs",
        }
    }

    /// Returns true for to-one and to-many relations.
    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self, Self::Ref { .. } | Self::ToMany { .. })
    }

    /// Returns true if `value` can be stored in a field of this kind.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_) | Value::Int(_))
            | (Self::String, Value::String(_))
            | (Self::Date, Value::Date(_))
            | (Self::List, Value::List(_))
            | (Self::Ref { .. }, Value::Ref(_)) => true,
            (Self::ToMany { .. }, Value::List(items)) => items.iter().all(Value::is_ref),
            _ => false,
        }
    }
}

/// One field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_optional")]
    pub optional: bool,
}

const fn default_optional() -> bool {
    true
}

/// One entity of the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    pub fields: Vec<FieldDescription>,
}

impl EntityDescription {
    /// Starts an entity description with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescription {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescription {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Result<&FieldDescription, ValidationError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ValidationError::UnknownField {
                entity: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Looks up a relation field by name.
    pub fn relation(&self, name: &str) -> Result<&FieldDescription, ValidationError> {
        let field = self.field(name)?;
        if field.kind.is_relation() {
            Ok(field)
        } else {
            Err(ValidationError::NotARelation {
                entity: self.name.clone(),
                field: name.to_string(),
            })
        }
    }

    /// Checks that `value` fits the declared kind of `field`.
    pub fn check_value(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        let desc = self.field(field)?;
        if desc.kind.accepts(value) {
            Ok(())
        } else {
            Err(ValidationError::TypeMismatch {
                entity: self.name.clone(),
                field: field.to_string(),
                expected: desc.kind.name(),
                actual: value.type_name(),
            })
        }
    }

    /// Checks that every required field of `record` holds a value.
    pub fn check_required(&self, record: &Record) -> Result<(), ValidationError> {
        match self
            .fields
            .iter()
            .find(|f| !f.optional && record.get(&f.name).is_null())
        {
            Some(missing) => Err(ValidationError::MissingField {
                entity: self.name.clone(),
                field: missing.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// The resolved model: entity name to description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescription>,
}

#[derive(Deserialize)]
struct SchemaDocument {
    entities: Vec<EntityDescription>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an entity description.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Parses a JSON model document: `{"entities": [{"name": .., "fields": [..]}]}`.
    pub fn from_json_str(json: &str) -> MellonResult<Self> {
        let doc: SchemaDocument = serde_json::from_str(json).map_err(|e| {
            MellonError::Store(StoreError::Open {
                name: "<model>".to_string(),
                reason: format!("invalid model document: {e}"),
            })
        })?;
        Ok(doc
            .entities
            .into_iter()
            .fold(Self::new(), Self::with_entity))
    }

    /// Reads and parses a JSON model file.
    pub fn from_json_file(path: impl AsRef<Path>) -> MellonResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            MellonError::Store(StoreError::Open {
                name: path.display().to_string(),
                reason: format!("unable to read model: {e}"),
            })
        })?;
        Self::from_json_str(&json)
    }

    /// Returns true if the schema defines no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> Result<&EntityDescription, ValidationError> {
        self.entities
            .get(name)
            .ok_or_else(|| ValidationError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    /// Iterates over entity descriptions in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.values()
    }
}
