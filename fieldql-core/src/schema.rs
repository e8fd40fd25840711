//! Schema definitions and the schema collaborator contract
//!
//! - `FieldKind` / `FieldDefinition` / `ModelSchema` describe models
//! - `Schema` is what the projector queries: field enumeration, field kinds, value access

use crate::record::{Record, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Text, number or boolean
    Scalar,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Time of day
    Time,
    /// Binary payload
    Binary,
    /// Relation to a single record
    ToOne,
    /// Relation to an ordered collection of records
    ToMany,
}

impl FieldKind {
    /// Whether a nested query may be attached to this field
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldKind::ToOne | FieldKind::ToMany)
    }

    /// Name used in messages and fixtures
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Scalar => "scalar",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Time => "time",
            FieldKind::Binary => "binary",
            FieldKind::ToOne => "to_one",
            FieldKind::ToMany => "to_many",
        }
    }

    /// Check if a stored value fits this kind
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Scalar, v) => v.is_scalar(),
            (FieldKind::Date, Value::Date(_)) => true,
            (FieldKind::DateTime, Value::DateTime(_)) => true,
            (FieldKind::Time, Value::Time(_)) => true,
            (FieldKind::Binary, Value::Binary(_)) | (FieldKind::Binary, Value::String(_)) => true,
            (FieldKind::ToOne, Value::Ref(_)) => true,
            (FieldKind::ToMany, Value::Refs(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field definition: kind plus relation target and constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field kind
    pub kind: FieldKind,
    /// Target model for relation fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Whether the field must be set on every record
    #[serde(default)]
    pub required: bool,
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldDefinition {
    /// Create a new field definition
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            relation: None,
            required: false,
            label: None,
        }
    }

    /// Scalar field
    pub fn scalar() -> Self {
        Self::new(FieldKind::Scalar)
    }

    /// To-one relation towards `model`
    pub fn to_one(model: impl Into<String>) -> Self {
        Self {
            relation: Some(model.into()),
            ..Self::new(FieldKind::ToOne)
        }
    }

    /// To-many relation towards `model`
    pub fn to_many(model: impl Into<String>) -> Self {
        Self {
            relation: Some(model.into()),
            ..Self::new(FieldKind::ToMany)
        }
    }

    /// Set as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Validate a value against this field definition
    pub fn validate(&self, field_name: &str, value: &Value) -> Result<(), ValidationError> {
        if self.required && value.is_null() {
            return Err(ValidationError::RequiredFieldMissing(field_name.to_string()));
        }

        if !self.kind.is_compatible(value) {
            return Err(ValidationError::TypeMismatch {
                field: field_name.to_string(),
                expected: self.kind,
                actual: value.type_name(),
            });
        }

        Ok(())
    }
}

/// Schema of one model: ordered field definitions
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    name: String,
    fields: Vec<(String, FieldDefinition)>,
}

impl ModelSchema {
    /// Create an empty schema for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field declaration
    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.add_field(name, definition);
        self
    }

    /// Declare a field, replacing any earlier definition with the same name
    pub fn add_field(&mut self, name: impl Into<String>, definition: FieldDefinition) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = definition,
            None => self.fields.push((name, definition)),
        }
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a field definition
    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, definition)| definition)
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Field definitions in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields.iter().map(|(name, def)| (name.as_str(), def))
    }

    /// Validate a record against this schema
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        for name in record.fields.keys() {
            if self.get(name).is_none() {
                return Err(ValidationError::UnknownField(name.clone()));
            }
        }

        for (name, definition) in &self.fields {
            let value = record.get(name).unwrap_or(&Value::Null);
            definition.validate(name, value)?;
        }

        Ok(())
    }
}

/// Value handed out by a [`Schema`] for one field of one entity
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<E> {
    /// Field is unset
    Empty,
    /// Non-relational stored value
    Value(Value),
    /// Related entity of a to-one relation
    One(E),
    /// Related entities of a to-many relation, in relation order
    Many(Vec<E>),
}

/// Schema collaborator queried by the projector.
///
/// Implementations expose, for a given entity handle, its ordered field
/// names, the declared kind of each field and the field values. Related
/// entities come back as further handles so the projector can recurse.
/// Implementations must be safe for concurrent read-only use when the host
/// projects in parallel.
pub trait Schema {
    /// Entity handle
    type Entity;

    /// Name of the entity's model, used in error messages
    fn model_name<'a>(&'a self, entity: &'a Self::Entity) -> &'a str;

    /// Ordered field names of the entity's schema
    fn field_names(&self, entity: &Self::Entity) -> Vec<String>;

    /// Declared kind of `field`, `None` when the schema has no such field
    fn field_kind(&self, entity: &Self::Entity, field: &str) -> Option<FieldKind>;

    /// Value of `field` on the entity
    fn value(&self, entity: &Self::Entity, field: &str) -> FieldValue<Self::Entity>;

    /// Identifier of the entity, used for unexpanded relations
    fn identify(&self, entity: &Self::Entity) -> serde_json::Value;
}

/// Schema validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field missing: {0}")]
    RequiredFieldMissing(String),

    #[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        actual: &'static str,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),
}
