//! Recursive projector: entity + query tree -> ordered JSON mapping

use super::ast::{QueryNode, Selected};
use crate::record::Value;
use crate::schema::{FieldKind, FieldValue, Schema};
use serde_json::Value as JsonValue;

/// Ordered output mapping
pub type JsonMap = serde_json::Map<String, JsonValue>;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d-%H-%M";
const TIME_FORMAT: &str = "%H-%M-%S";

/// What to project: a single entity or a collection
#[derive(Debug, Clone, Copy)]
pub enum Target<'e, E> {
    One(&'e E),
    Many(&'e [E]),
}

/// Projection output, shaped like the [`Target`]
#[derive(Debug, Clone, PartialEq)]
pub enum Projected {
    One(JsonMap),
    Many(Vec<JsonMap>),
}

impl Projected {
    pub fn into_json(self) -> JsonValue {
        match self {
            Projected::One(map) => JsonValue::Object(map),
            Projected::Many(maps) => JsonValue::Array(maps.into_iter().map(JsonValue::Object).collect()),
        }
    }
}

/// Projects entities through a query tree using a [`Schema`]
pub struct Projector<'s, S: Schema> {
    schema: &'s S,
}

impl<'s, S: Schema> Projector<'s, S> {
    pub fn new(schema: &'s S) -> Self {
        Self { schema }
    }

    /// Project a single entity or a collection
    pub fn project(
        &self,
        target: Target<'_, S::Entity>,
        query: &QueryNode,
    ) -> Result<Projected, ProjectionError> {
        match target {
            Target::One(entity) => self.project_one(entity, query).map(Projected::One),
            Target::Many(entities) => self.project_many(entities, query).map(Projected::Many),
        }
    }

    /// Project each entity independently, keeping input order
    pub fn project_many(
        &self,
        entities: &[S::Entity],
        query: &QueryNode,
    ) -> Result<Vec<JsonMap>, ProjectionError> {
        entities
            .iter()
            .map(|entity| self.project_one(entity, query))
            .collect()
    }

    /// Project one entity
    pub fn project_one(
        &self,
        entity: &S::Entity,
        query: &QueryNode,
    ) -> Result<JsonMap, ProjectionError> {
        let schema_fields = self.schema.field_names(entity);
        let selected = query.resolve(&schema_fields);

        // every selected name must exist before anything is rendered
        let mut kinds = Vec::with_capacity(selected.len());
        for field in &selected {
            let kind = self
                .schema
                .field_kind(entity, field.name())
                .ok_or_else(|| ProjectionError::FieldNotFound {
                    model: self.schema.model_name(entity).to_string(),
                    field: field.name().to_string(),
                })?;

            if matches!(field, Selected::Nested { .. }) && !kind.is_relation() {
                return Err(ProjectionError::NotNestable {
                    model: self.schema.model_name(entity).to_string(),
                    field: field.name().to_string(),
                    kind,
                });
            }
            kinds.push(kind);
        }

        let mut output = JsonMap::with_capacity(selected.len());
        for (field, kind) in selected.iter().zip(kinds) {
            let value = match field {
                Selected::Nested { name, query } => self.project_nested(entity, name, kind, query)?,
                Selected::Flat(name) => self.project_flat(entity, name, kind)?,
            };
            output.insert(field.name().to_string(), value);
        }

        Ok(output)
    }

    fn project_flat(
        &self,
        entity: &S::Entity,
        field: &str,
        kind: FieldKind,
    ) -> Result<JsonValue, ProjectionError> {
        match (kind, self.schema.value(entity, field)) {
            (FieldKind::ToMany, FieldValue::Empty) => Ok(JsonValue::Array(Vec::new())),
            (_, FieldValue::Empty) => Ok(JsonValue::Null),
            (FieldKind::ToOne, FieldValue::One(related)) => Ok(self.schema.identify(&related)),
            (FieldKind::ToMany, FieldValue::Many(related)) => Ok(JsonValue::Array(
                related
                    .iter()
                    .map(|entity| self.schema.identify(entity))
                    .collect(),
            )),
            (kind, FieldValue::Value(value)) if !kind.is_relation() => format_value(kind, &value)
                .ok_or_else(|| self.mismatch(entity, field, kind, value.type_name())),
            (kind, other) => Err(self.mismatch(entity, field, kind, describe(&other))),
        }
    }

    fn project_nested(
        &self,
        entity: &S::Entity,
        field: &str,
        kind: FieldKind,
        query: &QueryNode,
    ) -> Result<JsonValue, ProjectionError> {
        match (kind, self.schema.value(entity, field)) {
            (FieldKind::ToMany, FieldValue::Empty) => Ok(JsonValue::Array(Vec::new())),
            (_, FieldValue::Empty) => Ok(JsonValue::Null),
            (FieldKind::ToOne, FieldValue::One(related)) => {
                self.project_one(&related, query).map(JsonValue::Object)
            }
            (FieldKind::ToMany, FieldValue::Many(related)) => related
                .iter()
                .map(|entity| self.project_one(entity, query).map(JsonValue::Object))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            (kind, other) => Err(self.mismatch(entity, field, kind, describe(&other))),
        }
    }

    fn mismatch(
        &self,
        entity: &S::Entity,
        field: &str,
        kind: FieldKind,
        found: &'static str,
    ) -> ProjectionError {
        ProjectionError::ValueKindMismatch {
            model: self.schema.model_name(entity).to_string(),
            field: field.to_string(),
            kind,
            found,
        }
    }
}

/// Render a stored value for a non-relational field kind
fn format_value(kind: FieldKind, value: &Value) -> Option<JsonValue> {
    let json = match (kind, value) {
        (_, Value::Null) => JsonValue::Null,
        (FieldKind::Scalar, Value::Bool(b)) => JsonValue::Bool(*b),
        (FieldKind::Scalar, Value::Int(i)) => JsonValue::from(*i),
        (FieldKind::Scalar, Value::Float(f)) => JsonValue::from(*f),
        (FieldKind::Scalar, Value::String(s)) => JsonValue::String(s.clone()),
        (FieldKind::Date, Value::Date(d)) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
        (FieldKind::DateTime, Value::DateTime(dt)) => {
            JsonValue::String(dt.format(DATETIME_FORMAT).to_string())
        }
        (FieldKind::Time, Value::Time(t)) => JsonValue::String(t.format(TIME_FORMAT).to_string()),
        (FieldKind::Binary, Value::Binary(bytes)) => decode_binary(bytes),
        (FieldKind::Binary, Value::String(text)) => decode_binary(text.as_bytes()),
        _ => return None,
    };
    Some(json)
}

/// Binary payloads are returned as text; empty payloads as null
fn decode_binary(bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        JsonValue::Null
    } else {
        JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn describe<E>(value: &FieldValue<E>) -> &'static str {
    match value {
        FieldValue::Empty => "null",
        FieldValue::Value(value) => value.type_name(),
        FieldValue::One(_) => "related record",
        FieldValue::Many(_) => "related records",
    }
}

/// Projection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Selected field missing from the entity's schema
    #[error("Field '{field}' not found on model {model}")]
    FieldNotFound { model: String, field: String },

    /// Sub-query attached to a field that is not a relation
    #[error("Field '{field}' of model {model} is {kind} and cannot take a sub-query")]
    NotNestable {
        model: String,
        field: String,
        kind: FieldKind,
    },

    /// Stored value contradicts the declared kind
    #[error("Field '{field}' of model {model} is declared {kind} but holds {found}")]
    ValueKindMismatch {
        model: String,
        field: String,
        kind: FieldKind,
        found: &'static str,
    },
}

impl ProjectionError {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            ProjectionError::FieldNotFound { field, .. }
            | ProjectionError::NotNestable { field, .. }
            | ProjectionError::ValueKindMismatch { field, .. } => field,
        }
    }

    /// Whether this is a lookup failure
    pub fn is_lookup(&self) -> bool {
        matches!(self, ProjectionError::FieldNotFound { .. })
    }

    /// Whether a sub-query was attached to a non-relational field
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, ProjectionError::NotNestable { .. })
    }

    /// Whether a stored value contradicted its declared kind
    pub fn is_value_kind_mismatch(&self) -> bool {
        matches!(self, ProjectionError::ValueKindMismatch { .. })
    }
}
