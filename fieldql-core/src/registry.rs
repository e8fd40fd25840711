//! In-memory record registry
//!
//! Holds models (schema plus records) and answers the projector's schema
//! queries. Registries are built in code or loaded from a JSON fixture:
//!
//! ```json
//! {"models": {"res.partner": {
//!     "fields": [{"name": "name", "kind": "scalar"},
//!                {"name": "parent_id", "kind": "to_one", "relation": "res.partner"}],
//!     "records": [{"id": 1, "name": "Alice", "parent_id": false}]}}}
//! ```

use crate::record::{Record, RecordId, Value};
use crate::schema::{FieldDefinition, FieldKind, FieldValue, ModelSchema, Schema, ValidationError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const TIME_FORMAT: &str = "%H:%M:%S";

/// Handle to one record of one model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub model: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(model: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }
}

/// A model: schema plus its records ordered by id
#[derive(Debug, Clone)]
pub struct Model {
    schema: ModelSchema,
    records: BTreeMap<RecordId, Record>,
}

impl Model {
    pub fn new(schema: ModelSchema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Read-only object store implementing [`Schema`]
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, Model>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any model with the same name
    pub fn add_model(&mut self, schema: ModelSchema) {
        let name = schema.name().to_string();
        debug!(model = %name, fields = schema.field_names().count(), "Registered model");
        self.models.insert(name, Model::new(schema));
    }

    /// Insert a record after validating it against the model schema
    pub fn insert(&mut self, model: &str, record: Record) -> Result<RecordKey, RegistryError> {
        let entry = self
            .models
            .get_mut(model)
            .ok_or_else(|| RegistryError::ModelNotFound(model.to_string()))?;

        entry
            .schema
            .validate(&record)
            .map_err(|source| RegistryError::InvalidRecord {
                model: model.to_string(),
                id: record.id,
                source,
            })?;

        if entry.records.contains_key(&record.id) {
            return Err(RegistryError::DuplicateRecord {
                model: model.to_string(),
                id: record.id,
            });
        }

        let key = RecordKey::new(model, record.id);
        entry.records.insert(record.id, record);
        Ok(key)
    }

    /// Look up a model by name
    pub fn model(&self, name: &str) -> Result<&Model, RegistryError> {
        self.models
            .get(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))
    }

    /// Model names in sorted order
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Look up a record
    pub fn record(&self, model: &str, id: RecordId) -> Result<&Record, RegistryError> {
        self.model(model)?
            .records
            .get(&id)
            .ok_or_else(|| RegistryError::RecordNotFound {
                model: model.to_string(),
                id,
            })
    }

    /// Handle for an existing record
    pub fn key(&self, model: &str, id: impl Into<RecordId>) -> Result<RecordKey, RegistryError> {
        let id = id.into();
        self.record(model, id)?;
        Ok(RecordKey::new(model, id))
    }

    /// Handles for every record of a model, ordered by id
    pub fn records(&self, model: &str) -> Result<Vec<RecordKey>, RegistryError> {
        Ok(self
            .model(model)?
            .records
            .keys()
            .map(|id| RecordKey::new(model, *id))
            .collect())
    }

    /// Total number of records across models
    pub fn record_count(&self) -> usize {
        self.models.values().map(Model::record_count).sum()
    }

    /// Check referential integrity: relation targets exist and every stored
    /// reference points at an existing record
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (model_name, model) in &self.models {
            for (field, definition) in model.schema.fields() {
                if !definition.kind.is_relation() {
                    continue;
                }

                let target_name = definition.relation.as_deref().ok_or_else(|| {
                    RegistryError::MissingRelation {
                        model: model_name.clone(),
                        field: field.to_string(),
                    }
                })?;
                let target = self.models.get(target_name).ok_or_else(|| {
                    RegistryError::UnknownRelationTarget {
                        model: model_name.clone(),
                        field: field.to_string(),
                        target: target_name.to_string(),
                    }
                })?;

                for record in model.records.values() {
                    let ids: &[RecordId] = match record.get(field) {
                        Some(Value::Ref(id)) => std::slice::from_ref(id),
                        Some(Value::Refs(ids)) => ids,
                        _ => continue,
                    };
                    if let Some(missing) = ids.iter().find(|id| !target.records.contains_key(*id)) {
                        return Err(RegistryError::DanglingReference {
                            model: model_name.clone(),
                            field: field.to_string(),
                            id: record.id,
                            target: target_name.to_string(),
                            target_id: *missing,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Build a registry from fixture JSON text
    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let fixture: Fixture = serde_json::from_str(text)?;
        let mut registry = Registry::new();

        for (model_name, model) in &fixture.models {
            let mut schema = ModelSchema::new(model_name.as_str());
            for field in &model.fields {
                schema.add_field(field.name.as_str(), field.definition.clone());
            }
            registry.add_model(schema);
        }

        for (model_name, model) in fixture.models {
            for raw in model.records {
                let record = registry.record_from_json(&model_name, raw)?;
                registry.insert(&model_name, record)?;
            }
        }

        registry.validate()?;
        info!(
            models = registry.models.len(),
            records = registry.record_count(),
            "Loaded registry fixture"
        );
        Ok(registry)
    }

    /// Load a registry from a fixture file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn record_from_json(
        &self,
        model_name: &str,
        mut raw: serde_json::Map<String, JsonValue>,
    ) -> Result<Record, RegistryError> {
        let schema = &self.model(model_name)?.schema;
        let id = raw
            .remove("id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| RegistryError::MissingId(model_name.to_string()))?;

        let mut record = Record::new(id);
        if schema.get("id").is_some() {
            record.insert("id", id);
        }

        for (field, json) in raw {
            let definition = schema.get(&field).ok_or_else(|| RegistryError::InvalidRecord {
                model: model_name.to_string(),
                id: record.id,
                source: ValidationError::UnknownField(field.clone()),
            })?;
            let value = value_from_json(definition, &json).ok_or_else(|| {
                RegistryError::InvalidValue {
                    model: model_name.to_string(),
                    field: field.clone(),
                    kind: definition.kind,
                    value: json.to_string(),
                }
            })?;
            record.insert(field, value);
        }

        Ok(record)
    }
}

/// Convert fixture JSON to a stored value of the declared kind.
///
/// `false` stands for "unset" on non-scalar fields, the way ORM payloads
/// encode empty relations and dates.
fn value_from_json(definition: &FieldDefinition, json: &JsonValue) -> Option<Value> {
    if json.is_null() || (definition.kind != FieldKind::Scalar && json == &JsonValue::Bool(false)) {
        return Some(Value::Null);
    }

    match definition.kind {
        FieldKind::Scalar => match json {
            JsonValue::Bool(b) => Some(Value::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            JsonValue::String(s) => Some(Value::String(s.clone())),
            _ => None,
        },
        FieldKind::Date => NaiveDate::parse_from_str(json.as_str()?, DATE_FORMAT)
            .ok()
            .map(Value::Date),
        FieldKind::DateTime => {
            let text = json.as_str()?;
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(Value::DateTime)
        }
        FieldKind::Time => NaiveTime::parse_from_str(json.as_str()?, TIME_FORMAT)
            .ok()
            .map(Value::Time),
        FieldKind::Binary => json.as_str().map(|s| Value::Binary(s.as_bytes().to_vec())),
        FieldKind::ToOne => json.as_i64().map(|id| Value::Ref(RecordId::new(id))),
        FieldKind::ToMany => json
            .as_array()?
            .iter()
            .map(|id| id.as_i64().map(RecordId::new))
            .collect::<Option<Vec<_>>>()
            .map(Value::Refs),
    }
}

impl Schema for Registry {
    type Entity = RecordKey;

    fn model_name<'a>(&'a self, entity: &'a RecordKey) -> &'a str {
        &entity.model
    }

    fn field_names(&self, entity: &RecordKey) -> Vec<String> {
        self.models
            .get(&entity.model)
            .map(|model| model.schema.field_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn field_kind(&self, entity: &RecordKey, field: &str) -> Option<FieldKind> {
        self.models
            .get(&entity.model)?
            .schema
            .get(field)
            .map(|definition| definition.kind)
    }

    fn value(&self, entity: &RecordKey, field: &str) -> FieldValue<RecordKey> {
        let Some(model) = self.models.get(&entity.model) else {
            return FieldValue::Empty;
        };
        let Some(value) = model.records.get(&entity.id).and_then(|r| r.get(field)) else {
            return FieldValue::Empty;
        };
        let relation = model
            .schema
            .get(field)
            .and_then(|definition| definition.relation.as_deref());

        match (value, relation) {
            (Value::Null, _) => FieldValue::Empty,
            (Value::Ref(id), Some(target)) => FieldValue::One(RecordKey::new(target, *id)),
            (Value::Refs(ids), Some(target)) => FieldValue::Many(
                ids.iter().map(|id| RecordKey::new(target, *id)).collect(),
            ),
            (other, _) => FieldValue::Value(other.clone()),
        }
    }

    fn identify(&self, entity: &RecordKey) -> JsonValue {
        JsonValue::from(entity.id.get())
    }
}

#[derive(Debug, Deserialize)]
struct Fixture {
    models: BTreeMap<String, FixtureModel>,
}

#[derive(Debug, Deserialize)]
struct FixtureModel {
    fields: Vec<FixtureField>,
    #[serde(default)]
    records: Vec<serde_json::Map<String, JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct FixtureField {
    name: String,
    #[serde(flatten)]
    definition: FieldDefinition,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Record {model}({id}) not found")]
    RecordNotFound { model: String, id: RecordId },

    #[error("Record {model}({id}) already exists")]
    DuplicateRecord { model: String, id: RecordId },

    #[error("Record of {0} has no integer id")]
    MissingId(String),

    #[error("Invalid record {model}({id}): {source}")]
    InvalidRecord {
        model: String,
        id: RecordId,
        #[source]
        source: ValidationError,
    },

    #[error("Invalid value for {model}.{field} ({kind}): {value}")]
    InvalidValue {
        model: String,
        field: String,
        kind: FieldKind,
        value: String,
    },

    #[error("Relation field {model}.{field} has no target model")]
    MissingRelation { model: String, field: String },

    #[error("Relation field {model}.{field} targets unknown model {target}")]
    UnknownRelationTarget {
        model: String,
        field: String,
        target: String,
    },

    #[error("{model}({id}).{field} references missing {target}({target_id})")]
    DanglingReference {
        model: String,
        field: String,
        id: RecordId,
        target: String,
        target_id: RecordId,
    },

    #[error("Failed to read fixture {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture JSON: {0}")]
    Json(#[from] serde_json::Error),
}
