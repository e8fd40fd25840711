//! Serializer facade: query text in, JSON out
//!
//! Combines parsing and projection, applies the default query, times each
//! projection and maps failures to HTTP-style status codes and JSON-RPC
//! error bodies.

use crate::monitoring::SlowProjectionLogger;
use crate::query::{
    ProjectionError, Projector, QueryFormatError, QueryParser, Target, DEFAULT_MAX_DEPTH,
    DEFAULT_QUERY,
};
use crate::registry::RegistryError;
use crate::schema::Schema;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::debug;

/// Parses a query and projects a target through it
pub struct Serializer<'s, S: Schema> {
    schema: &'s S,
    default_query: String,
    max_depth: usize,
    slow_log: Option<Arc<SlowProjectionLogger>>,
}

impl<'s, S: Schema> Serializer<'s, S> {
    pub fn new(schema: &'s S) -> Self {
        Self {
            schema,
            default_query: DEFAULT_QUERY.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            slow_log: None,
        }
    }

    /// Query used when `serialize` gets none
    pub fn with_default_query(mut self, query: impl Into<String>) -> Self {
        self.default_query = query.into();
        self
    }

    /// Reject queries nested deeper than `max_depth` brace levels
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Report slow projections to `logger`
    pub fn with_slow_log(mut self, logger: Arc<SlowProjectionLogger>) -> Self {
        self.slow_log = Some(logger);
        self
    }

    /// Serialize `target` with `query`, or the default query when none is given
    pub fn serialize(
        &self,
        target: Target<'_, S::Entity>,
        query: Option<&str>,
    ) -> Result<JsonValue, ServiceError> {
        let text = match query {
            Some(query) if !query.trim().is_empty() => query,
            _ => self.default_query.as_str(),
        };
        let node = QueryParser::parse_with_max_depth(text, self.max_depth)?;

        let (model, records) = match target {
            Target::One(entity) => (Some(self.schema.model_name(entity)), 1),
            Target::Many(entities) => (
                entities.first().map(|entity| self.schema.model_name(entity)),
                entities.len(),
            ),
        };
        let tracker = self
            .slow_log
            .as_ref()
            .map(|logger| logger.start(text, model, records));

        let result = Projector::new(self.schema).project(target, &node);

        if let (Some(logger), Some(tracker)) = (&self.slow_log, tracker) {
            logger.finish(tracker);
        }

        let projected = result?;
        debug!(query = %text, model = ?model, records, "Projected");
        Ok(projected.into_json())
    }
}

/// Errors surfaced to callers of the serializer
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Format(#[from] QueryFormatError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ServiceError {
    /// HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Format(_) => 400,
            ServiceError::Projection(ProjectionError::FieldNotFound { .. }) => 404,
            ServiceError::Projection(ProjectionError::NotNestable { .. }) => 400,
            ServiceError::Projection(ProjectionError::ValueKindMismatch { .. }) => 500,
            ServiceError::Registry(
                RegistryError::ModelNotFound(_) | RegistryError::RecordNotFound { .. },
            ) => 404,
            ServiceError::Registry(_) => 500,
        }
    }

    /// Exception name reported in error bodies
    pub fn exception_type(&self) -> &'static str {
        match self {
            ServiceError::Format(_) => "QueryFormatError",
            ServiceError::Projection(ProjectionError::FieldNotFound { .. }) => "LookupError",
            ServiceError::Projection(ProjectionError::NotNestable { .. }) => "TypeMismatchError",
            ServiceError::Projection(ProjectionError::ValueKindMismatch { .. }) => {
                "ValueKindMismatchError"
            }
            ServiceError::Registry(RegistryError::ModelNotFound(_)) => "ModelException",
            ServiceError::Registry(RegistryError::RecordNotFound { .. }) => "ObjectException",
            ServiceError::Registry(_) => "RegistryError",
        }
    }

    /// Structured details of the error
    pub fn arguments(&self) -> Vec<JsonValue> {
        match self {
            ServiceError::Format(err) => vec![
                json!(err.kind.as_str()),
                json!(err.fragment),
                json!(err.offset),
                json!(err.expected),
            ],
            ServiceError::Projection(
                ProjectionError::FieldNotFound { model, field }
                | ProjectionError::NotNestable { model, field, .. }
                | ProjectionError::ValueKindMismatch { model, field, .. },
            ) => vec![json!(model), json!(field)],
            ServiceError::Registry(RegistryError::ModelNotFound(model)) => vec![json!(model)],
            ServiceError::Registry(RegistryError::RecordNotFound { model, id }) => {
                vec![json!(model), json!(id.get())]
            }
            ServiceError::Registry(err) => vec![json!(err.to_string())],
        }
    }

    /// JSON-RPC error body
    pub fn to_envelope(&self) -> JsonValue {
        self.envelope(None)
    }

    /// JSON-RPC error body with a caller supplied message
    pub fn to_envelope_with_message(&self, message: &str) -> JsonValue {
        self.envelope(Some(message))
    }

    fn envelope(&self, message: Option<&str>) -> JsonValue {
        let name = self.to_string();
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {
                "message": message.unwrap_or(&name),
                "data": {
                    "name": name,
                    "debug": "",
                    "message": message,
                    "arguments": self.arguments(),
                    "exception_type": self.exception_type(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FormatErrorKind;
    use crate::record::Record;
    use crate::registry::{RecordKey, Registry};
    use crate::schema::{FieldDefinition, FieldKind, ModelSchema};
    use std::time::Duration;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_model(
            ModelSchema::new("res.partner")
                .field("id", FieldDefinition::scalar())
                .field("name", FieldDefinition::scalar())
                .field("email", FieldDefinition::scalar()),
        );
        registry
            .insert(
                "res.partner",
                Record::new(1)
                    .with("id", 1i64)
                    .with("name", "Alice")
                    .with("email", "a@x.com"),
            )
            .unwrap();
        registry
            .insert(
                "res.partner",
                Record::new(2).with("id", 2i64).with("name", "Bob"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_default_query_applies() {
        let registry = registry();
        let alice = RecordKey::new("res.partner", 1);
        let serializer = Serializer::new(&registry);

        let out = serializer.serialize(Target::One(&alice), None).unwrap();
        assert_eq!(out, json!({"id": 1, "name": "Alice", "email": "a@x.com"}));

        let out = serializer.serialize(Target::One(&alice), Some(" ")).unwrap();
        assert_eq!(out.as_object().unwrap().len(), 3);

        let serializer = Serializer::new(&registry).with_default_query("{name}");
        let out = serializer.serialize(Target::One(&alice), None).unwrap();
        assert_eq!(out, json!({"name": "Alice"}));
    }

    #[test]
    fn test_many_mode() {
        let registry = registry();
        let keys = registry.records("res.partner").unwrap();
        let out = Serializer::new(&registry)
            .serialize(Target::Many(&keys), Some("{*,-email}"))
            .unwrap();
        assert_eq!(out, json!([{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}]));
    }

    #[test]
    fn test_slow_log_receives_projection() {
        let registry = registry();
        let alice = RecordKey::new("res.partner", 1);
        let logger = Arc::new(SlowProjectionLogger::new(Duration::ZERO, true));
        let serializer = Serializer::new(&registry).with_slow_log(logger.clone());

        serializer.serialize(Target::One(&alice), Some("{id}")).unwrap();
        let recent = logger.recent(1);
        assert_eq!(recent[0].query, "{id}");
        assert_eq!(recent[0].model.as_deref(), Some("res.partner"));
    }

    #[test]
    fn test_format_error_envelope() {
        let registry = registry();
        let alice = RecordKey::new("res.partner", 1);
        let err = Serializer::new(&registry)
            .serialize(Target::One(&alice), Some("{id,name"))
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        let envelope = err.to_envelope();
        assert_eq!(envelope["jsonrpc"], "2.0");
        assert_eq!(envelope["id"], JsonValue::Null);
        assert_eq!(envelope["error"]["data"]["exception_type"], "QueryFormatError");
        assert_eq!(envelope["error"]["data"]["message"], JsonValue::Null);
        assert_eq!(envelope["error"]["data"]["arguments"][2], 8);
        assert_eq!(envelope["error"]["message"], envelope["error"]["data"]["name"]);
    }

    #[test]
    fn test_projection_error_mapping() {
        let registry = registry();
        let alice = RecordKey::new("res.partner", 1);
        let serializer = Serializer::new(&registry);

        let err = serializer
            .serialize(Target::One(&alice), Some("{nonexistent_field}"))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.exception_type(), "LookupError");
        assert_eq!(
            err.arguments(),
            vec![json!("res.partner"), json!("nonexistent_field")]
        );

        let err = serializer
            .serialize(Target::One(&alice), Some("{name{id}}"))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.exception_type(), "TypeMismatchError");
    }

    #[test]
    fn test_value_kind_mismatch_mapping() {
        let err = ServiceError::from(ProjectionError::ValueKindMismatch {
            model: "res.users".to_string(),
            field: "login_date".to_string(),
            kind: FieldKind::Date,
            found: "string",
        });
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.exception_type(), "ValueKindMismatchError");
        assert_eq!(err.arguments(), vec![json!("res.users"), json!("login_date")]);
    }

    #[test]
    fn test_deep_query_rejected() {
        let registry = registry();
        let alice = RecordKey::new("res.partner", 1);
        let deep = format!("{}{}", "{a".repeat(10_000), "}".repeat(10_000));

        let err = Serializer::new(&registry)
            .serialize(Target::One(&alice), Some(&deep))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(
            err,
            ServiceError::Format(QueryFormatError { kind: FormatErrorKind::TooDeep, .. })
        ));

        let err = Serializer::new(&registry)
            .with_max_depth(1)
            .serialize(Target::One(&alice), Some("{id,parent_id{id}}"))
            .unwrap_err();
        assert_eq!(err.exception_type(), "QueryFormatError");
        assert_eq!(err.arguments()[2], json!(13));
    }

    #[test]
    fn test_registry_error_mapping() {
        let registry = registry();
        let err: ServiceError = registry.key("res.partner", 9).unwrap_err().into();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.exception_type(), "ObjectException");
        assert_eq!(err.arguments(), vec![json!("res.partner"), json!(9)]);

        let envelope = err.to_envelope_with_message("The object '9' of 'res.partner' does not exist.");
        assert_eq!(
            envelope["error"]["message"],
            "The object '9' of 'res.partner' does not exist."
        );
        assert_eq!(envelope["error"]["data"]["name"], "Record res.partner(9) not found");

        let err: ServiceError = registry.model("res.users").unwrap_err().into();
        assert_eq!(err.exception_type(), "ModelException");
    }
}
