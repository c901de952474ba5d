use super::remote::RawRecord;
use crate::core::{DecodeError, Entity, ID_FIELD, Value};
use crate::query::Predicate;
use chrono::{DateTime, Utc};

/// Turns raw records of one entity type into entities.
///
/// Every attribute the decoder writes is server-owned and overwrites the
/// stored value on reconciliation; optional attributes should be emitted as
/// `Null` when absent from the payload so the server can clear them.
pub trait RecordDecoder: Send + Sync + 'static {
    fn entity_type(&self) -> &str;

    fn decode(&self, raw: &RawRecord) -> Result<Entity, DecodeError>;

    /// Predicate resolving the local copy of `raw`. Defaults to the record id.
    fn uniqueness(&self, raw: &RawRecord) -> Predicate {
        match raw.get(ID_FIELD).and_then(id_string) {
            Some(id) => Predicate::id(id),
            None => Predicate::Not(Box::new(Predicate::True)),
        }
    }
}

/// Canvas-style ids arrive as strings or numbers.
pub fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 string.
    Timestamp,
    /// Whatever scalar the payload holds.
    Any,
}

#[derive(Debug, Clone)]
struct FieldSpec {
    json_key: String,
    field: String,
    kind: FieldKind,
    required: bool,
}

/// Declarative decoder for JSON object records.
///
/// ```
/// # use livesync::sync::{FieldKind, JsonDecoder, RecordDecoder};
/// let decoder = JsonDecoder::new("module")
///     .required("name", FieldKind::Text)
///     .optional("position", FieldKind::Integer)
///     .constant("context_id", "course_1");
/// let module = decoder
///     .decode(&serde_json::json!({"id": 12, "name": "Week 1", "position": 1}))
///     .unwrap();
/// assert_eq!(module.id(), "12");
/// assert_eq!(module.context_id(), Some("course_1"));
/// ```
#[derive(Debug, Clone)]
pub struct JsonDecoder {
    entity_type: String,
    id_key: String,
    fields: Vec<FieldSpec>,
    constants: Vec<(String, Value)>,
    unique_keys: Vec<String>,
}

impl JsonDecoder {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id_key: ID_FIELD.to_string(),
            fields: Vec::new(),
            constants: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    /// Payload key holding the record id (default `"id"`).
    pub fn id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = key.into();
        self
    }

    pub fn required(self, key: &str, kind: FieldKind) -> Self {
        self.push(key, key, kind, true)
    }

    pub fn optional(self, key: &str, kind: FieldKind) -> Self {
        self.push(key, key, kind, false)
    }

    /// Reads payload key `json_key` into entity attribute `field`.
    pub fn renamed(self, json_key: &str, field: &str, kind: FieldKind, required: bool) -> Self {
        self.push(json_key, field, kind, required)
    }

    /// Stamps a fixed attribute on every decoded entity, typically the
    /// scope the listing was fetched for.
    pub fn constant(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.push((field.into(), value.into()));
        self
    }

    /// Resolve local copies by these payload keys instead of the id.
    pub fn unique_by<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.unique_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    fn push(mut self, json_key: &str, field: &str, kind: FieldKind, required: bool) -> Self {
        self.fields.push(FieldSpec {
            json_key: json_key.to_string(),
            field: field.to_string(),
            kind,
            required,
        });
        self
    }

    fn convert(&self, spec: &FieldSpec, id: &str, json: &serde_json::Value) -> Result<Value, DecodeError> {
        let invalid = |reason: &str| DecodeError::invalid(&self.entity_type, Some(id), &spec.field, reason);
        if json.is_null() {
            return Ok(Value::Null);
        }
        match spec.kind {
            FieldKind::Any => Ok(Value::from_json(json)),
            FieldKind::Text => json
                .as_str()
                .map(Value::from)
                .ok_or_else(|| invalid("expected a string")),
            FieldKind::Integer => json
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| invalid("expected an integer")),
            FieldKind::Float => json
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| invalid("expected a number")),
            FieldKind::Boolean => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| invalid("expected a boolean")),
            FieldKind::Timestamp => {
                let text = json.as_str().ok_or_else(|| invalid("expected a timestamp string"))?;
                DateTime::parse_from_rfc3339(text)
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| invalid(&e.to_string()))
            }
        }
    }
}

impl RecordDecoder for JsonDecoder {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn decode(&self, raw: &RawRecord) -> Result<Entity, DecodeError> {
        let object = raw.as_object().ok_or_else(|| DecodeError::NotAnObject {
            entity_type: self.entity_type.clone(),
        })?;
        let id = object
            .get(&self.id_key)
            .and_then(id_string)
            .ok_or_else(|| DecodeError::missing(&self.entity_type, None, &self.id_key))?;

        let mut entity = Entity::new(self.entity_type.clone(), id.clone());
        for spec in &self.fields {
            let value = match object.get(&spec.json_key) {
                Some(json) => self.convert(spec, &id, json)?,
                None => Value::Null,
            };
            if spec.required && value.is_null() {
                return Err(DecodeError::missing(&self.entity_type, Some(&id), &spec.json_key));
            }
            entity.set(spec.field.clone(), value);
        }
        for (field, value) in &self.constants {
            entity.set(field.clone(), value.clone());
        }
        Ok(entity)
    }

    fn uniqueness(&self, raw: &RawRecord) -> Predicate {
        let by_id = || match raw.get(&self.id_key).and_then(id_string) {
            Some(id) => Predicate::id(id),
            None => Predicate::Not(Box::new(Predicate::True)),
        };
        if self.unique_keys.is_empty() {
            return by_id();
        }

        let mut predicate = Predicate::True;
        for key in &self.unique_keys {
            let value = raw.get(key).map(Value::from_json).unwrap_or(Value::Null);
            // A null key identifies nothing; only the id can.
            if value.is_null() {
                return by_id();
            }
            let field = self
                .fields
                .iter()
                .find(|spec| &spec.json_key == key)
                .map_or(key.as_str(), |spec| spec.field.as_str());
            predicate = predicate.and(Predicate::eq(field, value));
        }
        predicate
    }
}
