use super::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Attribute name under which the stable id is exposed to predicates and sorts.
pub const ID_FIELD: &str = "id";

/// Conventional attribute holding the course/group/user scope of an entity.
pub const CONTEXT_ID_FIELD: &str = "context_id";

const PENDING_PREFIX: &str = "pending-";

/// A domain record held by the store.
///
/// `id` is unique per `entity_type`. Every other attribute lives in
/// `fields`; attributes written by a decoder are server-owned, anything else
/// was set locally and survives reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    entity_type: String,
    id: String,
    fields: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// A locally synthesized entity awaiting server confirmation.
    ///
    /// Its id is replaced once a sync resolves the server copy through the
    /// type's uniqueness predicate.
    pub fn pending(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, format!("{}{}", PENDING_PREFIX, Uuid::new_v4()))
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_PREFIX)
    }

    pub fn context_id(&self) -> Option<&str> {
        self.fields.get(CONTEXT_ID_FIELD).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Attribute accessor used by predicates, sorts and section keys.
    /// Missing attributes read as `Null`.
    pub fn attribute(&self, field: &str) -> Value {
        if field == ID_FIELD {
            return Value::Text(self.id.clone());
        }
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn has_field(&self, field: &str) -> bool {
        field == ID_FIELD || self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        if field == ID_FIELD {
            return;
        }
        self.fields.insert(field, value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Overlays the server-owned attributes of `server` onto this entity.
    ///
    /// The result takes the server's id; attributes absent from `server`
    /// keep their local values.
    pub fn merged_with(&self, server: &Entity) -> Entity {
        let mut merged = self.clone();
        merged.id = server.id.clone();
        for (field, value) in &server.fields {
            merged.fields.insert(field.clone(), value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_preserves_local_fields() {
        let local = Entity::new("conversation", "9")
            .with("subject", "old")
            .with("is_read", true);
        let server = Entity::new("conversation", "9").with("subject", "new");

        let merged = local.merged_with(&server);
        assert_eq!(merged.attribute("subject"), Value::from("new"));
        assert_eq!(merged.attribute("is_read"), Value::Boolean(true));
    }

    #[test]
    fn test_pending_entity_takes_server_id() {
        let pending = Entity::pending("submission").with("draft", "text");
        assert!(pending.is_pending());

        let server = Entity::new("submission", "44").with("state", "submitted");
        let merged = pending.merged_with(&server);
        assert_eq!(merged.id(), "44");
        assert!(!merged.is_pending());
        assert_eq!(merged.attribute("draft"), Value::from("text"));
    }

    #[test]
    fn test_id_is_a_virtual_attribute() {
        let mut entity = Entity::new("course", "1");
        entity.set(ID_FIELD, "2");
        assert_eq!(entity.id(), "1");
        assert_eq!(entity.attribute(ID_FIELD), Value::from("1"));
        assert!(entity.attribute("name").is_null());
    }
}
