use crate::core::{DecodeError, Entity, ID_FIELD, Result, StoreError};
use crate::query::Predicate;
use im::{HashMap as ImHashMap, OrdMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-type storage rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    entity_type: String,
    required: Vec<String>,
    unique: Vec<Vec<String>>,
}

impl EntitySchema {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            required: Vec::new(),
            unique: Vec::new(),
        }
    }

    /// Field that must be present and non-null on every stored entity.
    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Composite key (besides `id`) that must be unique across the table,
    /// e.g. `["course_id", "assignment_id"]` for rubric-like aggregates.
    pub fn unique<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.unique.push(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique
    }

    /// Checks required fields; the failure is charged to this record only.
    pub fn validate(&self, entity: &Entity) -> std::result::Result<(), DecodeError> {
        for field in &self.required {
            if field == ID_FIELD {
                continue;
            }
            if entity.get(field).is_none_or(|value| value.is_null()) {
                return Err(DecodeError::missing(&self.entity_type, Some(entity.id()), field));
            }
        }
        Ok(())
    }

    /// Index key for `fields` on `entity`; `None` when any part is null, as
    /// nulls never collide.
    fn unique_key(&self, fields: &[String], entity: &Entity) -> Option<String> {
        let mut key = String::new();
        for field in fields {
            let value = entity.attribute(field);
            if value.is_null() {
                return None;
            }
            key.push_str(value.type_name());
            key.push(':');
            key.push_str(&value.to_string());
            key.push('\u{1f}');
        }
        Some(key)
    }
}

/// Rows of one entity type, keyed and iterated by id.
///
/// Backed by persistent maps so a store can stage a whole batch on a cheap
/// clone and publish it in one swap.
#[derive(Debug, Clone)]
pub struct EntityTable {
    schema: Arc<EntitySchema>,
    rows: OrdMap<String, Entity>,
    unique_indexes: Vec<ImHashMap<String, String>>,
}

impl EntityTable {
    pub fn new(schema: EntitySchema) -> Self {
        let unique_indexes = vec![ImHashMap::new(); schema.unique.len()];
        Self {
            schema: Arc::new(schema),
            rows: OrdMap::new(),
            unique_indexes,
        }
    }

    /// Re-creates the table under a new schema, re-indexing existing rows.
    pub fn with_schema(&self, schema: EntitySchema) -> Result<Self> {
        let mut table = Self::new(schema);
        for entity in self.rows.values() {
            table.put(entity.clone(), true)?;
        }
        Ok(table)
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.rows.get(id)
    }

    pub fn scan(&self) -> impl Iterator<Item = &Entity> {
        self.rows.values()
    }

    pub fn find(&self, predicate: &Predicate) -> Vec<Entity> {
        self.rows
            .values()
            .filter(|entity| predicate.evaluate(entity))
            .cloned()
            .collect()
    }

    /// Inserts or replaces the row with `entity.id()`, returning the
    /// previous version.
    pub fn put(&mut self, entity: Entity, enforce_unique: bool) -> Result<Option<Entity>> {
        let mut keys = Vec::with_capacity(self.unique_indexes.len());
        for (idx, fields) in self.schema.unique.iter().enumerate() {
            let key = self.schema.unique_key(fields, &entity);
            if enforce_unique
                && let Some(key) = &key
                && let Some(owner) = self.unique_indexes[idx].get(key)
                && owner != entity.id()
            {
                return Err(StoreError::ConstraintViolation(format!(
                    "Unique constraint violation: {} ({}) already held by '{}'",
                    self.schema.entity_type,
                    fields.join(", "),
                    owner
                )));
            }
            keys.push(key);
        }

        let previous = self.remove(entity.id());
        for (idx, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                self.unique_indexes[idx].insert(key, entity.id().to_string());
            }
        }
        self.rows.insert(entity.id().to_string(), entity);
        Ok(previous)
    }

    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        let removed = self.rows.remove(id)?;
        for (idx, fields) in self.schema.unique.iter().enumerate() {
            if let Some(key) = self.schema.unique_key(fields, &removed)
                && self.unique_indexes[idx].get(&key).is_some_and(|owner| owner == id)
            {
                self.unique_indexes[idx].remove(&key);
            }
        }
        Some(removed)
    }
}
