use super::change::EntityChange;
use super::notify::{ChangeStream, StoreSubscription};
use super::table::EntitySchema;
use crate::collection::Sections;
use crate::core::{DecodeError, Entity, Result};
use crate::query::{Predicate, Query};
use async_trait::async_trait;
use std::collections::HashSet;

/// One write inside a batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or fully replace the row with the entity's id.
    Upsert(Entity),
    /// Reconcile a server copy: resolve the existing row through `unique`,
    /// overlay the server-owned fields and keep local-only ones. Without a
    /// match the entity is inserted as is.
    Merge { entity: Entity, unique: Predicate },
    Delete { entity_type: String, id: String },
    /// Delete every row of `entity_type` matching `scope` whose id is not
    /// in `keep`. Pending rows have never been seen by the server and stay.
    DeleteMissing {
        entity_type: String,
        scope: Predicate,
        keep: HashSet<String>,
    },
}

/// Writes applied atomically: observers see all of them or none.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn upsert(mut self, entity: Entity) -> Self {
        self.ops.push(WriteOp::Upsert(entity));
        self
    }

    pub fn delete(mut self, entity: &Entity) -> Self {
        self.ops.push(WriteOp::Delete {
            entity_type: entity.entity_type().to_string(),
            id: entity.id().to_string(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// What a committed batch did.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Commit sequence, `None` when the batch changed nothing.
    pub sequence: Option<u64>,
    pub changes: Vec<EntityChange>,
    /// Records skipped for failing schema validation.
    pub rejected: Vec<DecodeError>,
    /// Writes that matched the stored state exactly.
    pub unchanged: usize,
}

/// Initial result set of a query plus the stream of batches committed after it.
pub struct Observation {
    pub initial: Vec<Entity>,
    pub subscription: StoreSubscription,
    pub stream: ChangeStream,
}

/// Persistent, queryable table per entity type.
///
/// Implementations serialize every mutation and query through one context
/// and notify each matching observer exactly once per committed batch.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Installs (or replaces) the storage rules for one entity type.
    async fn register_schema(&self, schema: EntitySchema) -> Result<()>;

    /// Matching entities in the query's sort order (ties by id).
    async fn query(&self, query: &Query) -> Result<Vec<Entity>>;

    async fn get(&self, entity_type: &str, id: &str) -> Result<Option<Entity>>;

    async fn count(&self, entity_type: &str, predicate: &Predicate) -> Result<usize>;

    async fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome>;

    /// Registers an observer for `query` and returns the current result set
    /// taken under the same lock, so no batch falls between the two.
    async fn observe(&self, query: &Query) -> Result<Observation>;

    async fn query_sections(&self, query: &Query) -> Result<Sections> {
        let entities = self.query(query).await?;
        Ok(Sections::build(query, entities))
    }

    async fn upsert(&self, entity: Entity) -> Result<BatchOutcome> {
        self.apply(WriteBatch::new().upsert(entity)).await
    }

    async fn delete(&self, entity: &Entity) -> Result<BatchOutcome> {
        self.apply(WriteBatch::new().delete(entity)).await
    }
}
