use super::change::{ChangeBatch, EntityChange};
use super::engine::{BatchOutcome, EntityStore, Observation, WriteBatch, WriteOp};
use super::notify::SharedRegistry;
use super::table::{EntitySchema, EntityTable};
use crate::config::StoreConfig;
use crate::core::{Entity, Result};
use crate::query::{Predicate, Query};
use async_trait::async_trait;
use im::HashMap as ImHashMap;
use log::warn;
use std::sync::Arc;
use tokio::sync::Mutex;

struct StoreState {
    tables: ImHashMap<String, EntityTable>,
    sequence: u64,
}

/// Entity store kept in memory.
///
/// Every query and write goes through one async mutex, which plays the role
/// of the store's confinement context. Writes stage on a structural clone
/// of the tables and publish with a single swap, so a failed batch leaves
/// no trace and observers never see half a batch.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    observers: SharedRegistry,
    config: StoreConfig,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            state: Mutex::new(StoreState {
                tables: ImHashMap::new(),
                sequence: 0,
            }),
            observers: SharedRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Sequence number of the last committed batch.
    pub async fn sequence(&self) -> u64 {
        self.state.lock().await.sequence
    }

    pub fn observer_count(&self) -> Result<usize> {
        self.observers.observer_count()
    }

    async fn table(&self, entity_type: &str) -> Option<EntityTable> {
        self.state.lock().await.tables.get(entity_type).cloned()
    }

    fn run_query(table: Option<&EntityTable>, query: &Query) -> Vec<Entity> {
        let Some(table) = table else {
            return Vec::new();
        };
        let mut entities = table.find(query.predicate());
        query.comparator().sort(&mut entities);
        entities
    }

    fn apply_op(&self, tables: &mut ImHashMap<String, EntityTable>, op: WriteOp, outcome: &mut BatchOutcome) -> Result<()> {
        let strict = self.config.strict_unique;
        match op {
            WriteOp::Upsert(entity) => {
                let table = table_mut(tables, entity.entity_type());
                if let Err(err) = table.schema().validate(&entity) {
                    warn!("Rejecting {} '{}': {}", entity.entity_type(), entity.id(), err);
                    outcome.rejected.push(err);
                    return Ok(());
                }
                let previous = table.put(entity.clone(), strict)?;
                record_put(outcome, previous, entity);
            }
            WriteOp::Merge { entity, unique } => {
                let table = table_mut(tables, entity.entity_type());
                let existing = table
                    .get(entity.id())
                    .cloned()
                    .or_else(|| table.find(&unique).into_iter().next());
                let merged = match &existing {
                    Some(local) => local.merged_with(&entity),
                    None => entity,
                };
                if let Err(err) = table.schema().validate(&merged) {
                    warn!("Rejecting {} '{}': {}", merged.entity_type(), merged.id(), err);
                    outcome.rejected.push(err);
                    return Ok(());
                }
                match existing {
                    // Local row known under another id (a pending entity):
                    // retire it and store the server identity.
                    Some(local) if local.id() != merged.id() => {
                        if let Some(removed) = table.remove(local.id()) {
                            outcome.changes.push(EntityChange::Deleted(removed));
                        }
                        let previous = table.put(merged.clone(), strict)?;
                        record_put(outcome, previous, merged);
                    }
                    _ => {
                        let previous = table.put(merged.clone(), strict)?;
                        record_put(outcome, previous, merged);
                    }
                }
            }
            WriteOp::Delete { entity_type, id } => {
                if let Some(table) = tables.get_mut(&entity_type)
                    && let Some(removed) = table.remove(&id)
                {
                    outcome.changes.push(EntityChange::Deleted(removed));
                }
            }
            WriteOp::DeleteMissing {
                entity_type,
                scope,
                keep,
            } => {
                if let Some(table) = tables.get_mut(&entity_type) {
                    let doomed: Vec<String> = table
                        .scan()
                        .filter(|entity| {
                            !entity.is_pending() && scope.evaluate(entity) && !keep.contains(entity.id())
                        })
                        .map(|entity| entity.id().to_string())
                        .collect();
                    for id in doomed {
                        if let Some(removed) = table.remove(&id) {
                            outcome.changes.push(EntityChange::Deleted(removed));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn table_mut<'a>(tables: &'a mut ImHashMap<String, EntityTable>, entity_type: &str) -> &'a mut EntityTable {
    tables
        .entry(entity_type.to_string())
        .or_insert_with(|| EntityTable::new(EntitySchema::new(entity_type)))
}

fn record_put(outcome: &mut BatchOutcome, previous: Option<Entity>, entity: Entity) {
    match previous {
        None => outcome.changes.push(EntityChange::Inserted(entity)),
        Some(old) if old == entity => outcome.unchanged += 1,
        Some(old) => outcome.changes.push(EntityChange::Updated { old, new: entity }),
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn register_schema(&self, schema: EntitySchema) -> Result<()> {
        let mut state = self.state.lock().await;
        let table = match state.tables.get(schema.entity_type()) {
            Some(existing) => existing.with_schema(schema)?,
            None => EntityTable::new(schema),
        };
        state.tables.insert(table.schema().entity_type().to_string(), table);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Entity>> {
        query.validate()?;
        let table = self.table(query.entity_type()).await;
        Ok(Self::run_query(table.as_ref(), query))
    }

    async fn get(&self, entity_type: &str, id: &str) -> Result<Option<Entity>> {
        Ok(self
            .table(entity_type)
            .await
            .and_then(|table| table.get(id).cloned()))
    }

    async fn count(&self, entity_type: &str, predicate: &Predicate) -> Result<usize> {
        Ok(self.table(entity_type).await.map_or(0, |table| {
            table.scan().filter(|entity| predicate.evaluate(entity)).count()
        }))
    }

    async fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome> {
        let mut state = self.state.lock().await;
        let mut staged = state.tables.clone();
        let mut outcome = BatchOutcome::default();

        for op in batch.into_ops() {
            self.apply_op(&mut staged, op, &mut outcome)?;
        }

        if outcome.changes.is_empty() {
            return Ok(outcome);
        }

        state.sequence += 1;
        state.tables = staged;
        let committed = Arc::new(ChangeBatch {
            sequence: state.sequence,
            changes: outcome.changes.clone(),
        });
        outcome.sequence = Some(committed.sequence);
        self.observers.notify(&committed)?;
        Ok(outcome)
    }

    async fn observe(&self, query: &Query) -> Result<Observation> {
        query.validate()?;
        let state = self.state.lock().await;
        let initial = Self::run_query(state.tables.get(query.entity_type()), query);
        let (subscription, stream) = self.observers.subscribe(query.clone())?;
        drop(state);
        Ok(Observation {
            initial,
            subscription,
            stream,
        })
    }
}
