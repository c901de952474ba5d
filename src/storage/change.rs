// ============================================================================
// Store Change Tracking
// ============================================================================
//
// Every committed write batch is described by one ChangeBatch: the ordered
// list of entity-level changes it made, tagged with the store's commit
// sequence. Observers receive whole batches, never individual records.
//
// ============================================================================

use crate::core::Entity;
use crate::query::Query;

/// A single committed change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Inserted(Entity),
    Updated { old: Entity, new: Entity },
    Deleted(Entity),
}

impl EntityChange {
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Inserted(entity) | Self::Deleted(entity) => entity.entity_type(),
            Self::Updated { new, .. } => new.entity_type(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(entity) | Self::Deleted(entity) => entity.id(),
            Self::Updated { new, .. } => new.id(),
        }
    }

    /// Whether the change is visible through `query`, before or after.
    pub fn touches(&self, query: &Query) -> bool {
        match self {
            Self::Inserted(entity) | Self::Deleted(entity) => query.matches(entity),
            Self::Updated { old, new } => query.matches(old) || query.matches(new),
        }
    }
}

/// All changes committed by one store write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub sequence: u64,
    pub changes: Vec<EntityChange>,
}

impl ChangeBatch {
    pub fn touches(&self, query: &Query) -> bool {
        self.changes.iter().any(|change| change.touches(query))
    }

    pub fn inserted(&self) -> usize {
        self.count(|change| matches!(change, EntityChange::Inserted(_)))
    }

    pub fn updated(&self) -> usize {
        self.count(|change| matches!(change, EntityChange::Updated { .. }))
    }

    pub fn deleted(&self) -> usize {
        self.count(|change| matches!(change, EntityChange::Deleted(_)))
    }

    fn count(&self, f: impl Fn(&EntityChange) -> bool) -> usize {
        self.changes.iter().filter(|change| f(change)).count()
    }
}
