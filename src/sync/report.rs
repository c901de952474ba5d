use crate::core::DecodeError;
use crate::storage::BatchOutcome;

/// Tally of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub entity_type: String,
    pub pages: usize,
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Records skipped by the decoder or by store validation.
    pub decode_errors: Vec<DecodeError>,
}

impl SyncReport {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, outcome: &BatchOutcome) {
        for change in &outcome.changes {
            match change {
                crate::storage::EntityChange::Inserted(_) => self.inserted += 1,
                crate::storage::EntityChange::Updated { .. } => self.updated += 1,
                crate::storage::EntityChange::Deleted(_) => self.deleted += 1,
            }
        }
        self.unchanged += outcome.unchanged;
        self.decode_errors.extend(outcome.rejected.iter().cloned());
    }

    /// Records that reached the store.
    pub fn upserted(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}
