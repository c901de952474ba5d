// ============================================================================
// src/query/sort.rs - Entity Ordering
// ============================================================================
//
// Multi-key comparator over entity attributes. Ties after every key are
// broken by id ascending, so identical sort keys always produce the same
// order no matter how the store iterated.
//
// NULL handling follows SQL defaults: NULLS LAST for ascending keys,
// NULLS FIRST for descending ones.
//
// ============================================================================

use crate::core::{Entity, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strategy for handling NULL values during sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullOrdering {
    NullsFirst,
    NullsLast,
}

impl NullOrdering {
    pub fn default_for_direction(ascending: bool) -> Self {
        if ascending {
            Self::NullsLast
        } else {
            Self::NullsFirst
        }
    }
}

/// One attribute in a sort specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
    pub null_ordering: NullOrdering,
}

impl SortDescriptor {
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, false)
    }

    pub fn new(field: impl Into<String>, ascending: bool) -> Self {
        Self {
            field: field.into(),
            ascending,
            null_ordering: NullOrdering::default_for_direction(ascending),
        }
    }

    pub fn nulls(mut self, null_ordering: NullOrdering) -> Self {
        self.null_ordering = null_ordering;
        self
    }

    /// Compares two attribute values under this descriptor's direction and
    /// NULL placement.
    pub fn compare_values(&self, left: &Value, right: &Value) -> Ordering {
        match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match self.null_ordering {
                NullOrdering::NullsFirst => Ordering::Less,
                NullOrdering::NullsLast => Ordering::Greater,
            },
            (false, true) => match self.null_ordering {
                NullOrdering::NullsFirst => Ordering::Greater,
                NullOrdering::NullsLast => Ordering::Less,
            },
            (false, false) => {
                let ordering = left.total_cmp(right);
                if self.ascending { ordering } else { ordering.reverse() }
            }
        }
    }
}

/// Comparator for entities under a list of sort descriptors.
pub struct EntityComparator<'a> {
    descriptors: &'a [SortDescriptor],
}

impl<'a> EntityComparator<'a> {
    pub fn new(descriptors: &'a [SortDescriptor]) -> Self {
        Self { descriptors }
    }

    pub fn compare(&self, left: &Entity, right: &Entity) -> Ordering {
        for descriptor in self.descriptors {
            let ordering = descriptor.compare_values(
                &left.attribute(&descriptor.field),
                &right.attribute(&descriptor.field),
            );
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        left.id().cmp(right.id())
    }

    pub fn sort(&self, entities: &mut [Entity]) {
        if entities.len() < 2 {
            return;
        }
        entities.sort_by(|a, b| self.compare(a, b));
    }
}
