// ============================================================================
// Query Module
// ============================================================================
//
// A query names an entity type, filters it with a predicate tree, orders it
// with sort descriptors and optionally groups consecutive rows into
// sections. Queries are validated at construction; an invalid configuration
// is a programming error and never reaches a store or a live collection.
//
// ============================================================================

pub mod pattern;
pub mod predicate;
pub mod sort;

pub use predicate::{CompareOp, Predicate};
pub use sort::{EntityComparator, NullOrdering, SortDescriptor};

use crate::core::{Entity, Result, StoreError, Value};
use std::fmt;
use std::sync::Arc;

/// Maps a section key to the title shown for that section.
pub type SectionTitleFn = Arc<dyn Fn(Option<&Value>) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct Query {
    entity_type: String,
    predicate: Predicate,
    sort: Vec<SortDescriptor>,
    section_key: Option<String>,
    section_title: Option<SectionTitleFn>,
}

impl Query {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            predicate: Predicate::True,
            sort: Vec::new(),
            section_key: None,
            section_title: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = self.predicate.and(predicate);
        self
    }

    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    /// Groups rows into sections by `field`. The field must be the leading
    /// sort key so that sections come out contiguous.
    pub fn sectioned_by(mut self, field: impl Into<String>) -> Self {
        self.section_key = Some(field.into());
        self
    }

    pub fn section_titles<F>(mut self, title: F) -> Self
    where
        F: Fn(Option<&Value>) -> Option<String> + Send + Sync + 'static,
    {
        self.section_title = Some(Arc::new(title));
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn sort(&self) -> &[SortDescriptor] {
        &self.sort
    }

    pub fn section_key(&self) -> Option<&str> {
        self.section_key.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_type.is_empty() {
            return Err(StoreError::InvalidQuery("entity type must not be empty".into()));
        }
        if let Some(descriptor) = self.sort.iter().find(|d| d.field.is_empty()) {
            return Err(StoreError::InvalidQuery(format!(
                "sort descriptor with empty field in {:?}",
                descriptor
            )));
        }
        if let Some(key) = &self.section_key {
            match self.sort.first() {
                Some(first) if &first.field == key => {}
                _ => {
                    return Err(StoreError::InvalidQuery(format!(
                        "section key '{}' must be the leading sort descriptor",
                        key
                    )));
                }
            }
        }
        self.predicate.validate()
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        entity.entity_type() == self.entity_type && self.predicate.evaluate(entity)
    }

    pub fn comparator(&self) -> EntityComparator<'_> {
        EntityComparator::new(&self.sort)
    }

    /// Section grouping value for `entity`, `None` for unsectioned queries.
    pub fn section_value(&self, entity: &Entity) -> Option<Value> {
        self.section_key.as_ref().map(|key| entity.attribute(key))
    }

    pub fn title_for(&self, key: Option<&Value>) -> Option<String> {
        match &self.section_title {
            Some(title) => title(key),
            None => key.filter(|value| !value.is_null()).map(Value::to_string),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity_type", &self.entity_type)
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .field("section_key", &self.section_key)
            .field("section_title", &self.section_title.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_key_must_lead_sort() {
        let query = Query::new("assignment")
            .sort_by(SortDescriptor::asc("name"))
            .sectioned_by("group");
        assert!(matches!(query.validate(), Err(StoreError::InvalidQuery(_))));

        let query = Query::new("assignment")
            .sort_by(SortDescriptor::asc("group"))
            .sort_by(SortDescriptor::asc("name"))
            .sectioned_by("group");
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_matches_checks_type() {
        let query = Query::new("course").filter(Predicate::eq("is_favorite", true));
        let course = Entity::new("course", "1").with("is_favorite", true);
        let group = Entity::new("group", "1").with("is_favorite", true);
        assert!(query.matches(&course));
        assert!(!query.matches(&group));
    }

    #[test]
    fn test_default_section_titles() {
        let query = Query::new("todo");
        assert_eq!(query.title_for(Some(&Value::from("Week 1"))), Some("Week 1".into()));
        assert_eq!(query.title_for(Some(&Value::Null)), None);

        let query = query.section_titles(|key| key.map(|k| format!("Due {}", k)));
        assert_eq!(query.title_for(Some(&Value::Integer(3))), Some("Due 3".into()));
    }
}
