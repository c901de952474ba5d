use crate::core::{Entity, Value};
use crate::query::Query;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Position of a row in a sectioned collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// A run of consecutive rows sharing one section key.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    key: Option<Value>,
    title: Option<String>,
    rows: Vec<Entity>,
}

impl Section {
    /// Section key, `None` for the single section of an unsectioned query.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn rows(&self) -> &[Entity] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Entity> {
        self.rows.get(row)
    }

    pub(crate) fn same_key(&self, key: Option<&Value>) -> bool {
        keys_equal(self.key.as_ref(), key)
    }
}

pub(crate) fn keys_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(a), Some(b)) => a.total_cmp(b) == Ordering::Equal,
        _ => false,
    }
}

/// Ordered, sectioned result set of a query.
///
/// An unsectioned query always has exactly one section, possibly empty. A
/// sectioned query has one section per distinct key and no empty sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    sections: Vec<Section>,
    positions: HashMap<String, IndexPath>,
}

impl Sections {
    /// Groups already sorted entities into sections.
    pub fn build(query: &Query, entities: Vec<Entity>) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        if query.section_key().is_none() {
            sections.push(Section {
                key: None,
                title: None,
                rows: entities,
            });
        } else {
            for entity in entities {
                let key = query.section_value(&entity);
                match sections.last_mut() {
                    Some(section) if section.same_key(key.as_ref()) => section.rows.push(entity),
                    _ => sections.push(Section {
                        title: query.title_for(key.as_ref()),
                        key,
                        rows: vec![entity],
                    }),
                }
            }
        }

        let mut positions = HashMap::new();
        for (s, section) in sections.iter().enumerate() {
            for (r, entity) in section.rows.iter().enumerate() {
                positions.insert(entity.id().to_string(), IndexPath::new(s, r));
            }
        }
        Self {
            sections,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// True when no section holds a row.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.positions.len()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn get(&self, path: IndexPath) -> Option<&Entity> {
        self.sections.get(path.section)?.get(path.row)
    }

    pub fn index_path_of(&self, id: &str) -> Option<IndexPath> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.index_path_of(id).and_then(|path| self.get(path))
    }

    /// Rows in presentation order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.sections.iter().flat_map(|section| section.rows.iter())
    }

    pub fn paths(&self) -> impl Iterator<Item = (IndexPath, &Entity)> {
        self.sections.iter().enumerate().flat_map(|(s, section)| {
            section
                .rows
                .iter()
                .enumerate()
                .map(move |(r, entity)| (IndexPath::new(s, r), entity))
        })
    }

    pub fn ids(&self) -> Vec<Vec<String>> {
        self.sections
            .iter()
            .map(|section| section.rows.iter().map(|e| e.id().to_string()).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDescriptor;

    fn course(id: &str, term: &str) -> Entity {
        Entity::new("course", id).with("term", term)
    }

    #[test]
    fn test_unsectioned_has_one_section() {
        let query = Query::new("course");
        let sections = Sections::build(&query, vec![]);
        assert_eq!(sections.len(), 1);
        assert!(sections.is_empty());
    }

    #[test]
    fn test_groups_consecutive_keys() {
        let query = Query::new("course")
            .sort_by(SortDescriptor::asc("term"))
            .sectioned_by("term")
            .section_titles(|key| key.map(|term| format!("Term {}", term)));
        let sections = Sections::build(
            &query,
            vec![course("1", "A"), course("2", "A"), course("3", "B")],
        );
        assert_eq!(sections.ids(), vec![vec!["1", "2"], vec!["3"]]);
        assert_eq!(sections.section(1).and_then(Section::title), Some("Term B"));
        assert_eq!(sections.index_path_of("3"), Some(IndexPath::new(1, 0)));
        assert_eq!(sections.get(IndexPath::new(0, 1)).map(Entity::id), Some("2"));
    }
}
