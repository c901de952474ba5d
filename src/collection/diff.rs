// ============================================================================
// Collection Diff
// ============================================================================
//
// Turns two sectioned snapshots into the batch of updates a list view applies
// to go from one to the other. Updates are sequential: every index path is
// read against the state left by the updates before it in the same batch.
// The batch is produced in this order:
//
//   1. Deleted      rows that left the result, bottom-up
//   2. SectionInserted   new sections, empty, at their sorted position
//   3. Moved / Inserted  walking the new order, each row that is not part of
//                    the longest run of rows already in order is placed right
//                    after its new predecessor
//   4. SectionDeleted    sections that are gone (empty by now), bottom-up
//   5. Updated      rows that changed without being moved, at their final
//                    path; a changed row that a moved row jumped over is a
//                    Moved onto itself
//
// The batch is checked against the target snapshot before it is returned;
// if the two disagree (section keys that do not sort consistently) the
// batch degrades to a single Reload.
//
// ============================================================================

use super::snapshot::{IndexPath, Sections, keys_equal};
use crate::core::{Entity, Value};
use std::collections::{HashMap, HashSet};

/// One change to the rows presented by a live collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionUpdate {
    /// Discard everything and re-read the collection.
    Reload,
    Inserted(IndexPath, Entity),
    Updated(IndexPath, Entity),
    Moved(IndexPath, IndexPath, Entity),
    Deleted(IndexPath, Entity),
    SectionInserted(usize),
    SectionDeleted(usize),
}

impl CollectionUpdate {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Inserted(_, entity)
            | Self::Updated(_, entity)
            | Self::Moved(_, _, entity)
            | Self::Deleted(_, entity) => Some(entity),
            _ => None,
        }
    }
}

/// Place of a row inside a model section. A row that keeps its place sits
/// at `(old row, 0)`. A placed row sits right behind its predecessor, one
/// step further along the predecessor's anchor; a placed first row starts
/// the `-1` anchor.
type Slot = (i64, usize);

/// Binary indexed tree counting occupied positions.
struct Occupancy {
    tree: Vec<usize>,
}

impl Occupancy {
    fn new(len: usize) -> Self {
        Self {
            tree: vec![0; len + 1],
        }
    }

    fn set(&mut self, index: usize, occupied: bool) {
        let mut i = index + 1;
        while i < self.tree.len() {
            if occupied {
                self.tree[i] += 1;
            } else {
                self.tree[i] -= 1;
            }
            i += i & i.wrapping_neg();
        }
    }

    /// Occupied positions strictly before `index`.
    fn before(&self, index: usize) -> usize {
        let mut i = index;
        let mut count = 0;
        while i > 0 {
            count += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        count
    }
}

struct ModelSection<'a> {
    key: Option<Value>,
    slots: Vec<Slot>,
    occupants: Vec<Option<&'a str>>,
    occupancy: Occupancy,
}

impl<'a> ModelSection<'a> {
    fn new(key: Option<Value>, mut slots: Vec<Slot>) -> Self {
        slots.sort_unstable();
        slots.dedup();
        let len = slots.len();
        Self {
            key,
            slots,
            occupants: vec![None; len],
            occupancy: Occupancy::new(len),
        }
    }

    fn len(&self) -> usize {
        self.occupancy.before(self.slots.len())
    }

    fn ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.occupants.iter().flatten().copied()
    }
}

/// Row ids per section, mutated in step with the emitted updates.
///
/// Every slot a row can occupy is known before the first update, so row
/// positions are prefix counts instead of scans.
struct Model<'a> {
    arena: Vec<ModelSection<'a>>,
    /// Arena indices in presentation order.
    order: Vec<usize>,
    /// Presentation index of each arena section.
    display: Vec<usize>,
    located: HashMap<&'a str, (usize, usize)>,
}

impl<'a> Model<'a> {
    /// Model of `old`, with `extra[s]` reserved in old section `s`.
    fn new(old: &'a Sections, mut extra: Vec<Vec<Slot>>) -> Self {
        let mut model = Self {
            arena: Vec::with_capacity(old.len()),
            order: Vec::with_capacity(old.len()),
            display: Vec::new(),
            located: HashMap::with_capacity(old.row_count()),
        };
        for (s, section) in old.sections().iter().enumerate() {
            let mut slots: Vec<Slot> = (0..section.len()).map(|r| (r as i64, 0)).collect();
            slots.append(&mut extra[s]);
            model.arena.push(ModelSection::new(section.key().cloned(), slots));
            model.order.push(s);
            for (r, entity) in section.rows().iter().enumerate() {
                model.occupy(entity.id(), s, (r as i64, 0));
            }
        }
        model.reindex();
        model
    }

    fn reindex(&mut self) {
        self.display = vec![0; self.arena.len()];
        for (position, &arena) in self.order.iter().enumerate() {
            self.display[arena] = position;
        }
    }

    fn section_index(&self, key: Option<&Value>) -> Option<usize> {
        self.order
            .iter()
            .position(|&arena| keys_equal(self.arena[arena].key.as_ref(), key))
    }

    fn insert_section(&mut self, at: usize, key: Option<Value>, slots: Vec<Slot>) {
        self.arena.push(ModelSection::new(key, slots));
        self.order.insert(at, self.arena.len() - 1);
    }

    /// Puts `id` into `slot` and returns its row, `None` when the slot is
    /// unknown or taken.
    fn occupy(&mut self, id: &'a str, arena: usize, slot: Slot) -> Option<usize> {
        let section = &mut self.arena[arena];
        let index = section.slots.binary_search(&slot).ok()?;
        if section.occupants[index].is_some() {
            return None;
        }
        section.occupants[index] = Some(id);
        section.occupancy.set(index, true);
        self.located.insert(id, (arena, index));
        Some(section.occupancy.before(index))
    }

    /// Takes `id` out and returns the path it had.
    fn vacate(&mut self, id: &str) -> Option<IndexPath> {
        let (arena, index) = self.located.remove(id)?;
        let section = &mut self.arena[arena];
        section.occupants[index] = None;
        section.occupancy.set(index, false);
        Some(IndexPath::new(self.display[arena], section.occupancy.before(index)))
    }

    fn matches(&self, snapshot: &Sections) -> bool {
        self.order.len() == snapshot.len()
            && self
                .order
                .iter()
                .zip(snapshot.sections())
                .all(|(&arena, section)| {
                    let model = &self.arena[arena];
                    section.same_key(model.key.as_ref())
                        && model.len() == section.len()
                        && model.ids().zip(section.rows()).all(|(id, e)| id == e.id())
                })
    }
}

/// Updates that transform `old` into `new`.
pub fn diff(old: &Sections, new: &Sections) -> Vec<CollectionUpdate> {
    // Old section each new section grows out of, matched by key.
    let sources: Vec<Option<usize>> = new
        .sections()
        .iter()
        .map(|section| old.sections().iter().position(|o| o.same_key(section.key())))
        .collect();

    // Rows in the longest run already in order stay put; every other row
    // gets a slot right behind its new predecessor.
    let mut stable: Vec<HashSet<usize>> = Vec::with_capacity(new.len());
    let mut slots: Vec<Vec<Slot>> = Vec::with_capacity(new.len());
    for (j, section) in new.sections().iter().enumerate() {
        let in_place: Vec<usize> = sources[j]
            .and_then(|s| old.section(s))
            .map(|source| {
                source
                    .rows()
                    .iter()
                    .filter_map(|e| new.index_path_of(e.id()))
                    .filter(|path| path.section == j)
                    .map(|path| path.row)
                    .collect()
            })
            .unwrap_or_default();
        let kept = longest_increasing(&in_place);

        let mut row_slots: Vec<Slot> = Vec::with_capacity(section.len());
        for (row, entity) in section.rows().iter().enumerate() {
            let slot = if kept.contains(&row) {
                match old.index_path_of(entity.id()) {
                    Some(path) => (path.row as i64, 0),
                    None => return vec![CollectionUpdate::Reload],
                }
            } else {
                match row_slots.last() {
                    Some(&(anchor, step)) => (anchor, step + 1),
                    None => (-1, 0),
                }
            };
            row_slots.push(slot);
        }
        stable.push(kept);
        slots.push(row_slots);
    }

    let mut extra: Vec<Vec<Slot>> = vec![Vec::new(); old.len()];
    for (j, source) in sources.iter().enumerate() {
        if let Some(s) = source {
            extra[*s].extend(slots[j].iter().copied());
        }
    }
    let mut model = Model::new(old, extra);
    let mut updates = Vec::new();

    let gone: Vec<&Entity> = old.iter().filter(|e| !new.contains(e.id())).collect();
    for entity in gone.into_iter().rev() {
        if let Some(path) = model.vacate(entity.id()) {
            updates.push(CollectionUpdate::Deleted(path, entity.clone()));
        }
    }

    let mut targets: Vec<usize> = Vec::with_capacity(new.len());
    let mut previous: Option<usize> = None;
    for (j, section) in new.sections().iter().enumerate() {
        let index = match model.section_index(section.key()) {
            Some(index) => index,
            None => {
                let index = previous.map_or(0, |p| p + 1);
                model.insert_section(index, section.key().cloned(), slots[j].clone());
                updates.push(CollectionUpdate::SectionInserted(index));
                index
            }
        };
        targets.push(model.order[index]);
        previous = Some(index);
    }
    model.reindex();

    let mut moved: HashSet<&str> = HashSet::new();
    for (j, section) in new.sections().iter().enumerate() {
        for (row, entity) in section.rows().iter().enumerate() {
            if stable[j].contains(&row) {
                continue;
            }
            let from = model.vacate(entity.id());
            let Some(to_row) = model.occupy(entity.id(), targets[j], slots[j][row]) else {
                return vec![CollectionUpdate::Reload];
            };
            let to = IndexPath::new(model.display[targets[j]], to_row);
            match from {
                Some(from) if from == to => {}
                Some(from) => {
                    moved.insert(entity.id());
                    updates.push(CollectionUpdate::Moved(from, to, entity.clone()));
                }
                None => updates.push(CollectionUpdate::Inserted(to, entity.clone())),
            }
        }
    }

    for index in (0..model.order.len()).rev() {
        if !targets.contains(&model.order[index]) {
            model.order.remove(index);
            updates.push(CollectionUpdate::SectionDeleted(index));
        }
    }

    let changed: Vec<(IndexPath, &Entity)> = new
        .paths()
        .filter(|(_, entity)| {
            !moved.contains(entity.id())
                && old.entity(entity.id()).is_some_and(|before| before != *entity)
        })
        .collect();
    let crossed = crossed_moves(old, new, &moved, changed.iter().map(|(_, e)| e.id()));
    for &(path, entity) in &changed {
        // A changed row that a moved row jumped over is the other half of
        // that reorder.
        if crossed.contains(entity.id()) {
            updates.push(CollectionUpdate::Moved(path, path, entity.clone()));
        } else {
            updates.push(CollectionUpdate::Updated(path, entity.clone()));
        }
    }

    if !model.matches(new) {
        return vec![CollectionUpdate::Reload];
    }
    updates
}

/// The `rows` whose order against at least one `moved` row differs between
/// the two snapshots.
fn crossed_moves<'a>(
    old: &Sections,
    new: &Sections,
    moved: &HashSet<&str>,
    rows: impl Iterator<Item = &'a str>,
) -> HashSet<&'a str> {
    let mut crossed = HashSet::new();
    if moved.is_empty() {
        return crossed;
    }
    let old_rank: HashMap<&str, usize> = old.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();
    let new_rank: HashMap<&str, usize> = new.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();
    let rank = |id: &str| Some((*old_rank.get(id)?, *new_rank.get(id)?));

    // (old rank, new rank, the row when it is one of `rows`)
    let mut points: Vec<(usize, usize, Option<&'a str>)> = moved
        .iter()
        .filter_map(|id| rank(*id).map(|(o, n)| (o, n, None)))
        .collect();
    points.extend(rows.filter_map(|id| rank(id).map(|(o, n)| (o, n, Some(id)))));
    points.sort_unstable_by_key(|&(o, _, _)| o);

    // Moved rows that were above and are now below.
    let mut below = Occupancy::new(new.row_count());
    let mut seen = 0;
    for &(_, n, row) in &points {
        match row {
            None => {
                below.set(n, true);
                seen += 1;
            }
            Some(id) if seen > below.before(n) => {
                crossed.insert(id);
            }
            Some(_) => {}
        }
    }

    // Moved rows that were below and are now above.
    let mut above = Occupancy::new(new.row_count());
    for &(_, n, row) in points.iter().rev() {
        match row {
            None => above.set(n, true),
            Some(id) if above.before(n) > 0 => {
                crossed.insert(id);
            }
            Some(_) => {}
        }
    }
    crossed
}

/// Values of one longest strictly increasing subsequence.
fn longest_increasing(values: &[usize]) -> HashSet<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; values.len()];
    for (i, &value) in values.iter().enumerate() {
        let pos = tails.partition_point(|&t| values[t] < value);
        if pos > 0 {
            parent[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut result = HashSet::new();
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        result.insert(values[i]);
        cursor = parent[i];
    }
    result
}
