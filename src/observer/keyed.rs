use crate::collection::{CollectionSubscription, CollectionUpdate, LiveCollection, Sections};
use crate::core::Entity;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

type KeyFn<K> = Arc<dyn Fn(&Entity) -> K + Send + Sync>;

struct Slots<K> {
    key_of: KeyFn<K>,
    slots: HashMap<K, watch::Sender<Option<Entity>>>,
    count: watch::Sender<usize>,
}

impl<K: Eq + Hash + Clone> Slots<K> {
    fn set(&mut self, key: K, value: Option<Entity>) {
        match self.slots.get(&key) {
            Some(slot) => {
                slot.send_replace(value);
            }
            None if value.is_some() => {
                self.slots.insert(key, watch::channel(value).0);
            }
            None => {}
        }
    }

    fn apply(&mut self, updates: &[CollectionUpdate], collection: &Weak<LiveCollection>) {
        for update in updates {
            match update {
                CollectionUpdate::Inserted(_, entity)
                | CollectionUpdate::Updated(_, entity)
                | CollectionUpdate::Moved(_, _, entity) => {
                    let key = (self.key_of)(entity);
                    self.set(key, Some(entity.clone()));
                }
                CollectionUpdate::Deleted(_, entity) => {
                    let key = (self.key_of)(entity);
                    self.set(key.clone(), None);
                    // Keep the slot only while someone listens to it.
                    if self.slots.get(&key).is_some_and(|slot| slot.receiver_count() == 0) {
                        self.slots.remove(&key);
                    }
                }
                CollectionUpdate::Reload => {
                    if let Some(collection) = collection.upgrade() {
                        self.reset(&collection.snapshot());
                    }
                }
                CollectionUpdate::SectionInserted(_) | CollectionUpdate::SectionDeleted(_) => {}
            }
        }
        self.recount();
    }

    fn reset(&mut self, snapshot: &Sections) {
        let mut present: HashMap<K, Entity> = snapshot
            .iter()
            .map(|entity| ((self.key_of)(entity), entity.clone()))
            .collect();
        self.slots.retain(|key, slot| {
            let value = present.remove(key);
            let keep = value.is_some() || slot.receiver_count() > 0;
            slot.send_replace(value);
            keep
        });
        for (key, entity) in present {
            self.slots.insert(key, watch::channel(Some(entity)).0);
        }
        self.recount();
    }

    fn recount(&self) {
        let present = self
            .slots
            .values()
            .filter(|slot| slot.borrow().is_some())
            .count();
        self.count.send_if_modified(|count| {
            let changed = *count != present;
            *count = present;
            changed
        });
    }
}

/// Index over a live collection by a caller-chosen key.
///
/// Each key has a slot holding the current entity or `None`. A deletion
/// sets the slot to `None`; receivers handed out by
/// [`KeyedObserver::observe`] stay connected and see the entity again if it
/// comes back.
pub struct KeyedObserver<K> {
    collection: Arc<LiveCollection>,
    slots: Arc<Mutex<Slots<K>>>,
    _subscription: CollectionSubscription,
}

impl KeyedObserver<String> {
    /// Keyed by entity id.
    pub fn by_id(collection: Arc<LiveCollection>) -> Self {
        Self::new(collection, |entity| entity.id().to_string())
    }
}

impl<K> KeyedObserver<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new<F>(collection: Arc<LiveCollection>, key_of: F) -> Self
    where
        F: Fn(&Entity) -> K + Send + Sync + 'static,
    {
        let slots = Arc::new(Mutex::new(Slots {
            key_of: Arc::new(key_of),
            slots: HashMap::new(),
            count: watch::channel(0).0,
        }));

        // Hold the slots until they reflect the snapshot, so the first
        // delivered batch cannot be applied ahead of it.
        let mut guard = lock(&slots);
        let weak_slots = Arc::downgrade(&slots);
        let weak_collection = Arc::downgrade(&collection);
        let (snapshot, subscription) = collection.observe_with(move |updates| {
            if let Some(slots) = weak_slots.upgrade() {
                lock(&slots).apply(updates, &weak_collection);
            }
        });
        guard.reset(&snapshot);
        drop(guard);

        Self {
            collection,
            slots,
            _subscription: subscription,
        }
    }

    pub fn collection(&self) -> &Arc<LiveCollection> {
        &self.collection
    }

    pub fn lookup(&self, key: &K) -> Option<Entity> {
        lock(&self.slots)
            .slots
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Current and future values for `key`. A key that has not appeared
    /// yet gets a slot holding `None`.
    pub fn observe(&self, key: K) -> watch::Receiver<Option<Entity>> {
        lock(&self.slots)
            .slots
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Number of keys currently holding an entity.
    pub fn count(&self) -> watch::Receiver<usize> {
        lock(&self.slots).count.subscribe()
    }

    pub fn len(&self) -> usize {
        *lock(&self.slots).count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every store batch committed before this call is visible
    /// through the observer.
    pub async fn settle(&self) {
        self.collection.settle().await
    }
}

fn lock<K>(slots: &Mutex<Slots<K>>) -> MutexGuard<'_, Slots<K>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
