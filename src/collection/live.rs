use super::diff::{CollectionUpdate, diff};
use super::snapshot::{IndexPath, Sections};
use crate::core::{Entity, Result};
use crate::query::Query;
use crate::storage::{ChangeBatch, ChangeStream, EntityChange, EntityStore, StoreEvent, StoreSubscription};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// Read access shared by anything that presents sectioned rows.
pub trait Collection {
    fn number_of_sections(&self) -> usize;

    fn number_of_items_in_section(&self, section: usize) -> usize;

    fn title_for_section(&self, section: usize) -> Option<String>;

    fn get(&self, path: IndexPath) -> Option<Entity>;
}

impl Collection for Sections {
    fn number_of_sections(&self) -> usize {
        self.len()
    }

    fn number_of_items_in_section(&self, section: usize) -> usize {
        self.section(section).map_or(0, |s| s.len())
    }

    fn title_for_section(&self, section: usize) -> Option<String> {
        self.section(section).and_then(|s| s.title().map(str::to_string))
    }

    fn get(&self, path: IndexPath) -> Option<Entity> {
        Sections::get(self, path).cloned()
    }
}

/// Callback invoked on the collection's delivery task with each batch.
pub type UpdateCallback = Arc<dyn Fn(&[CollectionUpdate]) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    channels: Vec<mpsc::UnboundedSender<Arc<Vec<CollectionUpdate>>>>,
    callbacks: HashMap<u64, UpdateCallback>,
}

struct Shared {
    snapshot: RwLock<Arc<Sections>>,
    subscribers: Mutex<Subscribers>,
    store_subscription: Mutex<Option<StoreSubscription>>,
    count: watch::Sender<usize>,
}

impl Shared {
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Arc<Sections> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_registered(&self, id: u64) -> bool {
        self.subscribers().callbacks.contains_key(&id)
    }

    /// Publishes a new snapshot and hands `updates` to every subscriber
    /// registered before the swap.
    fn publish(&self, snapshot: Sections, updates: Vec<CollectionUpdate>) {
        let rows = snapshot.row_count();
        let updates = Arc::new(updates);
        let callbacks: Vec<(u64, UpdateCallback)> = {
            let mut subscribers = self.subscribers();
            *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
            self.count.send_if_modified(|count| {
                let changed = *count != rows;
                *count = rows;
                changed
            });
            subscribers
                .channels
                .retain(|channel| channel.send(Arc::clone(&updates)).is_ok());
            subscribers
                .callbacks
                .iter()
                .map(|(id, callback)| (*id, Arc::clone(callback)))
                .collect()
        };
        for (id, callback) in callbacks {
            // Skip handles disposed of since the list was taken.
            if self.is_registered(id) {
                callback(&updates);
            }
        }
    }
}

enum Command {
    Replace {
        query: Query,
        initial: Vec<Entity>,
        subscription: StoreSubscription,
        stream: ChangeStream,
        done: oneshot::Sender<()>,
    },
}

/// Registration of an update callback. Dropping it unregisters the
/// callback; no update is delivered to it afterwards.
pub struct CollectionSubscription {
    id: u64,
    shared: Weak<Shared>,
}

impl CollectionSubscription {
    pub fn cancel(self) {}
}

impl Drop for CollectionSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers().callbacks.remove(&self.id);
        }
    }
}

/// Live, sectioned projection of a store query.
///
/// Reads come from the last published snapshot. Store batches touching the
/// query are applied by a delivery task that diffs the old snapshot against
/// the new one and hands the updates to subscribers in commit order. The
/// task is stopped when the collection is dropped.
pub struct LiveCollection {
    store: Arc<dyn EntityStore>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl LiveCollection {
    /// Starts observing `query`. Must be called inside a tokio runtime.
    pub async fn new(store: Arc<dyn EntityStore>, query: Query) -> Result<Self> {
        let observation = store.observe(&query).await?;
        let snapshot = Sections::build(&query, observation.initial.clone());
        let shared = Arc::new(Shared {
            count: watch::channel(snapshot.row_count()).0,
            snapshot: RwLock::new(Arc::new(snapshot)),
            subscribers: Mutex::new(Subscribers::default()),
            store_subscription: Mutex::new(Some(observation.subscription)),
        });

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            rows: index_rows(observation.initial),
            query,
        };
        let worker = tokio::spawn(worker.run(observation.stream, receiver));
        Ok(Self {
            store,
            shared,
            commands,
            worker,
        })
    }

    pub fn snapshot(&self) -> Arc<Sections> {
        self.shared.snapshot()
    }

    pub fn len(&self) -> usize {
        self.snapshot().row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains(id)
    }

    pub fn index_path_of(&self, id: &str) -> Option<IndexPath> {
        self.snapshot().index_path_of(id)
    }

    /// Rows in presentation order.
    pub fn entities(&self) -> Vec<Entity> {
        self.snapshot().iter().cloned().collect()
    }

    /// Row count, updated whenever it changes.
    pub fn count(&self) -> watch::Receiver<usize> {
        self.shared.count.subscribe()
    }

    /// Update batches from now on, as a channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<Vec<CollectionUpdate>>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.subscribers().channels.push(sender);
        receiver
    }

    /// Update batches from now on, delivered to `callback` on the delivery
    /// task. The callback must not block.
    pub fn on_updates<F>(&self, callback: F) -> CollectionSubscription
    where
        F: Fn(&[CollectionUpdate]) + Send + Sync + 'static,
    {
        self.observe_with(callback).1
    }

    /// Like [`LiveCollection::on_updates`], also returning the snapshot the
    /// first delivered batch applies to.
    pub fn observe_with<F>(&self, callback: F) -> (Arc<Sections>, CollectionSubscription)
    where
        F: Fn(&[CollectionUpdate]) + Send + Sync + 'static,
    {
        let mut subscribers = self.shared.subscribers();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.callbacks.insert(id, Arc::new(callback));
        let snapshot = self.shared.snapshot();
        drop(subscribers);
        (
            snapshot,
            CollectionSubscription {
                id,
                shared: Arc::downgrade(&self.shared),
            },
        )
    }

    /// Waits until every store batch committed before this call has been
    /// applied and delivered.
    pub async fn settle(&self) {
        let barrier = {
            let subscription = self
                .shared
                .store_subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscription.as_ref().map(StoreSubscription::barrier)
        };
        if let Some(barrier) = barrier {
            let _ = barrier.await;
        }
    }

    /// Switches to another query. Subscribers receive a single `Reload`.
    pub async fn set_query(&self, query: Query) -> Result<()> {
        let observation = self.store.observe(&query).await?;
        let (done, applied) = oneshot::channel();
        let command = Command::Replace {
            query,
            initial: observation.initial,
            subscription: observation.subscription,
            stream: observation.stream,
            done,
        };
        if self.commands.send(command).is_ok() {
            let _ = applied.await;
        }
        Ok(())
    }
}

impl Collection for LiveCollection {
    fn number_of_sections(&self) -> usize {
        self.snapshot().len()
    }

    fn number_of_items_in_section(&self, section: usize) -> usize {
        self.snapshot().number_of_items_in_section(section)
    }

    fn title_for_section(&self, section: usize) -> Option<String> {
        self.snapshot().title_for_section(section)
    }

    fn get(&self, path: IndexPath) -> Option<Entity> {
        self.snapshot().get(path).cloned()
    }
}

impl Drop for LiveCollection {
    fn drop(&mut self) {
        self.worker.abort();
        self.shared
            .store_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn index_rows(entities: Vec<Entity>) -> HashMap<String, Entity> {
    entities
        .into_iter()
        .map(|entity| (entity.id().to_string(), entity))
        .collect()
}

struct Worker {
    shared: Arc<Shared>,
    rows: HashMap<String, Entity>,
    query: Query,
}

impl Worker {
    async fn run(mut self, mut stream: ChangeStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Replace { query, initial, subscription, stream: replacement, done }) => {
                        // The old stream closes once its subscription is
                        // dropped; stop reading it first.
                        stream = replacement;
                        *self
                            .shared
                            .store_subscription
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);
                        self.replace(query, initial);
                        let _ = done.send(());
                    }
                    None => break,
                },
                event = stream.next() => match event {
                    Some(StoreEvent::Batch(batch)) => self.apply(&batch),
                    Some(StoreEvent::Barrier(ack)) => {
                        let _ = ack.send(());
                    }
                    None => break,
                },
            }
        }
        debug!("Live collection for '{}' stopped", self.query.entity_type());
    }

    fn apply(&mut self, batch: &ChangeBatch) {
        for change in &batch.changes {
            match change {
                EntityChange::Inserted(entity) | EntityChange::Updated { new: entity, .. } => {
                    if self.query.matches(entity) {
                        self.rows.insert(entity.id().to_string(), entity.clone());
                    } else {
                        self.rows.remove(entity.id());
                    }
                }
                EntityChange::Deleted(entity) => {
                    self.rows.remove(entity.id());
                }
            }
        }

        let next = self.build();
        let updates = diff(&self.shared.snapshot(), &next);
        if updates.is_empty() {
            return;
        }
        event!(
            Level::DEBUG,
            sequence = batch.sequence,
            updates = updates.len(),
            "collection updated"
        );
        self.shared.publish(next, updates);
    }

    fn replace(&mut self, query: Query, initial: Vec<Entity>) {
        self.query = query;
        self.rows = index_rows(initial);
        let next = self.build();
        self.shared.publish(next, vec![CollectionUpdate::Reload]);
    }

    fn build(&self) -> Sections {
        let mut entities: Vec<Entity> = self.rows.values().cloned().collect();
        self.query.comparator().sort(&mut entities);
        Sections::build(&self.query, entities)
    }
}
