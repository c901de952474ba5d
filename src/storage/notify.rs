// ============================================================================
// Store Observers
// ============================================================================
//
// Observers are registered with the query they present. After a batch
// commits, the store pushes it to every observer the batch touches, still
// under the store lock, so each observer sees batches in commit order.
//
// Observation ends when the subscription handle is dropped or cancelled.
// A handle that is leaked (mem::forget) keeps its slot forever; the slot is
// only reclaimed early if the receiving stream is dropped and a later
// batch finds the channel closed.
//
// ============================================================================

use super::change::ChangeBatch;
use crate::core::Result;
use crate::query::Query;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};

/// Message delivered to an observer.
#[derive(Debug)]
pub enum StoreEvent {
    Batch(Arc<ChangeBatch>),
    /// Acknowledged once every event queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

struct Observer {
    query: Query,
    sender: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    observers: HashMap<u64, Observer>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn register(&mut self, query: Query) -> (u64, mpsc::UnboundedSender<StoreEvent>, ChangeStream) {
        self.next_id += 1;
        let id = self.next_id;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers.insert(
            id,
            Observer {
                query,
                sender: sender.clone(),
            },
        );
        (id, sender, ChangeStream { receiver })
    }

    fn unregister(&mut self, id: u64) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Fans a committed batch out to the observers it touches.
    pub fn notify(&mut self, batch: &Arc<ChangeBatch>) {
        let mut closed = Vec::new();
        for (id, observer) in &self.observers {
            if !batch.touches(&observer.query) {
                continue;
            }
            if observer.sender.send(StoreEvent::Batch(Arc::clone(batch))).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            debug!("Pruning store observer {} with a closed stream", id);
            self.observers.remove(&id);
        }
    }
}

/// Shared handle to a registry, as held by a store.
#[derive(Clone, Default)]
pub struct SharedRegistry(Arc<Mutex<ObserverRegistry>>);

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, query: Query) -> Result<(StoreSubscription, ChangeStream)> {
        let (id, sender, stream) = self.0.lock()?.register(query);
        let subscription = StoreSubscription {
            id,
            registry: Arc::downgrade(&self.0),
            sender,
        };
        Ok((subscription, stream))
    }

    pub fn notify(&self, batch: &Arc<ChangeBatch>) -> Result<()> {
        self.0.lock()?.notify(batch);
        Ok(())
    }

    pub fn observer_count(&self) -> Result<usize> {
        Ok(self.0.lock()?.len())
    }
}

/// Registration handle. Dropping it unregisters the observer.
pub struct StoreSubscription {
    id: u64,
    registry: Weak<Mutex<ObserverRegistry>>,
    sender: mpsc::UnboundedSender<StoreEvent>,
}

impl StoreSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a barrier behind every batch already delivered to this
    /// observer. The receiver resolves once the consumer has handled them.
    pub fn barrier(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        // A closed stream drops the sender, which resolves the receiver with
        // an error the caller treats as "nothing left to wait for".
        let _ = self.sender.send(StoreEvent::Barrier(tx));
        rx
    }

    pub fn cancel(self) {}
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.lock() {
            Ok(mut registry) => {
                if registry.unregister(self.id) {
                    debug!("Store observer {} unsubscribed", self.id);
                }
            }
            Err(poisoned) => {
                poisoned.into_inner().unregister(self.id);
            }
        }
    }
}

/// Receiving end of an observation.
pub struct ChangeStream {
    receiver: mpsc::UnboundedReceiver<StoreEvent>,
}

impl ChangeStream {
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.receiver.try_recv().ok()
    }
}
