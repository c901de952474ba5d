use super::cache_key::CacheKey;
use super::refresher::{RefreshOutcome, RefreshStatus};
use crate::config::RefreshPolicy;
use crate::core::RefreshError;
use crate::sync::{SyncOperation, SyncReport};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{Instrument, Level, event, info_span};

type RefreshResult = Result<Arc<SyncReport>, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    op_id: u64,
    future: SharedRefresh,
    abort: AbortHandle,
}

struct KeyState {
    in_flight: Option<InFlight>,
    last_completed: Option<(Instant, DateTime<Utc>)>,
    status: watch::Sender<RefreshStatus>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            in_flight: None,
            last_completed: None,
            status: watch::channel(RefreshStatus::Idle).0,
        }
    }

    fn is_fresh(&self, window: Duration) -> bool {
        self.last_completed
            .is_some_and(|(at, _)| at.elapsed() < window)
    }

    /// Aborts the in-flight operation and returns its future, which
    /// resolves once the task has stopped. Waiters on an aborted operation
    /// resolve with `RefreshError::Cancelled`.
    fn abort(&mut self) -> Option<SharedRefresh> {
        let in_flight = self.in_flight.take()?;
        in_flight.abort.abort();
        self.status
            .send_replace(RefreshStatus::Failed(RefreshError::Cancelled));
        Some(in_flight.future)
    }

    /// Drops the in-flight operation and the freshness marker.
    fn reset(&mut self) -> Option<SharedRefresh> {
        self.last_completed = None;
        let aborted = self.abort();
        if aborted.is_none() {
            self.status.send_replace(RefreshStatus::Idle);
        }
        aborted
    }
}

#[derive(Default)]
struct Registry {
    keys: HashMap<CacheKey, KeyState>,
    /// Aborted operations whose task may still be inside a store write.
    draining: HashMap<CacheKey, SharedRefresh>,
}

impl Registry {
    fn drain(&mut self, key: &CacheKey, future: SharedRefresh) {
        self.draining.retain(|_, pending| pending.peek().is_none());
        self.draining.insert(key.clone(), future);
    }
}

#[derive(Default)]
struct ScopeInner {
    next_op: AtomicU64,
    registry: Mutex<Registry>,
}

impl ScopeInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Every critical section leaves the registry consistent, so a
        // poisoned lock is still usable.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, key: &CacheKey, op_id: u64, result: &RefreshResult) {
        let mut registry = self.lock();
        let Some(state) = registry.keys.get_mut(key) else {
            return;
        };
        if !state.in_flight.as_ref().is_some_and(|f| f.op_id == op_id) {
            // Invalidated while running.
            return;
        }
        state.in_flight = None;
        match result {
            Ok(_) => {
                let at = Utc::now();
                state.last_completed = Some((Instant::now(), at));
                state.status.send_replace(RefreshStatus::Completed { at });
            }
            Err(err) => {
                state.status.send_replace(RefreshStatus::Failed(err.clone()));
            }
        }
    }
}

enum Step {
    Join(SharedRefresh),
    WaitThenRetry(SharedRefresh),
    Drain(SharedRefresh),
    Skip,
}

/// Registry of refresh operations keyed by cache key.
///
/// Holds at most one in-flight operation per key plus the time of the last
/// successful one. Cloning yields another handle to the same registry; a
/// session owns one and hands it to every refresher it builds.
#[derive(Clone, Default)]
pub struct RefreshScope {
    inner: Arc<ScopeInner>,
}

impl RefreshScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` for `key` unless an equivalent refresh makes it
    /// unnecessary.
    ///
    /// * A refresh already in flight is joined and its result shared.
    /// * Without `force`, a key refreshed successfully within the policy's
    ///   freshness window is skipped.
    /// * With `force`, an operation that started before this call is awaited
    ///   first and a new one is started after it.
    /// * Nothing starts while a cancelled operation of the key is still
    ///   winding down.
    pub async fn refresh(
        &self,
        key: &CacheKey,
        operation: &Arc<dyn SyncOperation>,
        policy: &RefreshPolicy,
        force: bool,
    ) -> Result<RefreshOutcome, RefreshError> {
        let span = info_span!("refresh", cache_key = %key, force);
        self.run_refresh(key, operation, policy, force)
            .instrument(span)
            .await
    }

    async fn run_refresh(
        &self,
        key: &CacheKey,
        operation: &Arc<dyn SyncOperation>,
        policy: &RefreshPolicy,
        force: bool,
    ) -> Result<RefreshOutcome, RefreshError> {
        // Operations numbered from here on started after this call.
        let threshold = self.inner.next_op.load(Ordering::SeqCst);
        loop {
            let step = {
                let mut registry = self.inner.lock();
                let draining = registry
                    .draining
                    .remove(key)
                    .filter(|draining| draining.peek().is_none());
                match draining {
                    Some(draining) => {
                        registry.draining.insert(key.clone(), draining.clone());
                        Step::Drain(draining)
                    }
                    None => {
                        let state = registry.keys.entry(key.clone()).or_insert_with(KeyState::new);
                        let running = state
                            .in_flight
                            .as_ref()
                            .map(|in_flight| (in_flight.op_id, in_flight.future.clone()));
                        match running {
                            Some((op_id, future)) if !force || op_id >= threshold => {
                                event!(Level::DEBUG, op_id, "joining in-flight refresh");
                                Step::Join(future)
                            }
                            Some((_, future)) => Step::WaitThenRetry(future),
                            None if !force && state.is_fresh(policy.freshness_window_duration()) => {
                                Step::Skip
                            }
                            None => Step::Join(self.start(key, state, operation, policy)),
                        }
                    }
                }
            };

            match step {
                Step::Join(future) => return future.await.map(RefreshOutcome::Refreshed),
                Step::WaitThenRetry(future) => {
                    event!(Level::DEBUG, "forced refresh waiting for in-flight refresh");
                    let _ = future.await;
                }
                Step::Drain(future) => {
                    event!(Level::DEBUG, "waiting for cancelled refresh to stop");
                    let _ = future.await;
                }
                Step::Skip => {
                    event!(Level::DEBUG, "refresh skipped, data is fresh");
                    return Ok(RefreshOutcome::Skipped);
                }
            }
        }
    }

    fn start(
        &self,
        key: &CacheKey,
        state: &mut KeyState,
        operation: &Arc<dyn SyncOperation>,
        policy: &RefreshPolicy,
    ) -> SharedRefresh {
        let op_id = self.inner.next_op.fetch_add(1, Ordering::SeqCst);
        let scope: Weak<ScopeInner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let timeout = policy.timeout_ms;
        let sync = operation.run();
        event!(Level::INFO, op_id, "refresh started");

        let task = tokio::spawn(
            async move {
                let result = match timeout {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), sync).await {
                        Ok(result) => result.map_err(RefreshError::from),
                        Err(_) => Err(RefreshError::TimedOut(ms)),
                    },
                    None => sync.await.map_err(RefreshError::from),
                };
                let result = result.map(Arc::new);
                match &result {
                    Ok(report) => event!(
                        Level::INFO,
                        inserted = report.inserted,
                        updated = report.updated,
                        deleted = report.deleted,
                        "refresh completed"
                    ),
                    Err(err) => event!(Level::WARN, error = %err, "refresh failed"),
                }
                if let Some(scope) = scope.upgrade() {
                    scope.finish(&task_key, op_id, &result);
                }
                result
            }
            .in_current_span(),
        );

        let abort = task.abort_handle();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Cancelled),
            }
        }
        .boxed()
        .shared();

        state.status.send_replace(RefreshStatus::Refreshing);
        state.in_flight = Some(InFlight {
            op_id,
            future: future.clone(),
            abort,
        });
        future
    }

    pub fn status(&self, key: &CacheKey) -> RefreshStatus {
        self.inner
            .lock()
            .keys
            .get(key)
            .map_or(RefreshStatus::Idle, |state| state.status.borrow().clone())
    }

    /// Status updates for `key`. The receiver stays valid across
    /// invalidations.
    pub fn watch(&self, key: &CacheKey) -> watch::Receiver<RefreshStatus> {
        self.inner
            .lock()
            .keys
            .entry(key.clone())
            .or_insert_with(KeyState::new)
            .status
            .subscribe()
    }

    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .keys
            .get(key)
            .is_some_and(|state| state.in_flight.is_some())
    }

    pub fn is_fresh(&self, key: &CacheKey, window: Duration) -> bool {
        self.inner
            .lock()
            .keys
            .get(key)
            .is_some_and(|state| state.is_fresh(window))
    }

    pub fn last_refreshed(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .keys
            .get(key)
            .and_then(|state| state.last_completed.map(|(_, at)| at))
    }

    /// Aborts the in-flight refresh of `key`, if any. Its freshness marker
    /// is kept.
    pub fn cancel(&self, key: &CacheKey) {
        let mut registry = self.inner.lock();
        let aborted = registry.keys.get_mut(key).and_then(KeyState::abort);
        if let Some(future) = aborted {
            registry.drain(key, future);
            event!(Level::INFO, cache_key = %key, "refresh cancelled");
        }
    }

    /// Forgets everything known about `key`; the next refresh fetches.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut registry = self.inner.lock();
        let aborted = registry.keys.get_mut(key).and_then(KeyState::reset);
        if let Some(future) = aborted {
            registry.drain(key, future);
        }
    }

    /// Forgets every key, aborting in-flight refreshes. Keys nobody watches
    /// are dropped from the registry.
    pub fn invalidate_all(&self) {
        let mut registry = self.inner.lock();
        let count = registry.keys.len();
        let aborted: Vec<(CacheKey, SharedRefresh)> = registry
            .keys
            .iter_mut()
            .filter_map(|(key, state)| state.reset().map(|future| (key.clone(), future)))
            .collect();
        for (key, future) in aborted {
            registry.drain(&key, future);
        }
        registry
            .keys
            .retain(|_, state| state.status.receiver_count() > 0);
        event!(Level::INFO, keys = count, "refresh scope invalidated");
    }

    /// Number of keys the registry currently tracks.
    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
