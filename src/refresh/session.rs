use super::cache_key::CacheKey;
use super::refresher::Refresher;
use super::scope::RefreshScope;
use crate::config::RefreshPolicy;
use crate::storage::EntityStore;
use crate::sync::{RecordDecoder, RemoteFetch, SyncJob, SyncMode, Synchronizer};
use log::info;
use std::sync::Arc;

/// The store and refresh registry belonging to one signed-in user.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn EntityStore>,
    scope: RefreshScope,
    policy: RefreshPolicy,
}

impl Session {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::with_policy(store, RefreshPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn EntityStore>, policy: RefreshPolicy) -> Self {
        Self {
            store,
            scope: RefreshScope::new(),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn refresh_scope(&self) -> &RefreshScope {
        &self.scope
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(self.store.clone())
    }

    /// Refresher that fetches with `fetch`, decodes with `decoder` and
    /// reconciles under `mode`, deduplicated by `key` within this session.
    pub fn refresher(
        &self,
        key: CacheKey,
        decoder: Arc<dyn RecordDecoder>,
        fetch: Arc<dyn RemoteFetch>,
        mode: SyncMode,
    ) -> Refresher {
        let job = SyncJob::new(self.synchronizer(), decoder, fetch, mode);
        Refresher::new(self.scope.clone(), key, Arc::new(job), self.policy.clone())
    }

    /// Ends the session: in-flight refreshes are aborted and every cache
    /// key is forgotten.
    pub fn logout(&self) {
        info!("Session logout, invalidating {} cache keys", self.scope.len());
        self.scope.invalidate_all();
    }
}
