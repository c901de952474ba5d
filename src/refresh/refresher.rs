use super::cache_key::CacheKey;
use super::scope::RefreshScope;
use crate::config::RefreshPolicy;
use crate::core::RefreshError;
use crate::sync::{SyncOperation, SyncReport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the refresh for one cache key.
///
/// `Completed` and `Failed` are settled states: the key is idle again and
/// the next call to `refresh` may start a new cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Idle,
    Refreshing,
    Completed { at: DateTime<Utc> },
    Failed(RefreshError),
}

impl RefreshStatus {
    pub fn is_refreshing(&self) -> bool {
        matches!(self, Self::Refreshing)
    }

    pub fn error(&self) -> Option<&RefreshError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A sync ran (or was joined) and succeeded.
    Refreshed(Arc<SyncReport>),
    /// The key was fresh; nothing was fetched.
    Skipped,
}

impl RefreshOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Refreshed(report) => Some(report),
            Self::Skipped => None,
        }
    }
}

/// Single-flight refresh of one cache key.
///
/// Refreshers are cheap handles; any number of them may exist for the same
/// key in the same scope and they share one in-flight operation. Dropping
/// a refresher does not stop a refresh it started. Use [`Refresher::cancel`]
/// for that.
#[derive(Clone)]
pub struct Refresher {
    scope: RefreshScope,
    key: CacheKey,
    operation: Arc<dyn SyncOperation>,
    policy: RefreshPolicy,
}

impl Refresher {
    pub fn new(
        scope: RefreshScope,
        key: CacheKey,
        operation: Arc<dyn SyncOperation>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            scope,
            key,
            operation,
            policy,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn scope(&self) -> &RefreshScope {
        &self.scope
    }

    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, RefreshError> {
        self.scope
            .refresh(&self.key, &self.operation, &self.policy, force)
            .await
    }

    pub fn status(&self) -> RefreshStatus {
        self.scope.status(&self.key)
    }

    pub fn watch(&self) -> watch::Receiver<RefreshStatus> {
        self.scope.watch(&self.key)
    }

    pub fn is_refreshing(&self) -> bool {
        self.scope.is_refreshing(&self.key)
    }

    pub fn is_fresh(&self) -> bool {
        self.scope
            .is_fresh(&self.key, self.policy.freshness_window_duration())
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.scope.last_refreshed(&self.key)
    }

    /// Aborts the in-flight refresh for this key. Everyone attached to it
    /// receives `RefreshError::Cancelled`.
    pub fn cancel(&self) {
        self.scope.cancel(&self.key)
    }

    pub fn invalidate(&self) {
        self.scope.invalidate(&self.key)
    }
}
