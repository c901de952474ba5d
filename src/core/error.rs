use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by an entity store while applying a write batch or
/// evaluating a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

/// A single raw record could not be turned into an entity.
///
/// Decode errors are isolated to the record that produced them: the batch
/// carries on without it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{entity_type} record {} is missing required field '{field}'", .id.as_deref().unwrap_or("<unknown>"))]
    MissingField {
        entity_type: String,
        id: Option<String>,
        field: String,
    },

    #[error("{entity_type} record {} has invalid field '{field}': {reason}", .id.as_deref().unwrap_or("<unknown>"))]
    InvalidField {
        entity_type: String,
        id: Option<String>,
        field: String,
        reason: String,
    },

    #[error("{entity_type} record is not an object")]
    NotAnObject { entity_type: String },
}

impl DecodeError {
    pub fn missing(entity_type: &str, id: Option<&str>, field: &str) -> Self {
        Self::MissingField {
            entity_type: entity_type.to_string(),
            id: id.map(str::to_string),
            field: field.to_string(),
        }
    }

    pub fn invalid(entity_type: &str, id: Option<&str>, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            entity_type: entity_type.to_string(),
            id: id.map(str::to_string),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Id of the offending record, when the record got far enough to have one.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::MissingField { id, .. } | Self::InvalidField { id, .. } => id.as_deref(),
            Self::NotAnObject { .. } => None,
        }
    }
}

/// Opaque transport failure handed back by a remote fetch.
///
/// The wrapped error is passed through untouched; cloning only bumps a
/// reference count so one failure can be reported to every waiter.
#[derive(Clone)]
pub struct NetworkError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl NetworkError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::from(anyhow::Error::msg(message))
    }

    /// The transport error as produced by the fetch operation.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl From<anyhow::Error> for NetworkError {
    fn from(err: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
        Self(Arc::from(boxed))
    }
}

impl fmt::Debug for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NetworkError").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl PartialEq for NetworkError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.to_string() == other.0.to_string()
    }
}

/// Failure of a reconciliation run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("All {count} {entity_type} records failed to decode", count = .errors.len())]
    AllRecordsInvalid {
        entity_type: String,
        errors: Vec<DecodeError>,
    },

    #[error("Store write failed: {0}")]
    StoreWriteFailed(StoreError),

    #[error("Record '{id}' falls outside the full-replace scope")]
    RecordOutsideScope { id: String },

    #[error("Network error: {0}")]
    Network(NetworkError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        Self::StoreWriteFailed(err)
    }
}

impl From<NetworkError> for SyncError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}

/// Outcome reported to every caller attached to a failed refresh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Refresh timed out after {0} ms")]
    TimedOut(u64),

    #[error("Refresh cancelled")]
    Cancelled,
}

/// A configuration document that could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid refresh policy: {0}")]
    InvalidPolicy(#[from] serde_json::Error),
}

impl RefreshError {
    /// The network failure underneath this error, if that is what it is.
    pub fn network(&self) -> Option<&NetworkError> {
        match self {
            Self::Sync(SyncError::Network(err)) => Some(err),
            _ => None,
        }
    }
}
