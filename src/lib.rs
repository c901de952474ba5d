// ============================================================================
// LiveSync Library
// ============================================================================
//
// Local entity cache for list and detail screens:
//
//   remote pages -> Synchronizer -> EntityStore -> LiveCollection -> screen
//                        ^
//                    Refresher (one in-flight refresh per cache key)
//
// ============================================================================

//! # Examples
//!
//! ```
//! use livesync::{Entity, EntityStore, InMemoryStore, LiveCollection, Query, SortDescriptor};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let courses = LiveCollection::new(
//!     store.clone(),
//!     Query::new("course").sort_by(SortDescriptor::asc("name")),
//! )
//! .await?;
//!
//! store.upsert(Entity::new("course", "1").with("name", "Biology")).await?;
//! courses.settle().await;
//! assert_eq!(courses.len(), 1);
//! # Ok::<(), livesync::StoreError>(())
//! # }).unwrap();
//! ```

pub mod collection;
pub mod config;
pub mod core;
pub mod observer;
pub mod presentation;
pub mod query;
pub mod refresh;
pub mod storage;
pub mod sync;

// Re-export main types for convenience
pub use collection::{Collection, CollectionUpdate, IndexPath, LiveCollection, Sections};
pub use config::{RefreshPolicy, StoreConfig};
pub use core::{
    ConfigError, DecodeError, Entity, NetworkError, RefreshError, Result, StoreError, SyncError, Value,
};
pub use observer::KeyedObserver;
pub use presentation::ListController;
pub use query::{CompareOp, NullOrdering, Predicate, Query, SortDescriptor};
pub use refresh::{CacheKey, RefreshOutcome, RefreshScope, RefreshStatus, Refresher, Session};
pub use storage::{EntitySchema, EntityStore, InMemoryStore, WriteBatch};
pub use sync::{
    FieldKind, JsonDecoder, Page, RecordDecoder, RemoteFetch, SyncJob, SyncMode, SyncReport,
    Synchronizer,
};
