use super::decoder::RecordDecoder;
use super::remote::{Page, PageStream, RawRecord, RemoteFetch, from_pages};
use super::report::SyncReport;
use crate::core::{DecodeError, SyncError};
use crate::query::Predicate;
use crate::storage::{EntityStore, WriteBatch, WriteOp};
use futures::StreamExt;
use futures::future::BoxFuture;
use log::warn;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// How authoritative a listing is.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMode {
    /// Records are upserted; nothing is deleted.
    Delta,
    /// The listing is the complete contents of `scope`. Local rows inside
    /// `scope` that the listing does not mention are deleted once the last
    /// page has been applied. Every listed record must itself fall inside
    /// `scope`.
    FullReplace { scope: Predicate },
}

impl SyncMode {
    pub fn full_replace(scope: Predicate) -> Self {
        Self::FullReplace { scope }
    }

    pub fn is_full_replace(&self) -> bool {
        matches!(self, Self::FullReplace { .. })
    }
}

/// Reconciles remote listings into an entity store.
///
/// Each page is written as one atomic batch. Records are resolved against
/// local rows through the decoder's uniqueness predicate and merged so that
/// attributes absent from the decoder's output survive.
#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn EntityStore>,
}

struct RunState {
    report: SyncReport,
    seen: HashSet<String>,
    decoded: usize,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Reconcile a paged listing.
    pub async fn sync(
        &self,
        decoder: &dyn RecordDecoder,
        pages: PageStream,
        mode: &SyncMode,
    ) -> Result<SyncReport, SyncError> {
        let span = info_span!(
            "sync.run",
            entity_type = %decoder.entity_type(),
            full_replace = mode.is_full_replace()
        );
        self.run(decoder, pages, mode).instrument(span).await
    }

    /// Reconcile a listing that arrived in one piece.
    pub async fn sync_records(
        &self,
        decoder: &dyn RecordDecoder,
        records: Vec<RawRecord>,
        mode: &SyncMode,
    ) -> Result<SyncReport, SyncError> {
        self.sync(decoder, from_pages(vec![Ok(Page::last(records))]), mode)
            .await
    }

    async fn run(
        &self,
        decoder: &dyn RecordDecoder,
        mut pages: PageStream,
        mode: &SyncMode,
    ) -> Result<SyncReport, SyncError> {
        let mut state = RunState {
            report: SyncReport::new(decoder.entity_type()),
            seen: HashSet::new(),
            decoded: 0,
        };
        event!(Level::DEBUG, "sync started");

        let mut finished = false;
        while let Some(page) = pages.next().await {
            let page = page.inspect_err(|err| {
                event!(Level::WARN, error = %err, "sync fetch failed");
            })?;
            state.report.pages += 1;
            state.report.received += page.records.len();

            let mut batch = WriteBatch::new();
            for raw in &page.records {
                self.stage_record(decoder, raw, mode, &mut batch, &mut state)?;
            }

            finished = page.is_last_page;
            if finished && let Some(op) = deletion(decoder, mode, &state)? {
                batch.push(op);
            }
            self.commit(batch, &mut state).await?;
            if finished {
                break;
            }
        }

        if !finished {
            // Stream ended without flagging its last page.
            let mut batch = WriteBatch::new();
            if let Some(op) = deletion(decoder, mode, &state)? {
                batch.push(op);
            }
            self.commit(batch, &mut state).await?;
        }

        let report = state.report;
        event!(
            Level::INFO,
            received = report.received,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            decode_errors = report.decode_errors.len(),
            "sync finished"
        );
        Ok(report)
    }

    fn stage_record(
        &self,
        decoder: &dyn RecordDecoder,
        raw: &RawRecord,
        mode: &SyncMode,
        batch: &mut WriteBatch,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        let entity = match decoder.decode(raw) {
            Ok(entity) => entity,
            Err(err) => {
                log_decode_error(&err);
                // Still listed by the server, so not a candidate for deletion.
                if let Some(id) = err.record_id() {
                    state.seen.insert(id.to_string());
                }
                state.report.decode_errors.push(err);
                return Ok(());
            }
        };

        if let SyncMode::FullReplace { scope } = mode
            && !scope.evaluate(&entity)
        {
            event!(Level::ERROR, id = %entity.id(), "record outside full-replace scope");
            return Err(SyncError::RecordOutsideScope {
                id: entity.id().to_string(),
            });
        }

        state.decoded += 1;
        state.seen.insert(entity.id().to_string());
        batch.push(WriteOp::Merge {
            unique: decoder.uniqueness(raw),
            entity,
        });
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch, state: &mut RunState) -> Result<(), SyncError> {
        if batch.is_empty() {
            return Ok(());
        }
        let outcome = self.store.apply(batch).await.inspect_err(|err| {
            event!(Level::ERROR, error = %err, "sync store write failed");
        })?;
        state.report.absorb(&outcome);
        Ok(())
    }
}

/// Deletion of unlisted rows, once the listing is known to be complete.
fn deletion(
    decoder: &dyn RecordDecoder,
    mode: &SyncMode,
    state: &RunState,
) -> Result<Option<WriteOp>, SyncError> {
    if state.report.received > 0 && state.decoded == 0 {
        return Err(SyncError::AllRecordsInvalid {
            entity_type: decoder.entity_type().to_string(),
            errors: state.report.decode_errors.clone(),
        });
    }
    Ok(match mode {
        SyncMode::Delta => None,
        SyncMode::FullReplace { scope } => Some(WriteOp::DeleteMissing {
            entity_type: decoder.entity_type().to_string(),
            scope: scope.clone(),
            keep: state.seen.clone(),
        }),
    })
}

fn log_decode_error(err: &DecodeError) {
    match err.record_id() {
        Some(id) => warn!("Skipping {} record '{}': {}", entity_type_of(err), id, err),
        None => warn!("Skipping {} record: {}", entity_type_of(err), err),
    }
}

fn entity_type_of(err: &DecodeError) -> &str {
    match err {
        DecodeError::MissingField { entity_type, .. }
        | DecodeError::InvalidField { entity_type, .. }
        | DecodeError::NotAnObject { entity_type } => entity_type,
    }
}

/// A repeatable synchronization, as driven by a refresher.
pub trait SyncOperation: Send + Sync + 'static {
    fn run(&self) -> BoxFuture<'static, Result<SyncReport, SyncError>>;
}

/// Fetch, decode and reconcile one entity type under a fixed mode.
#[derive(Clone)]
pub struct SyncJob {
    synchronizer: Synchronizer,
    decoder: Arc<dyn RecordDecoder>,
    fetch: Arc<dyn RemoteFetch>,
    mode: SyncMode,
}

impl SyncJob {
    pub fn new(
        synchronizer: Synchronizer,
        decoder: Arc<dyn RecordDecoder>,
        fetch: Arc<dyn RemoteFetch>,
        mode: SyncMode,
    ) -> Self {
        Self {
            synchronizer,
            decoder,
            fetch,
            mode,
        }
    }

    pub fn mode(&self) -> &SyncMode {
        &self.mode
    }
}

impl SyncOperation for SyncJob {
    fn run(&self) -> BoxFuture<'static, Result<SyncReport, SyncError>> {
        let job = self.clone();
        Box::pin(async move {
            let pages = job.fetch.fetch();
            job.synchronizer
                .sync(job.decoder.as_ref(), pages, &job.mode)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Entity, NetworkError, Value};
    use crate::storage::InMemoryStore;
    use crate::sync::{FieldKind, JsonDecoder};
    use serde_json::json;

    fn todo_decoder() -> JsonDecoder {
        JsonDecoder::new("todo")
            .required("title", FieldKind::Text)
            .optional("context_id", FieldKind::Text)
    }

    fn setup() -> (Arc<InMemoryStore>, Synchronizer) {
        let store = Arc::new(InMemoryStore::new());
        let synchronizer = Synchronizer::new(store.clone());
        (store, synchronizer)
    }

    #[tokio::test]
    async fn test_merge_preserves_local_fields() {
        let (store, sync) = setup();
        store
            .upsert(Entity::new("todo", "1").with("title", "Old").with("is_read", true))
            .await
            .unwrap();

        let report = sync
            .sync_records(&todo_decoder(), vec![json!({"id": "1", "title": "New"})], &SyncMode::Delta)
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let todo = store.get("todo", "1").await.unwrap().unwrap();
        assert_eq!(todo.attribute("title"), Value::from("New"));
        assert_eq!(todo.attribute("is_read"), Value::Boolean(true));
    }

    #[tokio::test]
    async fn test_all_invalid_fails_without_deleting() {
        let (store, sync) = setup();
        store.upsert(Entity::new("todo", "1").with("title", "Keep")).await.unwrap();

        let err = sync
            .sync_records(
                &todo_decoder(),
                vec![json!({"id": "2"}), json!("garbage")],
                &SyncMode::full_replace(Predicate::True),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AllRecordsInvalid { ref errors, .. } if errors.len() == 2));
        assert!(store.get("todo", "1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_full_replace_clears_scope() {
        let (store, sync) = setup();
        store
            .upsert(Entity::new("todo", "1").with("title", "a").with("context_id", "c1"))
            .await
            .unwrap();
        store
            .upsert(Entity::new("todo", "2").with("title", "b").with("context_id", "c2"))
            .await
            .unwrap();

        let report = sync
            .sync_records(
                &todo_decoder(),
                vec![],
                &SyncMode::full_replace(Predicate::eq("context_id", "c1")),
            )
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get("todo", "2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_outside_scope_is_rejected() {
        let (store, sync) = setup();
        store
            .upsert(Entity::new("todo", "1").with("title", "a").with("context_id", "c1"))
            .await
            .unwrap();

        let err = sync
            .sync_records(
                &todo_decoder(),
                vec![json!({"id": "9", "title": "x", "context_id": "c2"})],
                &SyncMode::full_replace(Predicate::eq("context_id", "c1")),
            )
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::RecordOutsideScope { id: "9".into() });
        assert!(store.get("todo", "1").await.unwrap().is_some());
        assert!(store.get("todo", "9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_error_after_first_page_keeps_progress() {
        let (store, sync) = setup();
        let pages = from_pages(vec![
            Ok(Page::more(vec![json!({"id": "1", "title": "a"})])),
            Err(NetworkError::msg("connection reset")),
        ]);
        let err = sync
            .sync(&todo_decoder(), pages, &SyncMode::full_replace(Predicate::True))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(store.get("todo", "1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_entity_adopts_server_id() {
        let (store, sync) = setup();
        let pending = Entity::pending("todo").with("title", "Draft").with("client_ref", "abc");
        store.upsert(pending.clone()).await.unwrap();

        let decoder = todo_decoder().optional("client_ref", FieldKind::Text).unique_by(["client_ref"]);
        sync.sync_records(
            &decoder,
            vec![json!({"id": "77", "title": "Draft", "client_ref": "abc"})],
            &SyncMode::Delta,
        )
        .await
        .unwrap();

        assert!(store.get("todo", pending.id()).await.unwrap().is_none());
        assert!(store.get("todo", "77").await.unwrap().is_some());
    }
}
