/// Synchronizer tests
///
/// Reconciliation of remote listings into the store: idempotence, full
/// replace, paging and partial decode failures
/// Run with: cargo test --test sync_tests

use livesync::sync::from_pages;
use livesync::{
    CollectionUpdate, DecodeError, Entity, EntityStore, FieldKind, InMemoryStore, JsonDecoder,
    LiveCollection, NetworkError, Page, Predicate, Query, SortDescriptor, SyncError, SyncMode,
    Synchronizer,
};
use serde_json::{Value as Json, json};
use std::sync::Arc;

fn todo_decoder() -> JsonDecoder {
    JsonDecoder::new("todo")
        .required("title", FieldKind::Text)
        .optional("due_at", FieldKind::Timestamp)
        .constant("context_id", "course_1")
}

fn todos(ids: &[&str]) -> Vec<Json> {
    ids.iter()
        .map(|id| json!({"id": id, "title": format!("Todo {}", id)}))
        .collect()
}

fn course_scope() -> SyncMode {
    SyncMode::full_replace(Predicate::eq("context_id", "course_1"))
}

async fn stored_ids(store: &InMemoryStore) -> Vec<String> {
    let query = Query::new("todo").sort_by(SortDescriptor::asc("id"));
    store
        .query(&query)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id().to_string())
        .collect()
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    let records = todos(&["1", "2", "3"]);

    let first = sync
        .sync_records(&todo_decoder(), records.clone(), &course_scope())
        .await
        .unwrap();
    assert_eq!(first.inserted, 3);
    let sequence = store.sequence().await;
    let state = store.query(&Query::new("todo")).await.unwrap();

    let second = sync
        .sync_records(&todo_decoder(), records, &course_scope())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.unchanged, 3);
    // Nothing was committed, so observers saw nothing.
    assert_eq!(store.sequence().await, sequence);
    assert_eq!(store.query(&Query::new("todo")).await.unwrap(), state);
}

#[tokio::test]
async fn test_full_replace_deletes_missing() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    sync.sync_records(&todo_decoder(), todos(&["a", "b", "c"]), &course_scope())
        .await
        .unwrap();

    let query = Query::new("todo").sort_by(SortDescriptor::asc("id"));
    let collection = LiveCollection::new(store.clone(), query).await.unwrap();
    let mut updates = collection.subscribe();

    let report = sync
        .sync_records(&todo_decoder(), todos(&["a", "c"]), &course_scope())
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(stored_ids(&store).await, vec!["a", "c"]);

    collection.settle().await;
    let batch = updates.try_recv().unwrap();
    assert!(matches!(
        &batch[..],
        [CollectionUpdate::Deleted(path, entity)] if path.row == 1 && entity.id() == "b"
    ));
}

#[tokio::test]
async fn test_full_replace_leaves_other_scopes_alone() {
    let store = Arc::new(InMemoryStore::new());
    store
        .upsert(Entity::new("todo", "x").with("title", "Other").with("context_id", "course_2"))
        .await
        .unwrap();

    let sync = Synchronizer::new(store.clone());
    sync.sync_records(&todo_decoder(), todos(&["1"]), &course_scope())
        .await
        .unwrap();
    assert_eq!(stored_ids(&store).await, vec!["1", "x"]);
}

#[tokio::test]
async fn test_delta_never_deletes() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    sync.sync_records(&todo_decoder(), todos(&["1", "2"]), &SyncMode::Delta)
        .await
        .unwrap();
    sync.sync_records(&todo_decoder(), todos(&["3"]), &SyncMode::Delta)
        .await
        .unwrap();
    assert_eq!(stored_ids(&store).await, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_partial_decode_tolerance() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());

    let mut records = todos(&["1", "2", "3", "4", "5", "6", "7"]);
    records.push(json!({"id": "8"}));
    records.push(json!({"title": "no id"}));
    records.push(json!({"id": "10", "title": "Late", "due_at": "someday"}));

    let report = sync
        .sync_records(&todo_decoder(), records, &SyncMode::Delta)
        .await
        .unwrap();

    assert_eq!(report.received, 10);
    assert_eq!(report.inserted, 7);
    assert_eq!(report.decode_errors.len(), 3);
    assert!(matches!(report.decode_errors[0], DecodeError::MissingField { .. }));
    assert!(matches!(report.decode_errors[2], DecodeError::InvalidField { .. }));
    assert_eq!(store.count("todo", &Predicate::True).await.unwrap(), 7);
}

#[tokio::test]
async fn test_all_records_invalid() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    let err = sync
        .sync_records(&todo_decoder(), vec![json!({"id": "1"}), json!(42)], &SyncMode::Delta)
        .await
        .unwrap_err();
    match err {
        SyncError::AllRecordsInvalid { entity_type, errors } => {
            assert_eq!(entity_type, "todo");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_pages_commit_one_batch_each() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    sync.sync_records(&todo_decoder(), todos(&["old"]), &course_scope())
        .await
        .unwrap();
    let before = store.sequence().await;

    let pages = from_pages(vec![
        Ok(Page::more(todos(&["1", "2"]))),
        Ok(Page::more(todos(&["3"]))),
        Ok(Page::last(todos(&["4"]))),
    ]);
    let report = sync.sync(&todo_decoder(), pages, &course_scope()).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.inserted, 4);
    assert_eq!(report.deleted, 1);
    // The deletion rides in the last page's batch.
    assert_eq!(store.sequence().await, before + 3);
    assert_eq!(stored_ids(&store).await, vec!["1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_network_error_passes_through() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    let offline = NetworkError::msg("offline");
    let pages = from_pages(vec![Err(offline.clone())]);

    let err = sync.sync(&todo_decoder(), pages, &course_scope()).await.unwrap_err();
    assert_eq!(err, SyncError::Network(offline));
}

#[tokio::test]
async fn test_composite_uniqueness_updates_in_place() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    let decoder = JsonDecoder::new("rubric_assessment")
        .required("course_id", FieldKind::Text)
        .required("assignment_id", FieldKind::Text)
        .optional("score", FieldKind::Float)
        .unique_by(["course_id", "assignment_id"]);

    sync.sync_records(
        &decoder,
        vec![json!({"id": "r1", "course_id": "c", "assignment_id": "a", "score": 3.0})],
        &SyncMode::Delta,
    )
    .await
    .unwrap();
    let report = sync
        .sync_records(
            &decoder,
            vec![json!({"id": "r1", "course_id": "c", "assignment_id": "a", "score": 4.5})],
            &SyncMode::Delta,
        )
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(store.count("rubric_assessment", &Predicate::True).await.unwrap(), 1);
}

#[tokio::test]
async fn test_full_replace_keeps_listed_row_that_fails_to_decode() {
    let store = Arc::new(InMemoryStore::new());
    let sync = Synchronizer::new(store.clone());
    sync.sync_records(&todo_decoder(), todos(&["1", "2", "3"]), &course_scope())
        .await
        .unwrap();

    let records = vec![
        json!({"id": "1", "title": "a"}),
        json!({"id": "2"}),
        json!({"id": "3", "title": "c"}),
    ];
    let report = sync
        .sync_records(&todo_decoder(), records, &course_scope())
        .await
        .unwrap();

    assert_eq!(report.decode_errors.len(), 1);
    assert_eq!(report.deleted, 0);
    assert_eq!(stored_ids(&store).await, vec!["1", "2", "3"]);
    // The last good copy of the row stays.
    let two = store.get("todo", "2").await.unwrap().unwrap();
    assert_eq!(two.attribute("title"), "Todo 2".into());
}

#[tokio::test]
async fn test_missing_unique_key_does_not_claim_other_rows() {
    let store = Arc::new(InMemoryStore::new());
    store
        .upsert(Entity::new("todo", "5").with("title", "Old").with("is_read", true))
        .await
        .unwrap();

    let decoder = JsonDecoder::new("todo")
        .required("title", FieldKind::Text)
        .optional("client_ref", FieldKind::Text)
        .unique_by(["client_ref"]);
    let report = Synchronizer::new(store.clone())
        .sync_records(&decoder, vec![json!({"id": "9", "title": "New"})], &SyncMode::Delta)
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(stored_ids(&store).await, vec!["5", "9"]);
    let five = store.get("todo", "5").await.unwrap().unwrap();
    assert!(five.attribute("is_read").as_bool());
    let nine = store.get("todo", "9").await.unwrap().unwrap();
    assert!(nine.attribute("is_read").is_null());
}
