/// Live collection tests
///
/// Sorted and sectioned projections of the store, update batches and
/// subscription lifetime
/// Run with: cargo test --test live_collection_tests

use livesync::{
    Collection, CollectionUpdate, Entity, EntityStore, FieldKind, InMemoryStore, IndexPath,
    JsonDecoder, LiveCollection, Predicate, Query, SortDescriptor, SyncMode, Synchronizer,
    WriteBatch,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn ids(collection: &LiveCollection) -> Vec<String> {
    collection
        .entities()
        .iter()
        .map(|entity| entity.id().to_string())
        .collect()
}

fn by_position() -> Query {
    Query::new("todo").sort_by(SortDescriptor::asc("position"))
}

#[tokio::test]
async fn test_rows_follow_sort_order() {
    let store = Arc::new(InMemoryStore::new());
    let query = Query::new("course")
        .sort_by(SortDescriptor::asc("name"))
        .sort_by(SortDescriptor::asc("id"));
    let courses = LiveCollection::new(store.clone(), query).await.unwrap();
    assert!(courses.is_empty());
    assert_eq!(courses.number_of_sections(), 1);

    store.upsert(Entity::new("course", "2").with("name", "B")).await.unwrap();
    store.upsert(Entity::new("course", "1").with("name", "A")).await.unwrap();
    store.upsert(Entity::new("course", "3").with("name", "B")).await.unwrap();
    courses.settle().await;

    assert_eq!(ids(&courses), vec!["1", "2", "3"]);
    assert_eq!(courses.index_path_of("3"), Some(IndexPath::new(0, 2)));
    assert_eq!(courses.get(IndexPath::new(0, 0)).map(|e| e.id().to_string()), Some("1".into()));
}

#[tokio::test]
async fn test_swap_emits_move_pair() {
    let store = Arc::new(InMemoryStore::new());
    store
        .apply(
            WriteBatch::new()
                .upsert(Entity::new("todo", "a").with("position", 1))
                .upsert(Entity::new("todo", "b").with("position", 2)),
        )
        .await
        .unwrap();
    let todos = LiveCollection::new(store.clone(), by_position()).await.unwrap();
    let mut updates = todos.subscribe();

    store
        .apply(
            WriteBatch::new()
                .upsert(Entity::new("todo", "a").with("position", 2))
                .upsert(Entity::new("todo", "b").with("position", 1)),
        )
        .await
        .unwrap();
    todos.settle().await;

    let batch = updates.try_recv().unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|update| matches!(update, CollectionUpdate::Moved(..))));
    assert_eq!(ids(&todos), vec!["b", "a"]);
}

#[tokio::test]
async fn test_one_batch_one_update_delivery() {
    let store = Arc::new(InMemoryStore::new());
    let todos = LiveCollection::new(store.clone(), by_position()).await.unwrap();
    let mut updates = todos.subscribe();

    store
        .apply(
            WriteBatch::new()
                .upsert(Entity::new("todo", "1").with("position", 1))
                .upsert(Entity::new("todo", "2").with("position", 2))
                .upsert(Entity::new("todo", "3").with("position", 3)),
        )
        .await
        .unwrap();
    todos.settle().await;

    let batch = updates.try_recv().unwrap();
    assert_eq!(batch.len(), 3);
    assert!(batch.iter().all(|update| matches!(update, CollectionUpdate::Inserted(..))));
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_row_leaving_filter_is_deleted() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(Entity::new("todo", "1").with("done", false)).await.unwrap();
    let open = LiveCollection::new(
        store.clone(),
        Query::new("todo").filter(Predicate::eq("done", false)),
    )
    .await
    .unwrap();
    let mut updates = open.subscribe();

    store.upsert(Entity::new("todo", "1").with("done", true)).await.unwrap();
    open.settle().await;

    let batch = updates.try_recv().unwrap();
    assert!(matches!(&batch[..], [CollectionUpdate::Deleted(path, _)] if *path == IndexPath::new(0, 0)));
    assert!(open.is_empty());
}

#[tokio::test]
async fn test_unrelated_writes_are_not_delivered() {
    let store = Arc::new(InMemoryStore::new());
    let todos = LiveCollection::new(store.clone(), by_position()).await.unwrap();
    let mut updates = todos.subscribe();

    store.upsert(Entity::new("course", "1")).await.unwrap();
    todos.settle().await;
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_sections_and_titles() {
    let store = Arc::new(InMemoryStore::new());
    let batch = WriteBatch::new()
        .upsert(Entity::new("course", "1").with("term", "Fall").with("name", "Biology"))
        .upsert(Entity::new("course", "2").with("term", "Spring").with("name", "Algebra"))
        .upsert(Entity::new("course", "3").with("term", "Fall").with("name", "Art"));
    store.apply(batch).await.unwrap();

    let query = Query::new("course")
        .sort_by(SortDescriptor::asc("term"))
        .sort_by(SortDescriptor::asc("name"))
        .sectioned_by("term")
        .section_titles(|key| key.map(|term| format!("{} term", term)));
    let courses = LiveCollection::new(store.clone(), query).await.unwrap();

    assert_eq!(courses.number_of_sections(), 2);
    assert_eq!(courses.number_of_items_in_section(0), 2);
    assert_eq!(courses.number_of_items_in_section(1), 1);
    assert_eq!(courses.title_for_section(0).as_deref(), Some("Fall term"));
    assert_eq!(courses.title_for_section(1).as_deref(), Some("Spring term"));
    assert_eq!(courses.index_path_of("2"), Some(IndexPath::new(1, 0)));

    let mut updates = courses.subscribe();
    store
        .upsert(Entity::new("course", "4").with("term", "Winter").with("name", "Chemistry"))
        .await
        .unwrap();
    courses.settle().await;
    let batch = updates.try_recv().unwrap();
    assert!(batch.contains(&CollectionUpdate::SectionInserted(2)));
    assert_eq!(courses.number_of_sections(), 3);
}

#[tokio::test]
async fn test_set_query_emits_single_reload() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(Entity::new("todo", "1").with("done", false)).await.unwrap();
    store.upsert(Entity::new("todo", "2").with("done", true)).await.unwrap();

    let todos = LiveCollection::new(store.clone(), Query::new("todo")).await.unwrap();
    assert_eq!(todos.len(), 2);
    let mut updates = todos.subscribe();

    todos
        .set_query(Query::new("todo").filter(Predicate::eq("done", true)))
        .await
        .unwrap();
    let batch = updates.try_recv().unwrap();
    assert_eq!(&batch[..], &[CollectionUpdate::Reload]);
    assert_eq!(ids(&todos), vec!["2"]);

    // The replacement query keeps receiving writes.
    store.upsert(Entity::new("todo", "3").with("done", true)).await.unwrap();
    store.upsert(Entity::new("todo", "4").with("done", false)).await.unwrap();
    todos.settle().await;
    assert_eq!(ids(&todos), vec!["2", "3"]);
}

#[tokio::test]
async fn test_dropped_subscription_gets_no_callbacks() {
    let store = Arc::new(InMemoryStore::new());
    let todos = LiveCollection::new(store.clone(), Query::new("todo")).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let subscription = todos.on_updates(move |updates| {
        counter.fetch_add(updates.len(), Ordering::SeqCst);
    });
    store.upsert(Entity::new("todo", "1")).await.unwrap();
    todos.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    subscription.cancel();
    store.upsert(Entity::new("todo", "2")).await.unwrap();
    todos.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(todos.len(), 2);
}

#[tokio::test]
async fn test_observe_with_returns_base_snapshot() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(Entity::new("todo", "1")).await.unwrap();
    let todos = LiveCollection::new(store.clone(), Query::new("todo")).await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let (snapshot, _subscription) = todos.observe_with(move |updates| {
        counter.fetch_add(updates.len(), Ordering::SeqCst);
    });
    assert_eq!(snapshot.row_count(), 1);

    store.upsert(Entity::new("todo", "2")).await.unwrap();
    todos.settle().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_count_watch_follows_rows() {
    let store = Arc::new(InMemoryStore::new());
    let todos = LiveCollection::new(store.clone(), Query::new("todo")).await.unwrap();
    let count = todos.count();
    assert_eq!(*count.borrow(), 0);

    let first = Entity::new("todo", "1");
    store.upsert(first.clone()).await.unwrap();
    store.upsert(Entity::new("todo", "2")).await.unwrap();
    todos.settle().await;
    assert_eq!(*count.borrow(), 2);

    store.delete(&first).await.unwrap();
    todos.settle().await;
    assert_eq!(*count.borrow(), 1);
}

#[tokio::test]
async fn test_pending_row_replaced_by_server_copy() {
    let store = Arc::new(InMemoryStore::new());
    let pending = Entity::pending("todo").with("title", "Draft").with("client_ref", "abc");
    store.upsert(pending.clone()).await.unwrap();

    let todos = LiveCollection::new(
        store.clone(),
        Query::new("todo").sort_by(SortDescriptor::asc("title")),
    )
    .await
    .unwrap();
    let mut updates = todos.subscribe();

    let decoder = JsonDecoder::new("todo")
        .required("title", FieldKind::Text)
        .optional("client_ref", FieldKind::Text)
        .unique_by(["client_ref"]);
    Synchronizer::new(store.clone())
        .sync_records(
            &decoder,
            vec![json!({"id": "77", "title": "Draft", "client_ref": "abc"})],
            &SyncMode::Delta,
        )
        .await
        .unwrap();
    todos.settle().await;

    let batch = updates.try_recv().unwrap();
    assert!(batch.iter().any(
        |update| matches!(update, CollectionUpdate::Deleted(_, entity) if entity.id() == pending.id())
    ));
    assert!(batch.iter().any(
        |update| matches!(update, CollectionUpdate::Inserted(_, entity) if entity.id() == "77")
    ));
    assert_eq!(ids(&todos), vec!["77"]);
}
