/// List controller tests
///
/// View models over a live collection and refreshing through the session
/// Run with: cargo test --test list_controller_tests

use livesync::sync::{PageStream, from_pages};
use livesync::{
    CacheKey, Entity, EntityStore, FieldKind, InMemoryStore, IndexPath, JsonDecoder,
    ListController, LiveCollection, Page, Predicate, Query, RefreshOutcome, RefreshStatus,
    Session, SortDescriptor, SyncMode,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct TodoRow {
    title: String,
    done: bool,
}

fn todo_row(entity: &Entity) -> TodoRow {
    TodoRow {
        title: entity.attribute("title").to_string(),
        done: entity.attribute("done").as_bool(),
    }
}

fn by_title() -> Query {
    Query::new("todo").sort_by(SortDescriptor::asc("title"))
}

fn listing() -> PageStream {
    from_pages(vec![Ok(Page::last(vec![
        json!({"id": "1", "title": "Read chapter 3", "done": false}),
        json!({"id": "2", "title": "Essay", "done": true}),
    ]))])
}

#[tokio::test]
async fn test_view_models_follow_collection() {
    let store = Arc::new(InMemoryStore::new());
    store
        .upsert(Entity::new("todo", "1").with("title", "Quiz").with("done", true))
        .await
        .unwrap();
    let collection = Arc::new(LiveCollection::new(store.clone(), by_title()).await.unwrap());
    let controller = ListController::prepare(collection.clone(), None, todo_row);

    assert_eq!(controller.number_of_sections(), 1);
    assert_eq!(controller.number_of_items_in_section(0), 1);
    assert_eq!(controller.title_for_section(0), None);
    assert_eq!(
        controller.view_model(IndexPath::new(0, 0)),
        Some(TodoRow { title: "Quiz".into(), done: true })
    );
    assert_eq!(controller.view_model(IndexPath::new(0, 1)), None);

    let mut updates = controller.updates();
    store.upsert(Entity::new("todo", "2").with("title", "Essay")).await.unwrap();
    collection.settle().await;

    assert_eq!(updates.try_recv().unwrap().len(), 1);
    let titles: Vec<String> = controller.view_models()[0].iter().map(|row| row.title.clone()).collect();
    assert_eq!(titles, vec!["Essay", "Quiz"]);
}

#[tokio::test]
async fn test_refresh_without_refresher_is_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let collection = Arc::new(LiveCollection::new(store, by_title()).await.unwrap());
    let controller = ListController::prepare(collection, None, todo_row);

    assert_eq!(controller.refresh(true).await, Ok(RefreshOutcome::Skipped));
    assert!(controller.refresh_status().is_none());
}

#[tokio::test]
async fn test_refresh_fills_the_list() {
    let store = Arc::new(InMemoryStore::new());
    let session = Session::new(store.clone());
    let decoder = JsonDecoder::new("todo")
        .required("title", FieldKind::Text)
        .optional("done", FieldKind::Boolean)
        .constant("context_id", "course_1");
    let refresher = session.refresher(
        CacheKey::new("todo", ["course_1"]),
        Arc::new(decoder),
        Arc::new(listing),
        SyncMode::full_replace(Predicate::eq("context_id", "course_1")),
    );

    let collection = Arc::new(LiveCollection::new(store, by_title()).await.unwrap());
    let controller = ListController::prepare(collection.clone(), Some(refresher), todo_row);
    let status = controller.refresh_status().unwrap();
    assert_eq!(*status.borrow(), RefreshStatus::Idle);

    let outcome = controller.refresh_if_stale().await.unwrap();
    assert_eq!(outcome.report().map(|report| report.inserted), Some(2));
    assert!(matches!(*status.borrow(), RefreshStatus::Completed { .. }));
    assert_eq!(controller.refresh_if_stale().await, Ok(RefreshOutcome::Skipped));

    collection.settle().await;
    assert_eq!(
        controller.view_models(),
        vec![vec![
            TodoRow { title: "Essay".into(), done: true },
            TodoRow { title: "Read chapter 3".into(), done: false },
        ]]
    );
}
