//! Memory engine lifecycle: store/recall round trips, retention
//! classification, time-decayed scoring, and TTL sweeping.

use chrono::{Duration, Utc};
use memoria_core::{
    CatalogRow, DocumentType, InferenceContext, MemoryDraft, MemoryFilters, RetentionType,
};
use memoria_e2e_tests::harness::TestWorld;

#[tokio::test]
async fn store_then_get_round_trips() {
    let world = TestWorld::new();
    let id = world
        .memory
        .store(MemoryDraft::new("the reranker threshold works best at five candidates").with_importance(0.8))
        .await
        .unwrap();

    let item = world.memory.get(&id).await.unwrap().unwrap();
    assert_eq!(
        item.content,
        "the reranker threshold works best at five candidates"
    );
    assert_eq!(item.importance, 0.8);

    // Catalog row carries the vector presence flag.
    let row = world.catalog.fetch(&id).unwrap().unwrap();
    assert!(row.stored_in_vector);
    assert!(world.vector.contains(&id));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let world = TestWorld::new();
    let id = world
        .memory
        .store(MemoryDraft::new("short-lived note"))
        .await
        .unwrap();

    assert!(world.memory.delete(&id).await.unwrap());
    assert!(world.memory.get(&id).await.unwrap().is_none());
    // Second delete reports false without erroring.
    assert!(!world.memory.delete(&id).await.unwrap());
}

#[tokio::test]
async fn casual_chat_is_not_persisted_to_the_vector_index() {
    let world = TestWorld::new();
    let outcome = world
        .memory
        .remember("ok", &InferenceContext::new(), MemoryDraft::new(""))
        .await
        .unwrap();

    assert!(!outcome.stored);
    assert_eq!(outcome.retention, RetentionType::CasualChat);

    let id = outcome.id.unwrap();
    let row = world.catalog.fetch(&id).unwrap().unwrap();
    assert!(!row.stored_in_vector);
    assert!(!world.vector.contains(&id));
}

#[tokio::test]
async fn permanent_keyword_content_is_stored() {
    let world = TestWorld::new();
    let outcome = world
        .memory
        .remember("我今天决定重构检索层", &InferenceContext::new(), MemoryDraft::new(""))
        .await
        .unwrap();

    assert!(outcome.stored);
    assert_eq!(outcome.retention, RetentionType::Permanent);
    let id = outcome.id.unwrap();
    assert!(world.vector.contains(&id));
    let row = world.catalog.fetch(&id).unwrap().unwrap();
    assert_eq!(row.retention_type, RetentionType::Permanent);
}

#[tokio::test]
async fn time_decay_ranks_recent_memories_first() {
    let world = TestWorld::new();
    let content = "weekly project status report for the migration";
    let embedded = world.embedder.embed_text(content).await.unwrap();

    let now = Utc::now();
    for (id, age_days) in [("mem_recent", 0i64), ("mem_old", 30)] {
        world.vector.insert(id, &embedded.vector).unwrap();
        let mut row = CatalogRow::new(id, content, DocumentType::MemConversation);
        row.stored_in_vector = true;
        row.retention_type = RetentionType::Permanent;
        row.timestamp = now - Duration::days(age_days);
        world.catalog.insert(&row).unwrap();
    }

    let items = world
        .memory
        .retrieve(content, 2, true, 0.0, &MemoryFilters::default())
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "mem_recent");
    assert_eq!(items[1].id, "mem_old");

    // Identical vectors and importance: the gap is exactly 0.99^30.
    let ratio = items[1].score / items[0].score;
    assert!((ratio - 0.99f64.powi(30)).abs() < 1e-6);
}

#[tokio::test]
async fn importance_threshold_boundary() {
    let world = TestWorld::new();
    world
        .memory
        .store(MemoryDraft::new("a note that nobody rated").with_importance(0.0))
        .await
        .unwrap();

    let included = world
        .memory
        .retrieve("note nobody rated", 5, false, 0.0, &MemoryFilters::default())
        .await
        .unwrap();
    assert_eq!(included.len(), 1);

    let excluded = world
        .memory
        .retrieve("note nobody rated", 5, false, 0.01, &MemoryFilters::default())
        .await
        .unwrap();
    assert!(excluded.is_empty());
}

#[tokio::test]
async fn update_importance_validates_and_reports() {
    let world = TestWorld::new();
    let id = world
        .memory
        .store(MemoryDraft::new("importance will change"))
        .await
        .unwrap();

    assert!(world.memory.update_importance(&id, 0.9).await.unwrap());
    assert!(!world.memory.update_importance("mem_ghost", 0.9).await.unwrap());
    assert!(world.memory.update_importance(&id, 1.5).await.is_err());

    let item = world.memory.get(&id).await.unwrap().unwrap();
    assert_eq!(item.importance, 0.9);
}

#[tokio::test]
async fn recall_updates_access_statistics() {
    let world = TestWorld::new();
    let id = world
        .memory
        .store(MemoryDraft::new("memory that gets recalled often"))
        .await
        .unwrap();

    world
        .memory
        .retrieve("recalled often", 5, true, 0.0, &MemoryFilters::default())
        .await
        .unwrap();

    let row = world.catalog.fetch(&id).unwrap().unwrap();
    assert_eq!(row.access_count, 1);
    assert!(row.last_access.is_some());
}

#[tokio::test]
async fn sweep_removes_expired_rows_and_vector_mappings() {
    let world = TestWorld::new();
    let content = "temporary reminder that should expire";
    let embedded = world.embedder.embed_text(content).await.unwrap();

    world.vector.insert("mem_stale", &embedded.vector).unwrap();
    let mut row = CatalogRow::new("mem_stale", content, DocumentType::MemConversation);
    row.stored_in_vector = true;
    row.retention_type = RetentionType::Temporary;
    row.timestamp = Utc::now() - Duration::days(9);
    world.catalog.insert(&row).unwrap();

    let swept = world.memory.sweep_expired().await.unwrap();
    assert_eq!(swept, vec!["mem_stale".to_string()]);
    assert!(world.catalog.fetch("mem_stale").unwrap().is_none());
    assert!(!world.vector.contains("mem_stale"));
}
