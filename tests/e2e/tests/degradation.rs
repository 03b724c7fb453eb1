//! Failure-path behavior: retrieval degrades to empty, memory stores
//! compensate, and the cascade never raises.

use std::sync::Arc;

use memoria_core::{
    LmConfig, MemoryConfig, MemoryDraft, MemoryEngine, MemoryFilters, RetentionClassifier,
    RetentionConfig, RetrievalConfig, RetrievalFilters, RetrievalStrategy, Retriever,
};
use memoria_e2e_tests::harness::{TEST_DIMENSIONS, TestWorld};
use memoria_e2e_tests::mocks::FailingEmbedder;

#[tokio::test]
async fn retrieval_returns_empty_when_every_stage_fails() {
    let world = TestWorld::new();
    world.seed_document("doc-a", "some indexed content").await;

    // A retriever whose embedding transport is down: the vector stage
    // (the only stage able to produce candidates here) always fails.
    let retriever = Retriever::new(
        Arc::new(FailingEmbedder::new(TEST_DIMENSIONS)),
        world.vector.clone(),
        world.catalog.clone(),
        None,
        None,
        None,
        RetrievalConfig::default(),
        LmConfig::default(),
    );

    let results = retriever
        .retrieve(
            "anything",
            5,
            RetrievalStrategy::VectorOnly,
            RetrievalFilters::default(),
        )
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn memory_recall_swallows_backend_failure() {
    let world = TestWorld::new();
    let engine = MemoryEngine::new(
        Arc::new(FailingEmbedder::new(TEST_DIMENSIONS)),
        world.vector.clone(),
        world.catalog.clone(),
        RetentionClassifier::new(RetentionConfig::default()),
        MemoryConfig::default(),
    );

    let items = engine
        .retrieve("anything", 5, true, 0.0, &MemoryFilters::default())
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn memory_store_degrades_to_catalog_only_on_vector_failure() {
    let world = TestWorld::new();
    let engine = MemoryEngine::new(
        Arc::new(FailingEmbedder::new(TEST_DIMENSIONS)),
        world.vector.clone(),
        world.catalog.clone(),
        RetentionClassifier::new(RetentionConfig::default()),
        MemoryConfig::default(),
    );

    // The embedding side is down, but the write still lands in the
    // catalog with the vector flag off.
    let id = engine
        .store(MemoryDraft::new("important note during the outage"))
        .await
        .unwrap();

    let row = world.catalog.fetch(&id).unwrap().unwrap();
    assert!(!row.stored_in_vector);
    assert!(!world.vector.contains(&id));
}

#[tokio::test]
async fn vector_invariant_holds_for_every_indexed_id() {
    let world = TestWorld::new();
    for i in 0..5 {
        world
            .memory
            .store(MemoryDraft::new(format!("indexed memory number {i}")))
            .await
            .unwrap();
    }

    // Every id the vector index knows has a catalog row with the flag on.
    let rows = world
        .catalog
        .list(&Default::default(), 100, 0)
        .unwrap();
    for row in rows {
        if world.vector.contains(&row.id) {
            assert!(row.stored_in_vector, "row {} out of sync", row.id);
        }
        if row.stored_in_vector {
            assert!(world.vector.contains(&row.id), "row {} missing vector", row.id);
        }
    }
}
