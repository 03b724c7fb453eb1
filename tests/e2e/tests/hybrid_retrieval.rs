//! Hybrid retrieval: RRF fusion ordering, source tagging, and the
//! strategy dispatch over a seeded corpus.

use memoria_core::retrieval::FusionStage;
use memoria_core::{
    PipelineStage, RetrievalFilters, RetrievalResult, RetrievalSource, RetrievalStrategy,
    StageContext,
};
use memoria_e2e_tests::harness::TestWorld;

fn ranked(id: &str, score: f64, source: RetrievalSource) -> RetrievalResult {
    RetrievalResult::new(id, format!("content {id}"), score, source)
}

#[tokio::test]
async fn rrf_fusion_orders_by_weighted_rank_sums() {
    // Vector stage: A(0.9) B(0.8) C(0.7) D(0.6); graph stage: C(0.9)
    // E(0.8) B(0.7). Weights 0.6/0.4, k_rrf = 60.
    let mut ctx = StageContext::default();
    ctx.weights.insert(RetrievalSource::Vector, 0.6);
    ctx.weights.insert(RetrievalSource::Graph, 0.4);

    let candidates = vec![
        ranked("A", 0.9, RetrievalSource::Vector),
        ranked("B", 0.8, RetrievalSource::Vector),
        ranked("C", 0.7, RetrievalSource::Vector),
        ranked("D", 0.6, RetrievalSource::Vector),
        ranked("C", 0.9, RetrievalSource::Graph),
        ranked("E", 0.8, RetrievalSource::Graph),
        ranked("B", 0.7, RetrievalSource::Graph),
    ];

    let stage = PipelineStage::Fusion(FusionStage::new(60.0));
    let results = stage.run("query", 10, &mut ctx, candidates).await.unwrap();

    // C appears in both lists (ranks 3 and 1) and wins; B (ranks 2 and
    // 3) second; A (rank 1, vector only) third.
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(&ids[..3], &["C", "B", "A"]);

    let find = |id: &str| results.iter().find(|r| r.doc_id == id).unwrap();
    assert_eq!(find("C").source, RetrievalSource::Hybrid);
    assert_eq!(find("B").source, RetrievalSource::Hybrid);
    assert_eq!(find("A").source, RetrievalSource::Vector);
    assert_eq!(find("E").source, RetrievalSource::Graph);

    // Scores normalized and non-increasing.
    assert!((results[0].score - 1.0).abs() < 1e-9);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        assert!((0.0..=1.0).contains(&pair[1].score));
    }
}

#[tokio::test]
async fn hybrid_strategy_fuses_vector_and_graph_hits() {
    let world = TestWorld::new();
    world
        .seed_document("doc-kyoto", "travel plans for the Kyoto trip with Alice")
        .await;
    world
        .seed_document("doc-engine", "memory engine rebuild notes and benchmarks")
        .await;
    world
        .seed_document("doc-recipe", "grandmother's dumpling recipe")
        .await;
    world
        .seed_graph_link("Alice", "doc-kyoto", "Kyoto trip")
        .await;

    let results = world
        .retriever
        .retrieve(
            "trip plans with Alice",
            3,
            RetrievalStrategy::Hybrid,
            RetrievalFilters::default(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    let kyoto = results.iter().find(|r| r.doc_id == "doc-kyoto").unwrap();
    // Reached through both the dense index and the graph neighborhood.
    assert_eq!(kyoto.source, RetrievalSource::Hybrid);
    assert!(kyoto.matched_entities.contains(&"Alice".to_string()));
}

#[tokio::test]
async fn graph_only_strategy_scores_by_hops_and_shared_entities() {
    let world = TestWorld::new();
    world
        .seed_document("doc-kyoto", "travel plans for the Kyoto trip with Alice")
        .await;
    world
        .seed_graph_link("Alice", "doc-kyoto", "Kyoto trip")
        .await;

    let results = world
        .retriever
        .retrieve(
            "what is planned with Alice next month",
            5,
            RetrievalStrategy::GraphOnly,
            RetrievalFilters::default(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_id, "doc-kyoto");
    assert_eq!(results[0].source, RetrievalSource::Graph);
    assert_eq!(results[0].hop_distance, Some(1));
    // One entity reached it, one entity max: 1/(1+1) * 1/1.
    assert!((results[0].score - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn adaptive_strategy_handles_entity_free_queries() {
    let world = TestWorld::new();
    world
        .seed_document("doc-engine", "memory engine rebuild notes and benchmarks")
        .await;
    world
        .seed_document("doc-recipe", "grandmother's dumpling recipe")
        .await;

    let results = world
        .retriever
        .retrieve(
            "memory engine rebuild",
            2,
            RetrievalStrategy::Adaptive,
            RetrievalFilters::default(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].doc_id, "doc-engine");
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score));
    }
}

#[tokio::test]
async fn retrieval_is_pure_over_an_unchanged_snapshot() {
    let world = TestWorld::new();
    for (id, content) in [
        ("doc-a", "distributed consensus reading list"),
        ("doc-b", "retrieval pipeline stage ordering notes"),
        ("doc-c", "sqlite tuning pragmas collected over time"),
    ] {
        world.seed_document(id, content).await;
    }

    let run = || {
        world.retriever.retrieve(
            "pipeline ordering",
            3,
            RetrievalStrategy::Hybrid,
            RetrievalFilters::default(),
        )
    };
    let first = run().await.unwrap();
    let second = run().await.unwrap();

    let ids = |rs: &[RetrievalResult]| rs.iter().map(|r| r.doc_id.clone()).collect::<Vec<_>>();
    let scores = |rs: &[RetrievalResult]| rs.iter().map(|r| r.score).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(scores(&first), scores(&second));
}

#[tokio::test]
async fn empty_query_and_zero_k_return_empty() {
    let world = TestWorld::new();
    world.seed_document("doc-a", "anything at all").await;

    for (query, k) in [("", 5), ("   ", 5), ("anything", 0)] {
        let results = world
            .retriever
            .retrieve(query, k, RetrievalStrategy::Adaptive, RetrievalFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty(), "query={query:?} k={k}");
    }
}
