//! Pipeline composition and execution.
//!
//! A pipeline is an ordered list of stages plus a name. Stages run
//! strictly in declared order, with one exception: a vector stage
//! immediately followed by a graph stage (the advanced preset) fans out
//! in parallel, and the following fusion stage is the join point.
//!
//! Early stages work on `2k` candidates; the diversity filter and the
//! final stage cut to `k`. Backend failure in one stage degrades to the
//! previous candidate set (empty if the first stage fails) rather than
//! failing the query; only when every stage fails does the caller see an
//! empty result. Cancellation always propagates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{LmConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, Result};
use crate::llm::LmTransport;
use crate::model::{RetrievalResult, RetrievalStrategy, sort_candidates};
use crate::nlp::ner::EntityExtractor;
use crate::retrieval::stages::{
    DiversityFilterStage, FusionStage, GraphRetrievalStage, IntentAdaptiveStage, PipelineStage,
    SemanticRerankStage, VectorRetrievalStage,
};
use crate::retrieval::{RetrievalFilters, StageContext};
use crate::store::catalog::MetadataCatalog;
use crate::store::graph::GraphStore;
use crate::store::vector::VectorStore;

// ============================================================================
// PIPELINE
// ============================================================================

/// An ordered, named stage sequence
pub struct RetrievalPipeline {
    name: String,
    stages: Vec<PipelineStage>,
}

impl RetrievalPipeline {
    /// Create a pipeline from its stages
    pub fn new(name: impl Into<String>, stages: Vec<PipelineStage>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn stage_k(&self, index: usize, k: usize) -> usize {
        let stage = &self.stages[index];
        if stage.is_final_cut() || index + 1 == self.stages.len() {
            k
        } else {
            k * 2
        }
    }

    /// Execute the pipeline.
    ///
    /// Pure in `(query, context, store snapshot)`: with no intervening
    /// mutation, two consecutive executions return identical sequences.
    pub async fn execute(
        &self,
        query: &str,
        k: usize,
        ctx: &mut StageContext,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || k == 0 || self.stages.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<RetrievalResult> = Vec::new();
        let mut any_success = false;
        let mut index = 0;

        while index < self.stages.len() {
            let stage = &self.stages[index];

            // Sibling source stages fan out; the next stage joins them.
            if stage.is_source()
                && index + 1 < self.stages.len()
                && self.stages[index + 1].is_source()
            {
                let sibling = &self.stages[index + 1];
                let mut ctx_a = ctx.clone();
                let mut ctx_b = ctx.clone();
                let k_a = self.stage_k(index, k);
                let k_b = self.stage_k(index + 1, k);

                let (result_a, result_b) = tokio::join!(
                    stage.run(query, k_a, &mut ctx_a, Vec::new()),
                    sibling.run(query, k_b, &mut ctx_b, Vec::new()),
                );

                for (name, outcome) in [
                    (stage.name(), result_a),
                    (sibling.name(), result_b),
                ] {
                    match outcome {
                        Ok(batch) => {
                            candidates.extend(batch);
                            any_success = true;
                        }
                        Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                        Err(e) => {
                            tracing::warn!(pipeline = %self.name, stage = name, "stage failed: {e}");
                        }
                    }
                }

                // Join the contexts the two branches mutated.
                ctx.weights.extend(ctx_a.weights);
                ctx.weights.extend(ctx_b.weights);
                ctx.entities = ctx_a.entities.or(ctx_b.entities).or(ctx.entities.take());
                ctx.semantic_bias |= ctx_a.semantic_bias || ctx_b.semantic_bias;

                index += 2;
                continue;
            }

            let k_stage = self.stage_k(index, k);
            match stage.run(query, k_stage, ctx, candidates.clone()).await {
                Ok(batch) => {
                    candidates = batch;
                    any_success = true;
                }
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        pipeline = %self.name,
                        stage = stage.name(),
                        "stage failed, degrading: {e}"
                    );
                }
            }
            index += 1;
        }

        if !any_success {
            return Ok(Vec::new());
        }

        if let Some(min_score) = ctx.filters.min_score {
            candidates.retain(|c| c.score >= min_score);
        }
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }
}

// ============================================================================
// RETRIEVER
// ============================================================================

/// Strategy-dispatching retrieval entrypoint over shared components
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<VectorStore>,
    catalog: Arc<MetadataCatalog>,
    graph: Option<Arc<GraphStore>>,
    ner: Option<Arc<EntityExtractor>>,
    transport: Option<Arc<dyn LmTransport>>,
    config: RetrievalConfig,
    lm_config: LmConfig,
    graph_fallback_logged: AtomicBool,
}

impl Retriever {
    /// Assemble a retriever; graph retrieval engages only when both a
    /// graph store and an entity extractor are supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<VectorStore>,
        catalog: Arc<MetadataCatalog>,
        graph: Option<Arc<GraphStore>>,
        ner: Option<Arc<EntityExtractor>>,
        transport: Option<Arc<dyn LmTransport>>,
        config: RetrievalConfig,
        lm_config: LmConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            catalog,
            graph,
            ner,
            transport,
            config,
            lm_config,
            graph_fallback_logged: AtomicBool::new(false),
        }
    }

    fn has_graph(&self) -> bool {
        self.graph.is_some() && self.ner.is_some()
    }

    fn vector_stage(&self, weight: f64) -> PipelineStage {
        PipelineStage::Vector(VectorRetrievalStage::new(
            self.embedder.clone(),
            self.vector.clone(),
            self.catalog.clone(),
            weight,
        ))
    }

    fn graph_stage(&self, weight: f64) -> Option<PipelineStage> {
        let graph = self.graph.clone()?;
        let ner = self.ner.clone()?;
        Some(PipelineStage::Graph(GraphRetrievalStage::new(
            graph,
            ner,
            self.catalog.clone(),
            weight,
        )))
    }

    fn rerank_stage(&self) -> PipelineStage {
        let stage = match &self.transport {
            Some(transport) if transport.is_configured() => SemanticRerankStage::with_llm(
                transport.clone(),
                self.lm_config.clone(),
                self.config.llm_rerank_min_candidates,
            ),
            _ => SemanticRerankStage::heuristic(),
        };
        PipelineStage::Rerank(stage)
    }

    /// basic: vector -> rerank
    pub fn basic_pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new("basic", vec![self.vector_stage(1.0), self.rerank_stage()])
    }

    /// advanced: vector(0.6) + graph(0.4) -> fusion -> rerank
    ///
    /// Without a graph retriever this degrades to basic.
    pub fn advanced_pipeline(&self) -> RetrievalPipeline {
        let Some(graph_stage) = self.graph_stage(self.config.graph_weight) else {
            return self.basic_pipeline();
        };
        RetrievalPipeline::new(
            "advanced",
            vec![
                self.vector_stage(self.config.vector_weight),
                graph_stage,
                PipelineStage::Fusion(FusionStage::new(self.config.rrf_k)),
                self.rerank_stage(),
            ],
        )
    }

    /// semantic: vector -> intent-adaptive -> rerank -> diversity
    pub fn semantic_pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new(
            "semantic",
            vec![
                self.vector_stage(1.0),
                PipelineStage::Adaptive(IntentAdaptiveStage::new(self.ner.clone())),
                self.rerank_stage(),
                PipelineStage::Diversity(DiversityFilterStage::new(self.config.mmr_lambda)),
            ],
        )
    }

    /// vector_only: vector retrieval alone
    pub fn vector_only_pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new("vector_only", vec![self.vector_stage(1.0)])
    }

    /// graph_only: graph retrieval alone; falls back to vector_only when
    /// no graph retriever exists (logged once)
    pub fn graph_only_pipeline(&self) -> RetrievalPipeline {
        match self.graph_stage(1.0) {
            Some(stage) => RetrievalPipeline::new("graph_only", vec![stage]),
            None => {
                if !self.graph_fallback_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!("graph retriever absent, graph_only falls back to vector_only");
                }
                self.vector_only_pipeline()
            }
        }
    }

    /// Strategy-dispatching retrieval
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        strategy: RetrievalStrategy,
        filters: RetrievalFilters,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut ctx = StageContext::with_filters(filters);
        ctx.graph_available = self.has_graph();

        let pipeline = match strategy {
            RetrievalStrategy::VectorOnly => self.vector_only_pipeline(),
            RetrievalStrategy::GraphOnly => self.graph_only_pipeline(),
            RetrievalStrategy::Hybrid => self.advanced_pipeline(),
            RetrievalStrategy::Adaptive => self.adaptive_pipeline(query, &mut ctx).await,
        };

        pipeline.execute(query, k, &mut ctx).await
    }

    /// ADAPTIVE: entity-bearing queries with a graph go advanced, the
    /// rest go semantic.
    async fn adaptive_pipeline(&self, query: &str, ctx: &mut StageContext) -> RetrievalPipeline {
        let entities = match &self.ner {
            Some(ner) => ner.extract(query).await.unwrap_or_default(),
            None => Vec::new(),
        };
        let has_entities = !entities.is_empty();
        ctx.entities = Some(entities);

        if has_entities && self.has_graph() {
            self.advanced_pipeline()
        } else {
            self.semantic_pipeline()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CascadeConfig, VectorConfig};
    use crate::embedding::HashingEmbedder;
    use crate::model::{DocumentType, RetrievalSource};
    use crate::store::catalog::CatalogRow;
    use crate::store::graph::{GraphEdge, GraphNode, MemoryGraphBackend};
    use crate::store::schema::{NodeLabel, RelationType};
    use serde_json::json;

    const DIMS: usize = 64;

    struct Fixture {
        retriever: Retriever,
        _dir: tempfile::TempDir,
    }

    async fn fixture(with_graph: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(DIMS));
        let vector = Arc::new(VectorStore::new(VectorConfig {
            dimensions: DIMS,
            ..Default::default()
        }));
        let catalog = Arc::new(MetadataCatalog::open(&dir.path().join("catalog.db")).unwrap());

        let docs = [
            ("doc-quantum", "quantum computing research notes from the lab"),
            ("doc-rust", "rust retrieval pipeline design and implementation"),
            ("doc-travel", "travel plans for the Kyoto trip with Alice"),
            ("doc-pasta", "pasta recipe collected from grandmother"),
        ];
        for (id, content) in docs {
            let emb = embedder.embed_text(content).await.unwrap();
            vector.insert(id, &emb.vector).unwrap();
            let mut row = CatalogRow::new(id, content, DocumentType::RagKnowledge);
            row.stored_in_vector = true;
            catalog.insert(&row).unwrap();
        }

        let (graph, ner) = if with_graph {
            let graph = Arc::new(GraphStore::new(Arc::new(MemoryGraphBackend::new())));
            // Entity node "Alice" linked to the travel document node.
            let mut props = serde_json::Map::new();
            props.insert("name".to_string(), json!("Alice"));
            let alice = graph
                .create_node(GraphNode::new(NodeLabel::Person, props))
                .await
                .unwrap();

            let mut doc_props = serde_json::Map::new();
            doc_props.insert("title".to_string(), json!("Kyoto trip"));
            doc_props.insert("doc_id".to_string(), json!("doc-travel"));
            let doc_node = graph
                .create_node(GraphNode::new(NodeLabel::Document, doc_props))
                .await
                .unwrap();

            graph
                .create_edge(GraphEdge::new(alice, doc_node, RelationType::Mentions))
                .await
                .unwrap();

            let ner = Arc::new(EntityExtractor::rule_only(CascadeConfig::default()));
            (Some(graph), Some(ner))
        } else {
            (None, None)
        };

        let retriever = Retriever::new(
            embedder,
            vector,
            catalog,
            graph,
            ner,
            None,
            RetrievalConfig::default(),
            LmConfig::default(),
        );
        Fixture {
            retriever,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_basic_pipeline_finds_relevant_doc() {
        let fx = fixture(false).await;
        let results = fx
            .retriever
            .retrieve(
                "quantum computing research",
                2,
                RetrievalStrategy::VectorOnly,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].doc_id, "doc-quantum");
        assert_eq!(results[0].source, RetrievalSource::Vector);
    }

    #[tokio::test]
    async fn test_scores_normalized_and_ordered() {
        let fx = fixture(false).await;
        let results = fx
            .retriever
            .retrieve(
                "retrieval pipeline",
                4,
                RetrievalStrategy::Hybrid,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(results.len() <= 4);
        for result in &results {
            assert!((0.0..=1.0).contains(&result.score));
        }
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let fx = fixture(false).await;
        let results = fx
            .retriever
            .retrieve("", 5, RetrievalStrategy::Hybrid, RetrievalFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_zero_returns_empty() {
        let fx = fixture(false).await;
        let results = fx
            .retriever
            .retrieve(
                "anything",
                0,
                RetrievalStrategy::VectorOnly,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_graph_only_falls_back_without_graph() {
        let fx = fixture(false).await;
        let pipeline = fx.retriever.graph_only_pipeline();
        assert_eq!(pipeline.name(), "vector_only");
    }

    #[tokio::test]
    async fn test_graph_only_with_graph() {
        let fx = fixture(true).await;
        let pipeline = fx.retriever.graph_only_pipeline();
        assert_eq!(pipeline.name(), "graph_only");

        let results = fx
            .retriever
            .retrieve(
                "what did I plan with Alice about the trip",
                5,
                RetrievalStrategy::GraphOnly,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "doc-travel");
        assert_eq!(results[0].source, RetrievalSource::Graph);
        assert_eq!(results[0].hop_distance, Some(1));
        assert!(results[0].matched_entities.contains(&"Alice".to_string()));
    }

    #[tokio::test]
    async fn test_hybrid_marks_dual_source_as_hybrid() {
        let fx = fixture(true).await;
        let results = fx
            .retriever
            .retrieve(
                "travel plans Kyoto trip Alice",
                4,
                RetrievalStrategy::Hybrid,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        let travel = results.iter().find(|r| r.doc_id == "doc-travel").unwrap();
        // Found by both the vector and the graph side.
        assert_eq!(travel.source, RetrievalSource::Hybrid);
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let fx = fixture(true).await;
        let run = |_: usize| {
            fx.retriever.retrieve(
                "rust pipeline design",
                3,
                RetrievalStrategy::Adaptive,
                RetrievalFilters::default(),
            )
        };
        let first = run(0).await.unwrap();
        let second = run(1).await.unwrap();
        let ids = |rs: &[RetrievalResult]| {
            rs.iter().map(|r| r.doc_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        let scores = |rs: &[RetrievalResult]| rs.iter().map(|r| r.score).collect::<Vec<_>>();
        assert_eq!(scores(&first), scores(&second));
    }

    #[tokio::test]
    async fn test_min_score_filter_prunes() {
        let fx = fixture(false).await;
        let all = fx
            .retriever
            .retrieve(
                "quantum computing",
                4,
                RetrievalStrategy::VectorOnly,
                RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(all.len() > 1);

        let pruned = fx
            .retriever
            .retrieve(
                "quantum computing",
                4,
                RetrievalStrategy::VectorOnly,
                RetrievalFilters {
                    min_score: Some(all[0].score),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(pruned.len() < all.len());
        assert!(pruned.iter().all(|r| r.score >= all[0].score));
    }

    #[tokio::test]
    async fn test_doc_type_filter() {
        let fx = fixture(false).await;
        let results = fx
            .retriever
            .retrieve(
                "quantum computing",
                4,
                RetrievalStrategy::VectorOnly,
                RetrievalFilters {
                    doc_type: Some(DocumentType::WorkLog),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // Every stored doc is RagKnowledge, so the filter empties the set.
        assert!(results.is_empty());
    }
}
