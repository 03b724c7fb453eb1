//! Retrieval stages.
//!
//! Each stage is a struct with one operation, `run`, and a typed options
//! surface on its constructor. [`PipelineStage`] is the closed,
//! value-typed union the pipeline executes.
//!
//! Numeric policy shared by every stage: emitted scores are normalized to
//! [0, 1], ties break by (source order, doc_id), and candidate identity
//! (`doc_id`) is never changed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::json;

use crate::config::LmConfig;
use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::error::{CoreError, Result};
use crate::llm::{LmOptions, LmTransport, Message, call_with_policy, extract_json_array};
use crate::model::{RetrievalResult, RetrievalSource, sort_candidates};
use crate::nlp::ner::EntityExtractor;
use crate::retrieval::StageContext;
use crate::similarity::token_jaccard;
use crate::store::catalog::{CatalogRow, MetadataCatalog, RowStatus};
use crate::store::graph::{Direction, GraphStore, NodeQuery};
use crate::store::vector::VectorStore;

// ============================================================================
// VECTOR RETRIEVAL
// ============================================================================

/// Dense retrieval: embed the query, k-NN search, hydrate from the
/// catalog, tag `source=vector`.
pub struct VectorRetrievalStage {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<VectorStore>,
    catalog: Arc<MetadataCatalog>,
    weight: f64,
}

impl VectorRetrievalStage {
    /// Build the stage; `weight` is this source's fusion weight
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<VectorStore>,
        catalog: Arc<MetadataCatalog>,
        weight: f64,
    ) -> Self {
        Self {
            embedder,
            vector,
            catalog,
            weight,
        }
    }

    async fn run(
        &self,
        query: &str,
        k: usize,
        ctx: &mut StageContext,
        mut candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        ctx.weights.insert(RetrievalSource::Vector, self.weight);

        let embedded = self.embedder.embed_text(query).await?;
        let hits = self.vector.knn(&embedded.vector, k)?;
        if hits.is_empty() {
            return Ok(candidates);
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let rows: HashMap<String, CatalogRow> = self
            .catalog
            .fetch_many(&ids)?
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();

        for hit in hits {
            let Some(row) = rows.get(&hit.id) else {
                continue; // index entry without a catalog row is stale
            };
            if row.status != RowStatus::Active {
                continue;
            }
            if let Some(doc_type) = ctx.filters.doc_type {
                if row.doc_type != doc_type {
                    continue;
                }
            }
            if !ctx.filters.passes_time(row.timestamp) {
                continue;
            }

            let mut result = RetrievalResult::new(
                hit.id.clone(),
                row.content.clone(),
                f64::from(hit.score).clamp(0.0, 1.0),
                RetrievalSource::Vector,
            );
            result.metadata.insert("stage".to_string(), json!("vector"));
            candidates.push(result);
        }

        Ok(candidates)
    }
}

// ============================================================================
// GRAPH RETRIEVAL
// ============================================================================

/// Graph retrieval: query entities -> graph lookup -> 1-2 hop document
/// neighbors, scored by hop distance and shared-entity count.
pub struct GraphRetrievalStage {
    graph: Arc<GraphStore>,
    ner: Arc<EntityExtractor>,
    catalog: Arc<MetadataCatalog>,
    weight: f64,
    max_hops: u8,
}

impl GraphRetrievalStage {
    /// Build the stage; `weight` is this source's fusion weight
    pub fn new(
        graph: Arc<GraphStore>,
        ner: Arc<EntityExtractor>,
        catalog: Arc<MetadataCatalog>,
        weight: f64,
    ) -> Self {
        Self {
            graph,
            ner,
            catalog,
            weight,
            max_hops: 2,
        }
    }

    async fn run(
        &self,
        query: &str,
        k: usize,
        ctx: &mut StageContext,
        mut candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        ctx.weights.insert(RetrievalSource::Graph, self.weight);

        let entities = match &ctx.entities {
            Some(entities) => entities.clone(),
            None => {
                let extracted = self.ner.extract(query).await?;
                ctx.entities = Some(extracted.clone());
                extracted
            }
        };
        if entities.is_empty() {
            return Ok(candidates);
        }

        // doc_id -> (min hops, entities that reached it, content fallback)
        struct Reached {
            hops: u8,
            matched: std::collections::BTreeSet<String>,
            content: String,
        }
        let mut reached: HashMap<String, Reached> = HashMap::new();

        for entity in &entities {
            let query_nodes = self
                .graph
                .find_nodes(
                    &NodeQuery::default().with_property("name", json!(entity.text)),
                    8,
                )
                .await?;

            for node in query_nodes {
                let mut frontier = vec![node.id.clone()];
                let mut visited: std::collections::HashSet<String> =
                    frontier.iter().cloned().collect();

                for hop in 1..=self.max_hops {
                    let mut next = Vec::new();
                    for node_id in &frontier {
                        let neighbors = self
                            .graph
                            .neighbors(node_id, Direction::Both, None, None)
                            .await?;
                        for (_, neighbor) in neighbors {
                            if !visited.insert(neighbor.id.clone()) {
                                continue;
                            }
                            if let Some(doc_id) = neighbor.property_str("doc_id") {
                                let entry =
                                    reached.entry(doc_id.to_string()).or_insert_with(|| Reached {
                                        hops: hop,
                                        matched: Default::default(),
                                        content: neighbor
                                            .property_str("content")
                                            .unwrap_or_default()
                                            .to_string(),
                                    });
                                entry.hops = entry.hops.min(hop);
                                entry.matched.insert(entity.text.clone());
                            }
                            next.push(neighbor.id.clone());
                        }
                    }
                    frontier = next;
                    if frontier.is_empty() {
                        break;
                    }
                }
            }
        }

        if reached.is_empty() {
            return Ok(candidates);
        }

        let max_shared = reached
            .values()
            .map(|r| r.matched.len())
            .max()
            .unwrap_or(1)
            .max(1);

        let ids: Vec<String> = reached.keys().cloned().collect();
        let rows: HashMap<String, CatalogRow> = self
            .catalog
            .fetch_many(&ids)?
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();

        let mut scored = Vec::new();
        for (doc_id, info) in reached {
            let row = rows.get(&doc_id);
            if let Some(row) = row {
                if row.status != RowStatus::Active {
                    continue;
                }
                if let Some(doc_type) = ctx.filters.doc_type {
                    if row.doc_type != doc_type {
                        continue;
                    }
                }
                if !ctx.filters.passes_time(row.timestamp) {
                    continue;
                }
            }

            let content = row.map(|r| r.content.clone()).unwrap_or(info.content);
            let score = (1.0 / (1.0 + f64::from(info.hops)))
                * (info.matched.len() as f64 / max_shared as f64);

            let mut result =
                RetrievalResult::new(doc_id, content, score, RetrievalSource::Graph);
            result.hop_distance = Some(info.hops);
            result.matched_entities = info.matched.into_iter().collect();
            result.metadata.insert("stage".to_string(), json!("graph"));
            scored.push(result);
        }

        sort_candidates(&mut scored);
        scored.truncate(k);
        candidates.extend(scored);
        Ok(candidates)
    }
}

// ============================================================================
// FUSION (RRF)
// ============================================================================

/// Reciprocal Rank Fusion across the source-tagged candidate lists.
///
/// A candidate at rank `r` (1-based) in source list `i` with weight `w_i`
/// accumulates `w_i / (k_rrf + r)`. Candidates present in more than one
/// list become `source=hybrid`; per-source rank and score land in
/// metadata. Accumulated scores are normalized by the maximum.
pub struct FusionStage {
    rrf_k: f64,
}

impl FusionStage {
    /// Build the stage with the RRF constant (conventionally 60)
    pub fn new(rrf_k: f64) -> Self {
        Self { rrf_k }
    }

    fn run(
        &self,
        _query: &str,
        k: usize,
        ctx: &mut StageContext,
        candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        // Recover the per-source ranked lists.
        let mut lists: BTreeMap<RetrievalSource, Vec<RetrievalResult>> = BTreeMap::new();
        for candidate in candidates {
            lists.entry(candidate.source).or_default().push(candidate);
        }
        for list in lists.values_mut() {
            sort_candidates(list);
        }

        struct Fused {
            result: RetrievalResult,
            accumulated: f64,
            sources: usize,
        }
        let mut fused: BTreeMap<String, Fused> = BTreeMap::new();

        for (source, list) in &lists {
            let weight = ctx.weight(*source);
            for (index, item) in list.iter().enumerate() {
                let rank = index + 1;
                let contribution = weight / (self.rrf_k + rank as f64);
                let source_key = item.source.as_str();

                let entry = fused.entry(item.doc_id.clone()).or_insert_with(|| Fused {
                    result: item.clone(),
                    accumulated: 0.0,
                    sources: 0,
                });
                entry.accumulated += contribution;
                entry.sources += 1;
                entry
                    .result
                    .metadata
                    .insert(format!("{source_key}Rank"), json!(rank));
                entry
                    .result
                    .metadata
                    .insert(format!("{source_key}Score"), json!(item.score));

                // Merge graph annotations when the vector copy was kept.
                if entry.result.hop_distance.is_none() {
                    entry.result.hop_distance = item.hop_distance;
                }
                if entry.result.matched_entities.is_empty() {
                    entry.result.matched_entities = item.matched_entities.clone();
                }
            }
        }

        let max_accumulated = fused
            .values()
            .map(|f| f.accumulated)
            .fold(0.0f64, f64::max)
            .max(f64::EPSILON);

        let mut results: Vec<RetrievalResult> = fused
            .into_values()
            .map(|mut fused_item| {
                fused_item.result.score = fused_item.accumulated / max_accumulated;
                if fused_item.sources > 1 {
                    fused_item.result.source = RetrievalSource::Hybrid;
                }
                fused_item
                    .result
                    .metadata
                    .insert("stage".to_string(), json!("fusion"));
                fused_item.result
            })
            .collect();

        sort_candidates(&mut results);
        results.truncate(k);
        Ok(results)
    }
}

// ============================================================================
// SEMANTIC RERANK
// ============================================================================

/// Rerank the candidate set.
///
/// Default path is a heuristic lexical-vs-semantic co-signal: the stage
/// score blended with query token overlap and a length prior. With an LM
/// enabled and enough candidates, the stage asks for an integer
/// permutation over stable candidate indices; any deviation (parse
/// failure, incomplete permutation) falls back to the heuristic.
pub struct SemanticRerankStage {
    transport: Option<Arc<dyn LmTransport>>,
    lm_config: LmConfig,
    use_llm: bool,
    llm_min_candidates: usize,
}

impl SemanticRerankStage {
    /// Heuristic-only reranker
    pub fn heuristic() -> Self {
        Self {
            transport: None,
            lm_config: LmConfig::default(),
            use_llm: false,
            llm_min_candidates: usize::MAX,
        }
    }

    /// LM-assisted reranker; falls back to the heuristic on any deviation
    pub fn with_llm(
        transport: Arc<dyn LmTransport>,
        lm_config: LmConfig,
        llm_min_candidates: usize,
    ) -> Self {
        Self {
            transport: Some(transport),
            lm_config,
            use_llm: true,
            llm_min_candidates,
        }
    }

    async fn run(
        &self,
        query: &str,
        k: usize,
        ctx: &mut StageContext,
        candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        if self.use_llm && candidates.len() >= self.llm_min_candidates {
            if let Some(transport) = self.transport.as_ref().filter(|t| t.is_configured()) {
                match self.llm_permutation(transport, query, &candidates).await {
                    Ok(order) => return Ok(Self::apply_permutation(candidates, order, k)),
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                    Err(e) => {
                        tracing::debug!("LM rerank fell back to heuristic: {e}");
                    }
                }
            }
        }

        Ok(self.heuristic_rerank(query, ctx, candidates, k))
    }

    fn heuristic_rerank(
        &self,
        query: &str,
        ctx: &StageContext,
        mut candidates: Vec<RetrievalResult>,
        k: usize,
    ) -> Vec<RetrievalResult> {
        let lexical_weight = if ctx.semantic_bias { 0.45 } else { 0.3 };
        let prior_weight = 0.1;
        let score_weight = 1.0 - lexical_weight - prior_weight;

        for candidate in &mut candidates {
            let lexical = token_jaccard(query, &candidate.content);
            let prior = length_prior(candidate.content.chars().count());
            let blended =
                score_weight * candidate.score + lexical_weight * lexical + prior_weight * prior;
            candidate
                .metadata
                .insert("lexicalOverlap".to_string(), json!(lexical));
            candidate.metadata.insert("stage".to_string(), json!("rerank"));
            candidate.score = blended;
        }

        let max_score = candidates
            .iter()
            .map(|c| c.score)
            .fold(0.0f64, f64::max)
            .max(f64::EPSILON);
        for candidate in &mut candidates {
            candidate.score = (candidate.score / max_score).clamp(0.0, 1.0);
        }

        sort_candidates(&mut candidates);
        candidates.truncate(k);
        candidates
    }

    async fn llm_permutation(
        &self,
        transport: &Arc<dyn LmTransport>,
        query: &str,
        candidates: &[RetrievalResult],
    ) -> Result<Vec<usize>> {
        let listing: String = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let snippet: String = c.content.chars().take(200).collect();
                format!("{i}: {snippet}")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Rank the candidates by relevance to the query, best first.\n\
             Query: {query}\n\nCandidates:\n{listing}\n\n\
             Reply with a JSON array of ALL candidate indices in ranked order, \
             e.g. [2, 0, 1]. No other text."
        );
        let messages = [Message::user(prompt)];
        let options = LmOptions::deterministic(200);

        let response = call_with_policy(&self.lm_config, || {
            transport.generate(&messages, &options)
        })
        .await?;

        let value = extract_json_array(&response.content)?;
        let order: Vec<usize> = value
            .as_array()
            .ok_or_else(|| CoreError::Parse("rerank response is not an array".to_string()))?
            .iter()
            .map(|v| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| CoreError::Parse("non-integer rank index".to_string()))
            })
            .collect::<Result<Vec<usize>>>()?;

        // Must be a complete permutation of 0..n.
        let n = candidates.len();
        let mut seen = vec![false; n];
        if order.len() != n {
            return Err(CoreError::Parse(format!(
                "permutation length {} != candidate count {n}",
                order.len()
            )));
        }
        for &index in &order {
            if index >= n || seen[index] {
                return Err(CoreError::Parse(format!("invalid permutation index {index}")));
            }
            seen[index] = true;
        }
        Ok(order)
    }

    fn apply_permutation(
        candidates: Vec<RetrievalResult>,
        order: Vec<usize>,
        k: usize,
    ) -> Vec<RetrievalResult> {
        let n = candidates.len();
        let mut slots: Vec<Option<RetrievalResult>> = candidates.into_iter().map(Some).collect();
        let mut ranked = Vec::with_capacity(n);
        for (position, index) in order.into_iter().enumerate() {
            if let Some(mut candidate) = slots[index].take() {
                candidate.score = (n - position) as f64 / n as f64;
                candidate.metadata.insert("stage".to_string(), json!("rerank"));
                candidate
                    .metadata
                    .insert("rerankMethod".to_string(), json!("llm"));
                ranked.push(candidate);
            }
        }
        ranked.truncate(k);
        ranked
    }
}

/// Length prior favoring mid-length content; [0.5, 1.0]
fn length_prior(chars: usize) -> f64 {
    1.0 - ((chars as f64 - 200.0).abs() / 800.0).min(1.0) * 0.5
}

// ============================================================================
// DIVERSITY FILTER (MMR)
// ============================================================================

/// Maximal Marginal Relevance: greedy selection maximizing
/// `lambda * relevance - (1 - lambda) * max_sim(selected)`.
///
/// Similarity is embedding cosine when both sides carry one, token-set
/// Jaccard otherwise. Output scores are clamped non-increasing so rank
/// order and score order agree downstream.
pub struct DiversityFilterStage {
    lambda: f64,
}

impl DiversityFilterStage {
    /// Build the stage with the relevance/diversity balance (default 0.7)
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    fn similarity(a: &RetrievalResult, b: &RetrievalResult) -> f64 {
        match (&a.embedding, &b.embedding) {
            (Some(va), Some(vb)) => f64::from(cosine_similarity(va, vb)).clamp(0.0, 1.0),
            _ => token_jaccard(&a.content, &b.content),
        }
    }

    fn run(
        &self,
        _query: &str,
        k: usize,
        _ctx: &mut StageContext,
        mut candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        sort_candidates(&mut candidates);
        if candidates.len() <= k {
            return Ok(candidates);
        }

        let mut remaining = candidates;
        let mut selected: Vec<RetrievalResult> = vec![remaining.remove(0)];

        while selected.len() < k && !remaining.is_empty() {
            let mut best_index = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (index, candidate) in remaining.iter().enumerate() {
                let max_sim = selected
                    .iter()
                    .map(|s| Self::similarity(candidate, s))
                    .fold(0.0f64, f64::max);
                let mmr = self.lambda * candidate.score - (1.0 - self.lambda) * max_sim;
                if mmr > best_score {
                    best_score = mmr;
                    best_index = index;
                }
            }
            selected.push(remaining.remove(best_index));
        }

        // Clamp scores non-increasing in selection order.
        let mut ceiling = 1.0f64;
        for candidate in &mut selected {
            candidate.score = candidate.score.min(ceiling);
            ceiling = candidate.score;
            candidate.metadata.insert("stage".to_string(), json!("mmr"));
        }
        Ok(selected)
    }
}

// ============================================================================
// INTENT-ADAPTIVE WEIGHTING
// ============================================================================

/// Rewrites the remaining pipeline's source weights from query entity
/// density: entity-dense queries with a graph available lean on the
/// graph; everything else takes the semantic path.
pub struct IntentAdaptiveStage {
    ner: Option<Arc<EntityExtractor>>,
}

impl IntentAdaptiveStage {
    /// Build the stage; without an extractor it can only use entities
    /// already in the context
    pub fn new(ner: Option<Arc<EntityExtractor>>) -> Self {
        Self { ner }
    }

    async fn run(
        &self,
        query: &str,
        _k: usize,
        ctx: &mut StageContext,
        candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        let entities = match &ctx.entities {
            Some(entities) => entities.clone(),
            None => match &self.ner {
                Some(ner) => {
                    let extracted = ner.extract(query).await.unwrap_or_default();
                    ctx.entities = Some(extracted.clone());
                    extracted
                }
                None => Vec::new(),
            },
        };

        if entities.len() >= 2 && ctx.graph_available {
            ctx.weights.insert(RetrievalSource::Graph, 0.6);
            ctx.weights.insert(RetrievalSource::Vector, 0.4);
        } else {
            ctx.semantic_bias = true;
            ctx.weights.insert(RetrievalSource::Vector, 1.0);
        }
        Ok(candidates)
    }
}

// ============================================================================
// STAGE UNION
// ============================================================================

/// The closed set of pipeline stages
pub enum PipelineStage {
    /// Dense vector retrieval
    Vector(VectorRetrievalStage),
    /// Graph neighborhood retrieval
    Graph(GraphRetrievalStage),
    /// RRF fusion
    Fusion(FusionStage),
    /// Semantic rerank
    Rerank(SemanticRerankStage),
    /// MMR diversity filter
    Diversity(DiversityFilterStage),
    /// Intent-adaptive weighting
    Adaptive(IntentAdaptiveStage),
}

impl PipelineStage {
    /// Stage name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Vector(_) => "vector_retrieval",
            PipelineStage::Graph(_) => "graph_retrieval",
            PipelineStage::Fusion(_) => "fusion",
            PipelineStage::Rerank(_) => "semantic_rerank",
            PipelineStage::Diversity(_) => "diversity_filter",
            PipelineStage::Adaptive(_) => "intent_adaptive",
        }
    }

    /// Whether this stage produces candidates from a backend (vs.
    /// transforming existing ones)
    pub fn is_source(&self) -> bool {
        matches!(self, PipelineStage::Vector(_) | PipelineStage::Graph(_))
    }

    /// Whether this stage truncates to the final `k`
    pub fn is_final_cut(&self) -> bool {
        matches!(self, PipelineStage::Diversity(_))
    }

    /// Run the stage
    pub async fn run(
        &self,
        query: &str,
        k: usize,
        ctx: &mut StageContext,
        candidates: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        match self {
            PipelineStage::Vector(stage) => stage.run(query, k, ctx, candidates).await,
            PipelineStage::Graph(stage) => stage.run(query, k, ctx, candidates).await,
            PipelineStage::Fusion(stage) => stage.run(query, k, ctx, candidates),
            PipelineStage::Rerank(stage) => stage.run(query, k, ctx, candidates).await,
            PipelineStage::Diversity(stage) => stage.run(query, k, ctx, candidates),
            PipelineStage::Adaptive(stage) => stage.run(query, k, ctx, candidates).await,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
