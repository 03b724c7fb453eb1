//! Retrieval fabric.
//!
//! Retrieval is a composition of stages, each implementing one operation:
//! `run(query, k, context, candidates) -> candidates'`. The pipeline
//! ([`pipeline::RetrievalPipeline`]) feeds one stage's output into the
//! next; a shared mutable [`StageContext`] carries filters, detected
//! query entities, and stage-weight overrides down the chain.
//!
//! Stages are a value-typed sequence ([`stages::PipelineStage`]); there
//! is no dispatch on stage names at runtime.

pub mod pipeline;
pub mod stages;

pub use pipeline::{Retriever, RetrievalPipeline};
pub use stages::{
    DiversityFilterStage, FusionStage, GraphRetrievalStage, IntentAdaptiveStage, PipelineStage,
    SemanticRerankStage, VectorRetrievalStage,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DocumentType, RetrievalSource};
use crate::nlp::Entity;

// ============================================================================
// FILTERS
// ============================================================================

/// Caller-supplied retrieval filters.
///
/// `doc_type` is equality; `after`/`before` are inclusive timestamp
/// bounds; `min_score` prunes after the pipeline completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalFilters {
    /// Equality filter on document type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocumentType>,
    /// Inclusive lower bound on document timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on document timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Prune results scoring below this after the final stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

impl RetrievalFilters {
    /// Whether a document with this timestamp passes the time bounds
    pub fn passes_time(&self, timestamp: DateTime<Utc>) -> bool {
        self.after.is_none_or(|after| timestamp >= after)
            && self.before.is_none_or(|before| timestamp <= before)
    }
}

// ============================================================================
// STAGE CONTEXT
// ============================================================================

/// Mutable state shared by the stages of one pipeline execution
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Caller filters
    pub filters: RetrievalFilters,
    /// Entities detected in the query (filled by the graph or adaptive
    /// stage, readable by later stages)
    pub entities: Option<Vec<Entity>>,
    /// Per-source fusion weights; retrieval stages record theirs here and
    /// the adaptive stage may rewrite them
    pub weights: BTreeMap<RetrievalSource, f64>,
    /// Whether a graph retriever participates in this pipeline
    pub graph_available: bool,
    /// Set when the adaptive stage chose the semantic path; the reranker
    /// leans harder on lexical-semantic co-signal
    pub semantic_bias: bool,
}

impl StageContext {
    /// Context with the given filters
    pub fn with_filters(filters: RetrievalFilters) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }

    /// The fusion weight for a source, defaulting to 1.0
    pub fn weight(&self, source: RetrievalSource) -> f64 {
        self.weights.get(&source).copied().unwrap_or(1.0)
    }
}
