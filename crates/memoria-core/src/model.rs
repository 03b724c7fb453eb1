//! Core data model.
//!
//! Wire-facing types shared across the stores, the retrieval pipeline, and
//! the memory engine. Enumerations here are part of the persisted/wire
//! contract; their string forms are stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// DOCUMENT TYPES
// ============================================================================

/// Kind of document held by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Ingested knowledge (files, notes, articles)
    #[default]
    RagKnowledge,
    /// Conversational memory
    MemConversation,
    /// Work log entry
    WorkLog,
    /// Life record entry
    LifeRecord,
}

impl DocumentType {
    /// Stable string form used in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::RagKnowledge => "rag_knowledge",
            DocumentType::MemConversation => "mem_conversation",
            DocumentType::WorkLog => "work_log",
            DocumentType::LifeRecord => "life_record",
        }
    }

    /// Parse from the catalog string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "rag_knowledge" => Some(DocumentType::RagKnowledge),
            "mem_conversation" => Some(DocumentType::MemConversation),
            "work_log" => Some(DocumentType::WorkLog),
            "life_record" => Some(DocumentType::LifeRecord),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DATA LAYERS
// ============================================================================

/// Age-based storage layer of a catalog row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataLayer {
    /// 0-7 days old
    #[default]
    Hot,
    /// 7-30 days old
    Warm,
    /// 30+ days old
    Cold,
}

impl DataLayer {
    /// Classify by document age in whole days
    pub fn from_age_days(days: i64) -> Self {
        if days < 7 {
            DataLayer::Hot
        } else if days < 30 {
            DataLayer::Warm
        } else {
            DataLayer::Cold
        }
    }

    /// Stable string form used in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLayer::Hot => "hot",
            DataLayer::Warm => "warm",
            DataLayer::Cold => "cold",
        }
    }

    /// Parse from the catalog string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(DataLayer::Hot),
            "warm" => Some(DataLayer::Warm),
            "cold" => Some(DataLayer::Cold),
            _ => None,
        }
    }
}

// ============================================================================
// RETENTION
// ============================================================================

/// Per-item retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionType {
    /// Kept indefinitely
    Permanent,
    /// Swept after the temporary TTL (default 7 days)
    #[default]
    Temporary,
    /// Not persisted to the vector index; catalog row swept after 1 day
    CasualChat,
}

impl RetentionType {
    /// Stable string form used in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionType::Permanent => "permanent",
            RetentionType::Temporary => "temporary",
            RetentionType::CasualChat => "casual_chat",
        }
    }

    /// Parse from the catalog string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(RetentionType::Permanent),
            "temporary" => Some(RetentionType::Temporary),
            "casual_chat" => Some(RetentionType::CasualChat),
            _ => None,
        }
    }
}

impl std::fmt::Display for RetentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// Pipeline selection strategy for `retrieve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Dense vector search only
    VectorOnly,
    /// Graph neighborhood search only
    GraphOnly,
    /// Vector + graph fused with RRF
    #[default]
    Hybrid,
    /// Inspect the query and choose between advanced and semantic pipelines
    Adaptive,
}

/// Which subsystem produced a retrieval candidate.
///
/// Ordering matters: it is the secondary sort key when scores tie
/// (vector before graph before hybrid).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    /// Dense vector index
    #[default]
    Vector,
    /// Property graph neighborhood
    Graph,
    /// Present in more than one source list, fused
    Hybrid,
}

impl RetrievalSource {
    /// Stable string form (metadata, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Vector => "vector",
            RetrievalSource::Graph => "graph",
            RetrievalSource::Hybrid => "hybrid",
        }
    }
}

/// A scored retrieval candidate.
///
/// Candidate identity (`doc_id`) is preserved across every stage
/// transformation; stages may rescore, reorder, drop, and annotate, but
/// never rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Document id
    pub doc_id: String,
    /// Document content
    pub content: String,
    /// Normalized score in [0, 1]
    pub score: f64,
    /// Producing subsystem
    pub source: RetrievalSource,
    /// Entities shared with the query (graph candidates)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_entities: Vec<String>,
    /// Graph hop distance from a query entity (graph candidates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_distance: Option<u8>,
    /// Open per-candidate annotations (per-source ranks, rerank signals)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Candidate embedding when a stage happened to compute one
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl RetrievalResult {
    /// Create a candidate with the given id, content, score, and source
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        score: f64,
        source: RetrievalSource,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            score,
            source,
            matched_entities: Vec::new(),
            hop_distance: None,
            metadata: BTreeMap::new(),
            embedding: None,
        }
    }
}

/// Deterministic candidate ordering: score descending, then source order,
/// then doc_id lexicographic.
pub fn sort_candidates(candidates: &mut [RetrievalResult]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.source.cmp(&b.source))
            .then(a.doc_id.cmp(&b.doc_id))
    });
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// A document in the corpus.
///
/// Immutable after creation except for importance, access statistics, and
/// embedding replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Opaque, globally unique id
    pub id: String,
    /// UTF-8 content
    pub content: String,
    /// Document kind
    pub doc_type: DocumentType,
    /// Provenance tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Wall-clock creation time
    pub timestamp: DateTime<Utc>,
    /// Entities extracted at ingest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    /// Importance in [0, 1]
    pub importance: f64,
    /// Retention policy
    pub retention_type: RetentionType,
    /// Open key-value annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Times this document was returned by recall
    pub access_count: i64,
    /// Last recall time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a document with the given id and content, defaulting the rest
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            doc_type: DocumentType::default(),
            source: None,
            timestamp: Utc::now(),
            entities: Vec::new(),
            importance: 0.5,
            retention_type: RetentionType::default(),
            metadata: BTreeMap::new(),
            access_count: 0,
            last_access: None,
        }
    }
}

// ============================================================================
// MEMORY ITEMS
// ============================================================================

/// A recalled memory as returned by the memory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    /// Memory id (`mem_` prefix)
    pub id: String,
    /// Memory content
    pub content: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Importance in [0, 1]
    pub importance: f64,
    /// Emotion tag captured at store time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    /// Free-form category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Open annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Recall count
    pub access_count: i64,
    /// Final recall score (vector similarity x decay x importance weight)
    pub score: f64,
}

/// Outcome of a retention-classified store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    /// Whether the content was persisted to the vector index
    pub stored: bool,
    /// Assigned id when persisted (or transiently cataloged)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Retention classification that drove the decision
    pub retention: RetentionType,
}
