//! # Memoria Core
//!
//! Personal knowledge and memory engine: answers natural-language
//! questions over a private corpus by combining dense vector similarity,
//! a typed property graph, and cost-tiered language-model inference.
//!
//! Three subsystems carry the weight:
//!
//! - **Cascade inference** ([`inference`]): ordered levels, cheap rules
//!   first, LM only on the uncertain remainder, with confidence-gated
//!   early exit and an LRU+TTL result cache.
//! - **Hybrid retrieval** ([`retrieval`]): composable stages over the
//!   vector index and the graph - RRF fusion, semantic rerank, MMR
//!   diversity, intent-adaptive weighting - selected per query strategy.
//! - **Memory store** ([`memory`]): content + embedding + metadata under
//!   one CRUD contract, retention-classified, recalled with per-day time
//!   decay and importance weighting.
//!
//! Language-model and embedding transports are consumed through traits
//! ([`llm::LmTransport`], [`embedding::EmbeddingProvider`]); the engine
//! owns neither protocol. Construction and sharing of concrete
//! components happens in one place, [`factory::CapabilityFactory`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use memoria_core::prelude::*;
//!
//! # async fn demo() -> memoria_core::Result<()> {
//! let factory = CapabilityFactory::new(EngineConfig::default());
//!
//! // Remember something; retention is classified automatically.
//! let memory = factory.memory_engine("default")?;
//! let outcome = memory
//!     .remember(
//!         "decided to move the index rebuild into the sweeper",
//!         &Default::default(),
//!         MemoryDraft::new(""),
//!     )
//!     .await?;
//! assert!(outcome.stored);
//!
//! // Recall with time decay.
//! let items = memory
//!     .retrieve("index rebuild decision", 5, true, 0.0, &Default::default())
//!     .await?;
//! # let _ = items;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod inference;
pub mod llm;
pub mod memory;
pub mod model;
pub mod nlp;
pub mod retrieval;
pub mod similarity;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{CoreError, Result};

// Configuration
pub use config::{
    CascadeConfig, EmbeddingConfig, EngineConfig, LmConfig, MemoryConfig, RetentionConfig,
    RetrievalConfig, VectorConfig,
};

// Data model
pub use model::{
    DataLayer, Document, DocumentType, MemoryItem, RetentionType, RetrievalResult,
    RetrievalSource, RetrievalStrategy, StoreOutcome,
};

// Embedding transport
pub use embedding::{
    EmbeddingOutput, EmbeddingProvider, EmbeddingUsage, HashingEmbedder, cosine_similarity,
    euclidean_distance,
};

// LM transport
pub use llm::{
    ChunkStream, FinishReason, LmOptions, LmResponse, LmTransport, LmUsage, Message, Role,
    extract_json, extract_json_array,
};

// Cascade inference
pub use inference::{
    CascadeEngine, FallbackStrategy, InferenceContext, InferenceLevel, InferenceLevelTag,
    InferenceResult,
};

// NLP detectors
pub use nlp::{
    EmotionDetector, EmotionKind, EmotionResult, Entity, EntityExtractor, EntityKind,
    IntentRecognizer, IntentResult, UserIntent,
};

// Storage primitives
pub use store::{
    CatalogFilter, CatalogRow, Direction, GraphBackend, GraphDomain, GraphEdge, GraphNode,
    GraphPipeline, GraphStore, MemoryGraphBackend, MetadataCatalog, NodeLabel, NodeQuery,
    RelationType, RowPatch, RowStatus, Store, VectorHit, VectorStore, VectorStoreStats,
};

// Retrieval
pub use retrieval::{
    PipelineStage, RetrievalFilters, RetrievalPipeline, Retriever, StageContext,
};

// Memory engine
pub use memory::{
    MemoryDraft, MemoryEngine, MemoryFilters, RETENTION_HINT_KEY, RetentionClassifier,
};

// Capability assembly
pub use factory::CapabilityFactory;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CapabilityFactory, CascadeEngine, CoreError, EmotionDetector, EngineConfig,
        EntityExtractor, InferenceContext, InferenceResult, IntentRecognizer, MemoryDraft,
        MemoryEngine, MemoryFilters, MemoryItem, RetentionType, RetrievalFilters,
        RetrievalResult, RetrievalStrategy, Retriever, Result, StoreOutcome, UserIntent,
    };
}
