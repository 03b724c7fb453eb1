//! Engine configuration.
//!
//! Every tunable the engine reads lives here, grouped per subsystem, with
//! the defaults the rest of the crate documents. Construction is
//! `EngineConfig::default()` for embedded use or [`EngineConfig::from_env`]
//! to pick up `MEMORIA_*` overrides.
//!
//! Retention TTLs are deliberately defined once (`RetentionConfig`); the
//! classifier, the sweep job, and the LM classification prompt all render
//! from the same two numbers.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default embedding dimension (mirrors text-embedding-class models)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;

/// Default per-day recall decay factor
pub const DEFAULT_DECAY_FACTOR: f64 = 0.99;

/// Default RRF fusion constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Default MMR relevance/diversity balance
pub const DEFAULT_MMR_LAMBDA: f64 = 0.7;

/// Default cascade confidence threshold
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

// ============================================================================
// SUB-CONFIGS
// ============================================================================

/// Embedding provider settings
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Fixed vector length produced by the active provider
    pub dimension: usize,
    /// Chunk size for batch embedding
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 100,
        }
    }
}

/// Vector index settings
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Vector dimensions (must match the embedding provider)
    pub dimensions: usize,
    /// HNSW connectivity (candidate-list breadth of the approximate index)
    pub connectivity: usize,
    /// Expansion factor while inserting
    pub expansion_add: usize,
    /// Expansion factor while searching
    pub expansion_search: usize,
    /// Tombstone ratio above which a rebuild is recommended
    pub rebuild_threshold: f64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSION,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            rebuild_threshold: 0.3,
        }
    }
}

/// Cascade inference settings
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Confidence at or above which a level's result is accepted
    pub confidence_threshold: f64,
    /// Whether `(input, context)` results are cached
    pub enable_cache: bool,
    /// Cache capacity in entries (LRU evicted)
    pub cache_capacity: usize,
    /// Cache entry time-to-live
    pub cache_ttl: Duration,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            enable_cache: true,
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Retrieval pipeline settings
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// RRF fusion constant
    pub rrf_k: f64,
    /// Weight of the vector source in hybrid fusion
    pub vector_weight: f64,
    /// Weight of the graph source in hybrid fusion
    pub graph_weight: f64,
    /// MMR lambda (relevance vs. diversity)
    pub mmr_lambda: f64,
    /// Minimum candidate count before the LM rerank path engages
    pub llm_rerank_min_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            vector_weight: 0.6,
            graph_weight: 0.4,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            llm_rerank_min_candidates: 5,
        }
    }
}

/// Retention policy settings - the single source of TTL truth
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Days a `temporary` memory lives before the sweeper may remove it
    pub temporary_ttl_days: i64,
    /// Days a `casual_chat` row may linger in the catalog
    pub casual_ttl_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            temporary_ttl_days: 7,
            casual_ttl_days: 1,
        }
    }
}

/// Memory recall settings
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Per-day decay factor applied when `time_decay` is requested
    pub decay_factor: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

/// Language-model call settings
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Hard ceiling per LM call
    pub call_timeout: Duration,
    /// Retry attempts on backend failure
    pub retry_attempts: u32,
    /// Base backoff factor in seconds
    pub retry_factor: f64,
    /// Backoff cap
    pub retry_cap: Duration,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            retry_attempts: 3,
            retry_factor: 0.5,
            retry_cap: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Aggregated engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Data directory for on-disk stores (None = platform default)
    pub data_dir: Option<PathBuf>,
    /// Embedding settings
    pub embedding: EmbeddingConfig,
    /// Vector index settings
    pub vector: VectorConfig,
    /// Cascade inference settings
    pub cascade: CascadeConfig,
    /// Retrieval pipeline settings
    pub retrieval: RetrievalConfig,
    /// Retention TTLs
    pub retention: RetentionConfig,
    /// Memory recall settings
    pub memory: MemoryConfig,
    /// LM call settings
    pub llm: LmConfig,
}

impl EngineConfig {
    /// Build a config from defaults plus `MEMORIA_*` environment overrides.
    ///
    /// Recognized variables:
    /// - `MEMORIA_DATA_DIR` - data directory path
    /// - `MEMORIA_EMBEDDING_DIMENSION` - embedding vector length
    /// - `MEMORIA_DECAY_FACTOR` - per-day recall decay in (0, 1]
    /// - `MEMORIA_CONFIDENCE_THRESHOLD` - cascade acceptance threshold
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MEMORIA_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(raw) = std::env::var("MEMORIA_EMBEDDING_DIMENSION") {
            let dimension: usize = raw.parse().map_err(|_| {
                CoreError::Configuration(format!("invalid MEMORIA_EMBEDDING_DIMENSION: {raw}"))
            })?;
            config.embedding.dimension = dimension;
            config.vector.dimensions = dimension;
        }

        if let Ok(raw) = std::env::var("MEMORIA_DECAY_FACTOR") {
            let factor: f64 = raw.parse().map_err(|_| {
                CoreError::Configuration(format!("invalid MEMORIA_DECAY_FACTOR: {raw}"))
            })?;
            if !(0.0..=1.0).contains(&factor) || factor == 0.0 {
                return Err(CoreError::Configuration(format!(
                    "MEMORIA_DECAY_FACTOR must be in (0, 1]: {factor}"
                )));
            }
            config.memory.decay_factor = factor;
        }

        if let Ok(raw) = std::env::var("MEMORIA_CONFIDENCE_THRESHOLD") {
            let threshold: f64 = raw.parse().map_err(|_| {
                CoreError::Configuration(format!("invalid MEMORIA_CONFIDENCE_THRESHOLD: {raw}"))
            })?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(CoreError::Configuration(format!(
                    "MEMORIA_CONFIDENCE_THRESHOLD must be in [0, 1]: {threshold}"
                )));
            }
            config.cascade.confidence_threshold = threshold;
        }

        Ok(config)
    }

    /// Resolve the data directory, creating it if necessary.
    ///
    /// Falls back to the platform data dir (`directories`) when unset.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let proj_dirs = directories::ProjectDirs::from("io", "memoria", "core")
                    .ok_or_else(|| {
                        CoreError::Configuration(
                            "could not determine project directories".to_string(),
                        )
                    })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
