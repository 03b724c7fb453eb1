//! Cascade inference engine.
//!
//! An engine holds an ordered sequence of levels, cheapest first. Each
//! level produces a value with a confidence; the first level at or above
//! the confidence threshold wins and later levels are never consulted.
//! Rule layers answer the bulk of inputs in microseconds; the LM layer is
//! reached only on the uncertain remainder.
//!
//! The engine never raises: a level that errors is recorded and skipped,
//! and when every level errors the caller gets a synthetic result with
//! confidence 0 and the per-level errors in metadata. The single
//! exception is [`CoreError::Cancelled`], which always propagates.
//!
//! Results are cached by `(input-hash, context-hash)` in a bounded LRU
//! with a TTL. Only threshold-passing results are cached; adding a level
//! invalidates the cache.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::config::CascadeConfig;
use crate::error::{CoreError, Result};

// ============================================================================
// TYPES
// ============================================================================

/// Which class of level produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceLevelTag {
    /// Deterministic rules, dictionaries, regexes
    Rule,
    /// Small/cheap model
    FastModel,
    /// Full language model
    Llm,
}

impl InferenceLevelTag {
    /// Stable string form (metadata, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceLevelTag::Rule => "rule",
            InferenceLevelTag::FastModel => "fast_model",
            InferenceLevelTag::Llm => "llm",
        }
    }
}

/// Context passed alongside the input; participates in the cache key.
///
/// A `BTreeMap` so serialization (and therefore hashing) is
/// deterministic.
pub type InferenceContext = BTreeMap<String, Value>;

/// One level's (or the engine's final) inference output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    /// The inferred value; shape is level-specific
    pub value: Value,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Producing level
    pub level: InferenceLevelTag,
    /// Open annotations (method, matched keyword, attempts, errors)
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl InferenceResult {
    /// Create a result with empty metadata
    pub fn new(value: Value, confidence: f64, level: InferenceLevelTag) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            level,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry, builder-style
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// What to return when no level reaches the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackStrategy {
    /// Highest-confidence result seen across all levels
    #[default]
    BestOf,
    /// Result of the last level attempted
    Cascade,
}

// ============================================================================
// LEVEL TRAIT
// ============================================================================

/// A single level in a cascade.
///
/// Levels are evaluated strictly in order; a level sees only the input
/// and context, never the results of earlier levels.
#[async_trait]
pub trait InferenceLevel: Send + Sync {
    /// Level class, recorded on every result
    fn tag(&self) -> InferenceLevelTag;

    /// Infer a value for the input
    async fn infer(&self, input: &str, context: &InferenceContext) -> Result<InferenceResult>;
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    input: [u8; 32],
    context: [u8; 32],
}

impl CacheKey {
    fn compute(input: &str, context: &InferenceContext) -> Self {
        let input_hash: [u8; 32] = Sha256::digest(input.as_bytes()).into();
        let context_bytes = serde_json::to_vec(context).unwrap_or_default();
        let context_hash: [u8; 32] = Sha256::digest(&context_bytes).into();
        Self {
            input: input_hash,
            context: context_hash,
        }
    }
}

struct CachedResult {
    result: InferenceResult,
    inserted: Instant,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Ordered multi-level inference with confidence-gated early exit
pub struct CascadeEngine {
    levels: Vec<Arc<dyn InferenceLevel>>,
    config: CascadeConfig,
    strategy: FallbackStrategy,
    cache: Mutex<LruCache<CacheKey, CachedResult>>,
}

impl CascadeEngine {
    /// Create an empty engine; add levels with [`CascadeEngine::add_level`]
    pub fn new(config: CascadeConfig, strategy: FallbackStrategy) -> Self {
        // SAFETY: max(1) guarantees a non-zero capacity
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity is non-zero");
        Self {
            levels: Vec::new(),
            config,
            strategy,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Append a level. Invalidates the result cache.
    pub fn add_level(&mut self, level: Arc<dyn InferenceLevel>) {
        self.levels.push(level);
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of configured levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// The engine's confidence threshold
    pub fn threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    /// Run the cascade.
    ///
    /// Never fails except on cancellation; see the module docs for the
    /// fallback behavior.
    pub async fn infer(&self, input: &str, context: &InferenceContext) -> Result<InferenceResult> {
        let key = CacheKey::compute(input, context);

        if self.config.enable_cache {
            if let Some(cached) = self.cache_get(&key) {
                return Ok(cached);
            }
        }

        let mut best: Option<InferenceResult> = None;
        let mut last: Option<InferenceResult> = None;
        let mut attempts: Vec<Value> = Vec::with_capacity(self.levels.len());
        let mut errors: Vec<Value> = Vec::new();

        for level in &self.levels {
            let tag = level.tag();
            match level.infer(input, context).await {
                Ok(result) => {
                    attempts.push(json!({
                        "level": tag.as_str(),
                        "confidence": result.confidence,
                    }));

                    if result.confidence >= self.config.confidence_threshold {
                        let accepted = Self::annotate(result, &attempts);
                        if self.config.enable_cache {
                            self.cache_put(key, accepted.clone());
                        }
                        return Ok(accepted);
                    }

                    let is_better = best
                        .as_ref()
                        .map(|b| result.confidence > b.confidence)
                        .unwrap_or(true);
                    if is_better {
                        best = Some(result.clone());
                    }
                    last = Some(result);
                }
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    tracing::debug!("cascade level {} failed: {e}", tag.as_str());
                    attempts.push(json!({
                        "level": tag.as_str(),
                        "error": e.to_string(),
                    }));
                    errors.push(json!({
                        "level": tag.as_str(),
                        "error": e.to_string(),
                    }));
                }
            }
        }

        // No level reached the threshold.
        let fallback = match self.strategy {
            FallbackStrategy::BestOf => best,
            FallbackStrategy::Cascade => last,
        };

        let result = match fallback {
            Some(result) => Self::annotate(result, &attempts),
            None => {
                // Every level raised: synthetic zero-confidence result.
                let tag = self
                    .levels
                    .last()
                    .map(|l| l.tag())
                    .unwrap_or(InferenceLevelTag::Rule);
                InferenceResult::new(Value::Null, 0.0, tag)
                    .with_meta("synthetic", json!(true))
                    .with_meta("errors", Value::Array(errors))
            }
        };

        Ok(result)
    }

    fn annotate(mut result: InferenceResult, attempts: &[Value]) -> InferenceResult {
        if attempts.len() > 1 {
            result
                .metadata
                .insert("attempts".to_string(), Value::Array(attempts.to_vec()));
        }
        result
    }

    fn cache_get(&self, key: &CacheKey) -> Option<InferenceResult> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() <= self.config.cache_ttl => {
                Some(entry.result.clone())
            }
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, key: CacheKey, result: InferenceResult) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CachedResult {
                    result,
                    inserted: Instant::now(),
                },
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
