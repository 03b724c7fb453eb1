//! Embedding transport.
//!
//! The engine never computes embeddings itself; it consumes an
//! [`EmbeddingProvider`]. Production providers wrap a remote or local
//! model behind this trait. [`HashingEmbedder`] is the built-in
//! deterministic provider: character n-gram feature hashing into a fixed
//! dimension, good enough for offline operation and exact enough for
//! tests (identical text always embeds identically).
//!
//! Batch embedding tolerates partial failure: empty inputs and per-item
//! errors yield zero vectors so one bad row never sinks a bulk ingest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

// ============================================================================
// TYPES
// ============================================================================

/// Token accounting reported by a provider, when known
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingUsage {
    /// Tokens consumed by the request
    pub total_tokens: u64,
}

/// One embedded text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingOutput {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Producing model identifier
    pub model: String,
    /// Vector length
    pub dimension: usize,
    /// Token usage when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingUsage>,
}

impl EmbeddingOutput {
    /// An all-zero vector of the given dimension, used for failed or empty
    /// inputs in batch embedding.
    pub fn zero(model: &str, dimension: usize) -> Self {
        Self {
            vector: vec![0.0; dimension],
            model: model.to_string(),
            dimension,
            usage: None,
        }
    }

    /// Whether this output is the zero-vector placeholder
    pub fn is_zero(&self) -> bool {
        self.vector.iter().all(|v| *v == 0.0)
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Text-to-vector transport consumed by the engine
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text
    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput>;

    /// Embed many texts with partial-failure tolerance.
    ///
    /// The default implementation chunks by `batch_size` and maps empty
    /// inputs and per-item errors to zero vectors. The output is always
    /// the same length as the input.
    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<EmbeddingOutput>> {
        let chunk = batch_size.max(1);
        let mut outputs = Vec::with_capacity(texts.len());
        for batch in texts.chunks(chunk) {
            for text in batch {
                if text.trim().is_empty() {
                    outputs.push(EmbeddingOutput::zero(self.model_name(), self.dimension()));
                    continue;
                }
                match self.embed_text(text).await {
                    Ok(output) => outputs.push(output),
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                    Err(e) => {
                        tracing::warn!("batch embedding item failed, using zero vector: {e}");
                        outputs.push(EmbeddingOutput::zero(self.model_name(), self.dimension()));
                    }
                }
            }
        }
        Ok(outputs)
    }

    /// Fixed vector length produced by this provider
    fn dimension(&self) -> usize;

    /// Model identifier reported in outputs
    fn model_name(&self) -> &str;
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity between two vectors (0.0 on dimension mismatch)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean distance between two vectors (MAX on dimension mismatch)
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ============================================================================
// HASHING EMBEDDER
// ============================================================================

/// Deterministic feature-hashing embedder.
///
/// Hashes character bigrams and trigrams into a fixed-dimension vector and
/// L2-normalizes. No model download, no network, stable across runs.
/// Semantically crude, but monotone in lexical overlap, which is what the
/// offline path and the test suite need.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn feature_index(&self, gram: &str) -> (usize, f32) {
        let digest = Sha256::digest(gram.as_bytes());
        let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap_or([0u8; 8]));
        // One hash bit decides sign so collisions cancel rather than pile up.
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((bucket % self.dimension as u64) as usize, sign)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation("cannot embed empty text".to_string()));
        }

        let chars: Vec<char> = trimmed.to_lowercase().chars().collect();
        let mut vector = vec![0.0f32; self.dimension];

        for n in [2usize, 3] {
            if chars.len() < n {
                let gram: String = chars.iter().collect();
                let (idx, sign) = self.feature_index(&gram);
                vector[idx] += sign;
                continue;
            }
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                let (idx, sign) = self.feature_index(&gram);
                vector[idx] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        Ok(EmbeddingOutput {
            vector,
            model: self.model_name().to_string(),
            dimension: self.dimension,
            usage: None,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "memoria/hashing-ngram"
    }
}
