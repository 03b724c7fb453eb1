//! Language-model transport.
//!
//! The engine consumes LMs through [`LmTransport`] and owns none of the
//! protocol. Cascade levels, the semantic reranker, and the retention
//! classifier all speak to this trait; the factory decides which concrete
//! transport (if any) is wired in.
//!
//! Helpers here keep the call discipline uniform: a 60-second ceiling per
//! call ([`crate::config::LmConfig`]), exponential-backoff retry on
//! backend failure, and permissive parsing of model JSON output.

mod json;
mod retry;

pub use json::{extract_json, extract_json_array};
pub use retry::{call_with_policy, with_retry};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// MESSAGES
// ============================================================================

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User turn
    User,
    /// Model turn
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Speaker role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Message {
    /// A system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// OPTIONS AND RESPONSES
// ============================================================================

/// Sampling options for one generate call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmOptions {
    /// Sampling temperature
    pub temperature: f64,
    /// Output token cap
    pub max_tokens: u32,
    /// Nucleus sampling mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

impl LmOptions {
    /// Low-temperature options for classification-style calls
    pub fn deterministic(max_tokens: u32) -> Self {
        Self {
            temperature: 0.1,
            max_tokens,
            ..Default::default()
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop
    Stop,
    /// Hit max_tokens
    Length,
    /// Provider-side filter
    ContentFilter,
    /// Unknown / not reported
    Other,
}

/// Token usage for one call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmUsage {
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
}

/// Response from a blocking generate call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmResponse {
    /// Generated text
    pub content: String,
    /// Token accounting
    pub usage: LmUsage,
    /// Stop reason
    pub finish_reason: FinishReason,
    /// Provider-specific annotations
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Cooperative stream of generated text chunks
pub type ChunkStream = BoxStream<'static, Result<String>>;

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Language-model transport consumed by the engine
#[async_trait]
pub trait LmTransport: Send + Sync {
    /// Blocking generation
    async fn generate(&self, messages: &[Message], options: &LmOptions) -> Result<LmResponse>;

    /// Streaming generation; dropping the stream aborts the call
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &LmOptions,
    ) -> Result<ChunkStream>;

    /// Cheap synchronous token estimate
    fn estimate_tokens(&self, text: &str) -> usize;

    /// Whether credentials/endpoint are present
    fn is_configured(&self) -> bool;
}
