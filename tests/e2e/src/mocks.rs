//! Scripted doubles for the external transports.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;
use memoria_core::{
    ChunkStream, CoreError, EmbeddingOutput, EmbeddingProvider, FinishReason, LmOptions,
    LmResponse, LmTransport, LmUsage, Message,
};

// ============================================================================
// SCRIPTED LM TRANSPORT
// ============================================================================

/// An LM transport that replays canned responses and records every
/// prompt it receives.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    configured: bool,
}

impl ScriptedTransport {
    /// A transport that will answer with the given responses, in order
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            configured: true,
        }
    }

    /// A transport with no responses; every call errors
    pub fn empty() -> Self {
        Self::with_responses(Vec::<String>::new())
    }

    /// A transport reporting itself unconfigured
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::empty()
        }
    }

    /// Number of generate calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt this transport has seen
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LmTransport for ScriptedTransport {
    async fn generate(&self, messages: &[Message], _options: &LmOptions) -> Result<LmResponse, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(content) => Ok(LmResponse {
                content,
                usage: LmUsage::default(),
                finish_reason: FinishReason::Stop,
                metadata: serde_json::Map::new(),
            }),
            None => Err(CoreError::Backend("scripted transport exhausted".to_string())),
        }
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &LmOptions,
    ) -> Result<ChunkStream, CoreError> {
        let response = self.generate(messages, options).await?;
        Ok(Box::pin(stream::iter(vec![Ok(response.content)])))
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

// ============================================================================
// FAILING EMBEDDER
// ============================================================================

/// An embedding provider whose every call fails with a backend error
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    /// Build a failing provider of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_text(&self, _text: &str) -> Result<EmbeddingOutput, CoreError> {
        Err(CoreError::Backend("embedding service down".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "test/failing"
    }
}
