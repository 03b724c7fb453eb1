//! Capability assembly.
//!
//! The one place concrete store types, detectors, and transports meet.
//! Components are constructed on demand and memoized by a caller-supplied
//! string tag, so every caller asking for `"default"` shares one vector
//! store, one catalog, one embedder. The tagless `create_*` variants
//! return fresh instances and cache nothing.
//!
//! There is no module-level mutable state: callers own the factory and
//! pass it (or the components it built) down explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::embedding::{EmbeddingProvider, HashingEmbedder};
use crate::error::Result;
use crate::llm::LmTransport;
use crate::memory::{MemoryEngine, RetentionClassifier};
use crate::nlp::emotion::EmotionDetector;
use crate::nlp::intent::IntentRecognizer;
use crate::nlp::ner::EntityExtractor;
use crate::retrieval::Retriever;
use crate::store::catalog::MetadataCatalog;
use crate::store::graph::{GraphBackend, GraphPipeline, GraphStore, MemoryGraphBackend};
use crate::store::schema::GraphDomain;
use crate::store::vector::VectorStore;

type GraphBackendFactory = Box<dyn Fn() -> Arc<dyn GraphBackend> + Send + Sync>;

/// Tag-keyed component container
pub struct CapabilityFactory {
    config: EngineConfig,
    transport: Option<Arc<dyn LmTransport>>,
    graph_backend_factory: Option<GraphBackendFactory>,

    embedders: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    vector_stores: Mutex<HashMap<String, Arc<VectorStore>>>,
    catalogs: Mutex<HashMap<String, Arc<MetadataCatalog>>>,
    graph_stores: Mutex<HashMap<String, Arc<GraphStore>>>,
    extractors: Mutex<HashMap<String, Arc<EntityExtractor>>>,
    emotion_detectors: Mutex<HashMap<String, Arc<EmotionDetector>>>,
    intent_recognizers: Mutex<HashMap<String, Arc<IntentRecognizer>>>,
    memory_engines: Mutex<HashMap<String, Arc<MemoryEngine>>>,
    retrievers: Mutex<HashMap<String, Arc<Retriever>>>,
}

impl CapabilityFactory {
    /// Create a factory over a configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport: None,
            graph_backend_factory: None,
            embedders: Mutex::default(),
            vector_stores: Mutex::default(),
            catalogs: Mutex::default(),
            graph_stores: Mutex::default(),
            extractors: Mutex::default(),
            emotion_detectors: Mutex::default(),
            intent_recognizers: Mutex::default(),
            memory_engines: Mutex::default(),
            retrievers: Mutex::default(),
        }
    }

    /// Wire a language-model transport; detectors and rerankers built
    /// afterwards get their LM levels.
    pub fn with_transport(mut self, transport: Arc<dyn LmTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire a graph backend constructor (a Cypher driver in production);
    /// the in-process backend is the default.
    pub fn with_graph_backend(
        mut self,
        factory: impl Fn() -> Arc<dyn GraphBackend> + Send + Sync + 'static,
    ) -> Self {
        self.graph_backend_factory = Some(Box::new(factory));
        self
    }

    /// The active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn memoize<T: ?Sized, F>(
        slot: &Mutex<HashMap<String, Arc<T>>>,
        tag: &str,
        build: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<Arc<T>>,
    {
        let mut slots = slot
            .lock()
            .map_err(|_| crate::error::CoreError::Backend("factory lock poisoned".to_string()))?;
        if let Some(existing) = slots.get(tag) {
            return Ok(existing.clone());
        }
        let built = build()?;
        slots.insert(tag.to_string(), built.clone());
        Ok(built)
    }

    // ------------------------------------------------------------------
    // Foundation components
    // ------------------------------------------------------------------

    /// Shared embedding provider for a tag
    pub fn embedder(&self, tag: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        Self::memoize(&self.embedders, tag, || Ok(self.create_embedder()))
    }

    /// Fresh embedding provider
    pub fn create_embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder::new(self.config.embedding.dimension))
    }

    /// Shared vector store for a tag
    pub fn vector_store(&self, tag: &str) -> Result<Arc<VectorStore>> {
        Self::memoize(&self.vector_stores, tag, || Ok(self.create_vector_store()))
    }

    /// Fresh vector store
    pub fn create_vector_store(&self) -> Arc<VectorStore> {
        Arc::new(VectorStore::new(self.config.vector.clone()))
    }

    /// Shared metadata catalog for a tag (file per tag under the data dir)
    pub fn catalog(&self, tag: &str) -> Result<Arc<MetadataCatalog>> {
        Self::memoize(&self.catalogs, tag, || self.create_catalog(tag))
    }

    /// Fresh metadata catalog for a tag
    pub fn create_catalog(&self, tag: &str) -> Result<Arc<MetadataCatalog>> {
        let dir = self.config.resolve_data_dir()?;
        let path = dir.join(format!("{tag}.catalog.db"));
        Ok(Arc::new(MetadataCatalog::open(&path)?))
    }

    /// Shared graph store for a tag
    pub fn graph_store(&self, tag: &str) -> Result<Arc<GraphStore>> {
        Self::memoize(&self.graph_stores, tag, || Ok(self.create_graph_store()))
    }

    /// Fresh graph store over the configured backend
    pub fn create_graph_store(&self) -> Arc<GraphStore> {
        let backend: Arc<dyn GraphBackend> = match &self.graph_backend_factory {
            Some(factory) => factory(),
            None => Arc::new(MemoryGraphBackend::new()),
        };
        Arc::new(GraphStore::new(backend))
    }

    /// Domain-bound graph pipeline over the tag's shared graph store
    pub fn graph_pipeline(&self, tag: &str, domain: GraphDomain) -> Result<GraphPipeline> {
        Ok(GraphPipeline::new(self.graph_store(tag)?, domain))
    }

    // ------------------------------------------------------------------
    // Detectors
    // ------------------------------------------------------------------

    /// Shared entity extractor for a tag
    pub fn entity_extractor(&self, tag: &str) -> Result<Arc<EntityExtractor>> {
        Self::memoize(&self.extractors, tag, || Ok(self.create_entity_extractor()))
    }

    /// Fresh entity extractor
    pub fn create_entity_extractor(&self) -> Arc<EntityExtractor> {
        let cascade = self.config.cascade.clone();
        match &self.transport {
            Some(transport) => Arc::new(EntityExtractor::with_llm(
                cascade,
                transport.clone(),
                self.config.llm.clone(),
            )),
            None => Arc::new(EntityExtractor::rule_only(cascade)),
        }
    }

    /// Shared emotion detector for a tag
    pub fn emotion_detector(&self, tag: &str) -> Result<Arc<EmotionDetector>> {
        Self::memoize(&self.emotion_detectors, tag, || {
            Ok(self.create_emotion_detector())
        })
    }

    /// Fresh emotion detector
    pub fn create_emotion_detector(&self) -> Arc<EmotionDetector> {
        let cascade = self.config.cascade.clone();
        match &self.transport {
            Some(transport) => Arc::new(EmotionDetector::with_llm(
                cascade,
                transport.clone(),
                self.config.llm.clone(),
            )),
            None => Arc::new(EmotionDetector::rule_only(cascade)),
        }
    }

    /// Shared intent recognizer for a tag
    pub fn intent_recognizer(&self, tag: &str) -> Result<Arc<IntentRecognizer>> {
        Self::memoize(&self.intent_recognizers, tag, || {
            let ner = self.entity_extractor(tag)?;
            Ok(self.create_intent_recognizer(Some(ner)))
        })
    }

    /// Fresh intent recognizer
    pub fn create_intent_recognizer(
        &self,
        ner: Option<Arc<EntityExtractor>>,
    ) -> Arc<IntentRecognizer> {
        let cascade = self.config.cascade.clone();
        match &self.transport {
            Some(transport) => Arc::new(IntentRecognizer::with_llm(
                cascade,
                transport.clone(),
                self.config.llm.clone(),
                ner,
            )),
            None => Arc::new(IntentRecognizer::rule_only(cascade, ner)),
        }
    }

    // ------------------------------------------------------------------
    // Engines
    // ------------------------------------------------------------------

    /// Shared memory engine for a tag
    pub fn memory_engine(&self, tag: &str) -> Result<Arc<MemoryEngine>> {
        Self::memoize(&self.memory_engines, tag, || {
            let classifier = match &self.transport {
                Some(transport) => RetentionClassifier::with_llm(
                    self.config.retention.clone(),
                    transport.clone(),
                    self.config.llm.clone(),
                ),
                None => RetentionClassifier::new(self.config.retention.clone()),
            };
            Ok(Arc::new(MemoryEngine::new(
                self.embedder(tag)?,
                self.vector_store(tag)?,
                self.catalog(tag)?,
                classifier,
                self.config.memory.clone(),
            )))
        })
    }

    /// Shared retriever for a tag
    pub fn retriever(&self, tag: &str) -> Result<Arc<Retriever>> {
        Self::memoize(&self.retrievers, tag, || {
            Ok(Arc::new(Retriever::new(
                self.embedder(tag)?,
                self.vector_store(tag)?,
                self.catalog(tag)?,
                Some(self.graph_store(tag)?),
                Some(self.entity_extractor(tag)?),
                self.transport.clone(),
                self.config.retrieval.clone(),
                self.config.llm.clone(),
            )))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
