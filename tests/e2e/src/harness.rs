//! Engine assembly over temporary storage.

use std::sync::Arc;

use memoria_core::{
    CapabilityFactory, CatalogRow, DocumentType, EmbeddingProvider, EngineConfig, GraphEdge,
    GraphNode, GraphStore, MemoryEngine, MetadataCatalog, NodeLabel, RelationType, Retriever,
    VectorStore,
};
use serde_json::json;

/// Embedding dimension used across the e2e suite (kept small for speed)
pub const TEST_DIMENSIONS: usize = 64;

/// A fully wired engine over a temp directory.
///
/// All components come from one factory tag, so the stores seeded here
/// are exactly the stores the engines read.
pub struct TestWorld {
    /// The factory everything came from
    pub factory: CapabilityFactory,
    /// Shared embedder
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Shared vector store
    pub vector: Arc<VectorStore>,
    /// Shared catalog
    pub catalog: Arc<MetadataCatalog>,
    /// Shared graph store
    pub graph: Arc<GraphStore>,
    /// Strategy-dispatching retriever
    pub retriever: Arc<Retriever>,
    /// Memory engine
    pub memory: Arc<MemoryEngine>,
    _dir: tempfile::TempDir,
}

impl TestWorld {
    /// Assemble a world with default configuration
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        config.embedding.dimension = TEST_DIMENSIONS;
        config.vector.dimensions = TEST_DIMENSIONS;

        let factory = CapabilityFactory::new(config);
        let embedder = factory.embedder("default").expect("embedder");
        let vector = factory.vector_store("default").expect("vector store");
        let catalog = factory.catalog("default").expect("catalog");
        let graph = factory.graph_store("default").expect("graph store");
        let retriever = factory.retriever("default").expect("retriever");
        let memory = factory.memory_engine("default").expect("memory engine");

        Self {
            factory,
            embedder,
            vector,
            catalog,
            graph,
            retriever,
            memory,
            _dir: dir,
        }
    }

    /// Seed a knowledge document into the vector index and the catalog
    pub async fn seed_document(&self, id: &str, content: &str) {
        let embedded = self.embedder.embed_text(content).await.expect("embed");
        self.vector.insert(id, &embedded.vector).expect("vector insert");

        let mut row = CatalogRow::new(id, content, DocumentType::RagKnowledge);
        row.stored_in_vector = true;
        self.catalog.insert(&row).expect("catalog insert");
    }

    /// Seed a named entity node linked to a document node in the graph
    pub async fn seed_graph_link(&self, entity_name: &str, doc_id: &str, title: &str) {
        let mut entity_props = serde_json::Map::new();
        entity_props.insert("name".to_string(), json!(entity_name));
        let entity = self
            .graph
            .create_node(GraphNode::new(NodeLabel::Entity, entity_props))
            .await
            .expect("entity node");

        let mut doc_props = serde_json::Map::new();
        doc_props.insert("title".to_string(), json!(title));
        doc_props.insert("doc_id".to_string(), json!(doc_id));
        let doc_node = self
            .graph
            .create_node(GraphNode::new(NodeLabel::Document, doc_props))
            .await
            .expect("document node");

        self.graph
            .create_edge(GraphEdge::new(entity, doc_node, RelationType::Mentions))
            .await
            .expect("edge");
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
