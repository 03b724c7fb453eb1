//! Storage primitives.
//!
//! Three independent stores behind one CRUD+search contract: the dense
//! vector index, the property graph, and the metadata catalog. The
//! catalog is the authoritative answer to "does this document exist";
//! vector and graph presence are flags its rows carry.
//!
//! Writes are not transactional across stores; the memory engine
//! ([`crate::memory`]) performs best-effort compensation when a
//! multi-store write partially fails.

pub mod catalog;
pub mod graph;
pub mod schema;
pub mod vector;

pub use catalog::{CatalogFilter, CatalogRow, MetadataCatalog, RowPatch, RowStatus};
pub use graph::{
    Direction, GraphBackend, GraphEdge, GraphNode, GraphPipeline, GraphStore, MemoryGraphBackend,
    NodeQuery,
};
pub use schema::{GraphDomain, NodeLabel, RelationType};
pub use vector::{VectorHit, VectorStore, VectorStoreStats};

use async_trait::async_trait;

use crate::error::Result;

/// Uniform CRUD+search contract implemented by every storage primitive.
///
/// Stores differ in what they hold, so the item, patch, query, and hit
/// shapes are associated types; the operation set and its semantics are
/// identical. An operation a store cannot express (the vector store's
/// `get`) fails with [`crate::error::CoreError::Unsupported`] rather
/// than being absent.
#[async_trait]
pub trait Store: Send + Sync {
    /// What the store holds
    type Item;
    /// Shape of a partial update
    type Patch;
    /// Shape of a search query
    type Query;
    /// Shape of a search hit
    type Hit;

    /// Prepare backing state (schemas, indexes); idempotent
    async fn initialize(&self) -> Result<()>;

    /// Insert an item under an external id
    async fn add(&self, id: &str, item: Self::Item) -> Result<()>;

    /// Fetch an item by id (None if absent)
    async fn get(&self, id: &str) -> Result<Option<Self::Item>>;

    /// Apply a partial update; false if the id is absent
    async fn update(&self, id: &str, patch: Self::Patch) -> Result<bool>;

    /// Delete by id; idempotent, false if the id was already absent
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Search for up to `k` hits
    async fn search(&self, query: &Self::Query, k: usize) -> Result<Vec<Self::Hit>>;

    /// Number of live items
    async fn count(&self) -> Result<usize>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}
