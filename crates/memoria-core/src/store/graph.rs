//! Property graph store.
//!
//! The engine consumes graph storage through [`GraphBackend`], a typed
//! node/edge CRUD surface. Production backends translate these calls to
//! a Cypher-compatible driver (the conventional graph names are
//! `life_graph` and `work_graph`); [`MemoryGraphBackend`] is the
//! in-process reference implementation used for embedded operation and
//! tests.
//!
//! [`GraphStore`] layers schema validation and merge (upsert) semantics
//! on top of a backend. [`GraphPipeline`] binds a store to one domain
//! and refuses to write labels outside it.
//!
//! Edges are bitemporal: `valid_from <= valid_until` when both are set,
//! and `valid_until = None` means "still true". Queries may filter to
//! edges valid at a point in time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::store::Store;
use crate::store::schema::{GraphDomain, NodeLabel, RelationType};

// ============================================================================
// TYPES
// ============================================================================

/// A labeled node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Stable external id
    pub id: String,
    /// Closed-set label
    pub label: NodeLabel,
    /// Property map
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// Create a node with a fresh UUID id
    pub fn new(label: NodeLabel, properties: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label,
            properties,
        }
    }

    /// Create a node with an explicit id
    pub fn with_id(
        id: impl Into<String>,
        label: NodeLabel,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            label,
            properties,
        }
    }

    /// A string property, if present
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// A directed, bitemporal edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Edge id
    pub id: String,
    /// Source node id
    pub source_id: String,
    /// Target node id
    pub target_id: String,
    /// Closed-set relation
    pub relation: RelationType,
    /// Property map
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Relationship strength
    pub weight: f32,
    /// When the relationship became true
    pub valid_from: DateTime<Utc>,
    /// When it stopped being true (None = still true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl GraphEdge {
    /// Create an edge valid from now, open-ended
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: RelationType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation,
            properties: Map::new(),
            weight: 1.0,
            valid_from: Utc::now(),
            valid_until: None,
        }
    }

    /// Whether the edge was valid at `time` (inclusive bounds)
    pub fn valid_at(&self, time: DateTime<Utc>) -> bool {
        self.valid_from <= time && self.valid_until.is_none_or(|until| time <= until)
    }

    /// Whether the edge is still open-ended
    pub fn is_open(&self) -> bool {
        self.valid_until.is_none()
    }

    fn check_validity(&self) -> Result<()> {
        if let Some(until) = self.valid_until {
            if self.valid_from > until {
                return Err(CoreError::Validation(format!(
                    "edge {}: valid_from {} is after valid_until {}",
                    self.id, self.valid_from, until
                )));
            }
        }
        Ok(())
    }
}

/// Neighbor enumeration direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges leaving the node
    Outgoing,
    /// Edges arriving at the node
    Incoming,
    /// Both directions
    Both,
}

/// Node lookup query for `find_nodes` / `search`
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    /// Restrict to a label
    pub label: Option<NodeLabel>,
    /// Equality filters on properties
    pub properties: Map<String, Value>,
}

impl NodeQuery {
    /// Query by label only
    pub fn by_label(label: NodeLabel) -> Self {
        Self {
            label: Some(label),
            properties: Map::new(),
        }
    }

    /// Add a property equality filter
    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    fn matches(&self, node: &GraphNode) -> bool {
        if let Some(label) = self.label {
            if node.label != label {
                return false;
            }
        }
        self.properties
            .iter()
            .all(|(key, value)| node.properties.get(key) == Some(value))
    }
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// Graph persistence consumed by the engine.
///
/// Implementations are expected to be Cypher-compatible drivers in
/// production; schema-mutating work (index creation) happens once inside
/// [`GraphBackend::initialize`] and nowhere else.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Create backend schema (indexes); idempotent
    async fn initialize(&self) -> Result<()>;

    /// Insert a node; fails with `Conflict` if the id exists
    async fn create_node(&self, node: GraphNode) -> Result<String>;

    /// Fetch a node by id
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Merge properties into a node; false if absent
    async fn update_node(&self, id: &str, properties: Map<String, Value>) -> Result<bool>;

    /// Delete a node and its incident edges; false if absent
    async fn delete_node(&self, id: &str) -> Result<bool>;

    /// Insert an edge; both endpoints must exist
    async fn create_edge(&self, edge: GraphEdge) -> Result<String>;

    /// Merge properties / close validity on an edge; false if absent
    async fn update_edge(
        &self,
        id: &str,
        properties: Map<String, Value>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Delete an edge; false if absent
    async fn delete_edge(&self, id: &str) -> Result<bool>;

    /// Enumerate neighbors with their connecting edges
    async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        relation: Option<RelationType>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<(GraphEdge, GraphNode)>>;

    /// All edges between two nodes (either direction)
    async fn edges_between(&self, source_id: &str, target_id: &str) -> Result<Vec<GraphEdge>>;

    /// Find nodes matching a query
    async fn find_nodes(&self, query: &NodeQuery, limit: usize) -> Result<Vec<GraphNode>>;

    /// Node count
    async fn count_nodes(&self) -> Result<usize>;

    /// Drop all nodes and edges
    async fn clear(&self) -> Result<()>;
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
}

/// In-process reference backend over hash maps
#[derive(Default)]
pub struct MemoryGraphBackend {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, GraphInner>> {
        self.inner
            .read()
            .map_err(|_| CoreError::Backend("graph lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, GraphInner>> {
        self.inner
            .write()
            .map_err(|_| CoreError::Backend("graph lock poisoned".to_string()))
    }
}

#[async_trait]
impl GraphBackend for MemoryGraphBackend {
    async fn initialize(&self) -> Result<()> {
        // Nothing to prepare for the in-memory variant.
        Ok(())
    }

    async fn create_node(&self, node: GraphNode) -> Result<String> {
        let mut inner = self.write()?;
        if inner.nodes.contains_key(&node.id) {
            return Err(CoreError::Conflict(format!("node {} exists", node.id)));
        }
        let id = node.id.clone();
        inner.nodes.insert(id.clone(), node);
        Ok(id)
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self.read()?.nodes.get(id).cloned())
    }

    async fn update_node(&self, id: &str, properties: Map<String, Value>) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.nodes.get_mut(id) {
            Some(node) => {
                for (key, value) in properties {
                    node.properties.insert(key, value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.nodes.remove(id).is_none() {
            return Ok(false);
        }
        let incident: Vec<String> = inner
            .outgoing
            .remove(id)
            .unwrap_or_default()
            .into_iter()
            .chain(inner.incoming.remove(id).unwrap_or_default())
            .collect();
        for edge_id in incident {
            if let Some(edge) = inner.edges.remove(&edge_id) {
                if let Some(out) = inner.outgoing.get_mut(&edge.source_id) {
                    out.retain(|e| e != &edge_id);
                }
                if let Some(inc) = inner.incoming.get_mut(&edge.target_id) {
                    inc.retain(|e| e != &edge_id);
                }
            }
        }
        Ok(true)
    }

    async fn create_edge(&self, edge: GraphEdge) -> Result<String> {
        edge.check_validity()?;
        let mut inner = self.write()?;
        if !inner.nodes.contains_key(&edge.source_id) {
            return Err(CoreError::NotFound(format!(
                "edge source {} missing",
                edge.source_id
            )));
        }
        if !inner.nodes.contains_key(&edge.target_id) {
            return Err(CoreError::NotFound(format!(
                "edge target {} missing",
                edge.target_id
            )));
        }
        let id = edge.id.clone();
        inner
            .outgoing
            .entry(edge.source_id.clone())
            .or_default()
            .push(id.clone());
        inner
            .incoming
            .entry(edge.target_id.clone())
            .or_default()
            .push(id.clone());
        inner.edges.insert(id.clone(), edge);
        Ok(id)
    }

    async fn update_edge(
        &self,
        id: &str,
        properties: Map<String, Value>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.edges.get_mut(id) {
            Some(edge) => {
                if let Some(until) = valid_until {
                    if edge.valid_from > until {
                        return Err(CoreError::Validation(format!(
                            "edge {id}: valid_until {until} precedes valid_from {}",
                            edge.valid_from
                        )));
                    }
                    edge.valid_until = Some(until);
                }
                for (key, value) in properties {
                    edge.properties.insert(key, value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.edges.remove(id) {
            Some(edge) => {
                if let Some(out) = inner.outgoing.get_mut(&edge.source_id) {
                    out.retain(|e| e != id);
                }
                if let Some(inc) = inner.incoming.get_mut(&edge.target_id) {
                    inc.retain(|e| e != id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        relation: Option<RelationType>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<(GraphEdge, GraphNode)>> {
        let inner = self.read()?;
        let mut edge_ids: Vec<&String> = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            if let Some(out) = inner.outgoing.get(id) {
                edge_ids.extend(out.iter());
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            if let Some(inc) = inner.incoming.get(id) {
                edge_ids.extend(inc.iter());
            }
        }

        let mut results = Vec::new();
        for edge_id in edge_ids {
            let Some(edge) = inner.edges.get(edge_id) else {
                continue;
            };
            if let Some(wanted) = relation {
                if edge.relation != wanted {
                    continue;
                }
            }
            if let Some(time) = valid_at {
                if !edge.valid_at(time) {
                    continue;
                }
            }
            let other_id = if edge.source_id == id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if let Some(node) = inner.nodes.get(other_id) {
                results.push((edge.clone(), node.clone()));
            }
        }
        Ok(results)
    }

    async fn edges_between(&self, source_id: &str, target_id: &str) -> Result<Vec<GraphEdge>> {
        let inner = self.read()?;
        Ok(inner
            .edges
            .values()
            .filter(|e| {
                (e.source_id == source_id && e.target_id == target_id)
                    || (e.source_id == target_id && e.target_id == source_id)
            })
            .cloned()
            .collect())
    }

    async fn find_nodes(&self, query: &NodeQuery, limit: usize) -> Result<Vec<GraphNode>> {
        let inner = self.read()?;
        let mut nodes: Vec<GraphNode> = inner
            .nodes
            .values()
            .filter(|node| query.matches(node))
            .cloned()
            .collect();
        // Stable output order regardless of map iteration.
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn count_nodes(&self) -> Result<usize> {
        Ok(self.read()?.nodes.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        *inner = GraphInner::default();
        Ok(())
    }
}

// ============================================================================
// GRAPH STORE
// ============================================================================

/// Schema-validating graph store over a backend
pub struct GraphStore {
    backend: Arc<dyn GraphBackend>,
}

impl GraphStore {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self { backend }
    }

    /// The wrapped backend
    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    /// Create a node after validating it against the label schema
    pub async fn create_node(&self, node: GraphNode) -> Result<String> {
        node.label.validate_properties(&node.properties)?;
        self.backend.create_node(node).await
    }

    /// Fetch a node by id
    pub async fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.backend.get_node(id).await
    }

    /// Merge-or-create by identity `(label, primary key property)`.
    ///
    /// Returns the node id. Identity follows the label schema: the first
    /// required property is the key.
    pub async fn merge_node(
        &self,
        label: NodeLabel,
        properties: Map<String, Value>,
    ) -> Result<String> {
        label.validate_properties(&properties)?;
        let key = label.primary_key();
        let key_value = properties.get(key).cloned().ok_or_else(|| {
            CoreError::Validation(format!("merge on {} requires '{}'", label.as_str(), key))
        })?;

        let query = NodeQuery::by_label(label).with_property(key, key_value);
        let existing = self.backend.find_nodes(&query, 1).await?;
        match existing.into_iter().next() {
            Some(node) => {
                self.backend.update_node(&node.id, properties).await?;
                Ok(node.id)
            }
            None => self.backend.create_node(GraphNode::new(label, properties)).await,
        }
    }

    /// Create an edge
    pub async fn create_edge(&self, edge: GraphEdge) -> Result<String> {
        self.backend.create_edge(edge).await
    }

    /// Close an edge's validity as of `until`
    pub async fn close_edge(&self, id: &str, until: DateTime<Utc>) -> Result<bool> {
        self.backend.update_edge(id, Map::new(), Some(until)).await
    }

    /// Neighbors of a node
    pub async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        relation: Option<RelationType>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<(GraphEdge, GraphNode)>> {
        self.backend.neighbors(id, direction, relation, valid_at).await
    }

    /// All edges between two nodes
    pub async fn edges_between(&self, source_id: &str, target_id: &str) -> Result<Vec<GraphEdge>> {
        self.backend.edges_between(source_id, target_id).await
    }

    /// Find nodes matching a query
    pub async fn find_nodes(&self, query: &NodeQuery, limit: usize) -> Result<Vec<GraphNode>> {
        self.backend.find_nodes(query, limit).await
    }
}

#[async_trait]
impl Store for GraphStore {
    type Item = GraphNode;
    type Patch = Map<String, Value>;
    type Query = NodeQuery;
    type Hit = GraphNode;

    async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    async fn add(&self, id: &str, mut item: GraphNode) -> Result<()> {
        item.id = id.to_string();
        self.create_node(item).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<GraphNode>> {
        self.backend.get_node(id).await
    }

    async fn update(&self, id: &str, patch: Map<String, Value>) -> Result<bool> {
        self.backend.update_node(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.backend.delete_node(id).await
    }

    async fn search(&self, query: &NodeQuery, k: usize) -> Result<Vec<GraphNode>> {
        self.backend.find_nodes(query, k).await
    }

    async fn count(&self) -> Result<usize> {
        self.backend.count_nodes().await
    }

    async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }
}

// ============================================================================
// DOMAIN PIPELINES
// ============================================================================

/// A graph write path bound to one label domain.
///
/// Writing a label outside the domain fails validation before touching
/// the backend.
pub struct GraphPipeline {
    store: Arc<GraphStore>,
    domain: GraphDomain,
}

impl GraphPipeline {
    /// Bind a store to a domain
    pub fn new(store: Arc<GraphStore>, domain: GraphDomain) -> Self {
        Self { store, domain }
    }

    /// The pipeline's domain
    pub fn domain(&self) -> GraphDomain {
        self.domain
    }

    fn check_label(&self, label: NodeLabel) -> Result<()> {
        if !self.domain.allows(label) {
            return Err(CoreError::Validation(format!(
                "label {} is outside the {} domain",
                label.as_str(),
                self.domain.graph_name()
            )));
        }
        Ok(())
    }

    /// Merge-or-create a node, enforcing the domain partition
    pub async fn upsert_node(
        &self,
        label: NodeLabel,
        properties: Map<String, Value>,
    ) -> Result<String> {
        self.check_label(label)?;
        self.store.merge_node(label, properties).await
    }

    /// Connect two nodes already in the domain graph
    pub async fn connect(
        &self,
        source_id: &str,
        target_id: &str,
        relation: RelationType,
    ) -> Result<String> {
        self.store
            .create_edge(GraphEdge::new(source_id, target_id, relation))
            .await
    }
}

// ============================================================================
// TESTS
// ============================================================================
