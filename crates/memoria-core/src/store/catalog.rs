//! Metadata catalog.
//!
//! A SQLite row store keyed by document id, indexed on `doc_type`,
//! `status`, `timestamp`, and `layer`. This is the authoritative source
//! for "does this document exist"; the vector and graph stores only mark
//! their presence through the `stored_in_vector` / `stored_in_graph`
//! flags.
//!
//! Separate reader/writer connections give interior mutability with
//! `&self` methods; writes are serialized within the process through the
//! writer mutex.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RetentionConfig;
use crate::error::{CoreError, Result};
use crate::model::{DataLayer, DocumentType, RetentionType};
use crate::store::Store;

// ============================================================================
// MIGRATIONS
// ============================================================================

/// A schema migration
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "documents table with storage flags and indexes",
        up: r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    source TEXT,
    timestamp TEXT NOT NULL,

    -- vector store presence
    layer TEXT NOT NULL DEFAULT 'hot',
    stored_in_vector INTEGER NOT NULL DEFAULT 0,

    -- graph store presence
    graph_node_id TEXT,
    entities TEXT NOT NULL DEFAULT '[]',
    stored_in_graph INTEGER NOT NULL DEFAULT 0,

    -- state
    status TEXT NOT NULL DEFAULT 'active',
    importance REAL NOT NULL DEFAULT 0.5,
    retention_type TEXT NOT NULL DEFAULT 'temporary',

    -- memory annotations
    emotion TEXT,
    category TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',

    -- access tracking
    access_count INTEGER NOT NULL DEFAULT 0,
    last_access TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_doc_type ON documents(doc_type);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_timestamp ON documents(timestamp);
CREATE INDEX IF NOT EXISTS idx_documents_layer ON documents(layer);
"#,
    },
    Migration {
        version: 2,
        description: "retention sweep support",
        up: r#"
CREATE INDEX IF NOT EXISTS idx_documents_retention ON documents(retention_type, timestamp);
"#,
    },
];

fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.description,
                Utc::now().to_rfc3339()
            ],
        )?;
        tracing::info!(
            version = migration.version,
            "applied catalog migration: {}",
            migration.description
        );
    }
    Ok(())
}

// ============================================================================
// ROW TYPES
// ============================================================================

/// Row lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Live row
    #[default]
    Active,
    /// Soft-deleted row
    Deleted,
}

impl RowStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Active => "active",
            RowStatus::Deleted => "deleted",
        }
    }

    fn parse_name(s: &str) -> Self {
        match s {
            "deleted" => RowStatus::Deleted,
            _ => RowStatus::Active,
        }
    }
}

/// A catalog row: the document fields plus storage flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRow {
    /// Document id
    pub id: String,
    /// Document content
    pub content: String,
    /// Document kind
    pub doc_type: DocumentType,
    /// Provenance tag
    pub source: Option<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Age-based storage layer
    pub layer: DataLayer,
    /// Present in the vector index
    pub stored_in_vector: bool,
    /// Graph node id, when mirrored into the graph
    pub graph_node_id: Option<String>,
    /// Entities extracted at ingest
    pub entities: Vec<String>,
    /// Present in the graph
    pub stored_in_graph: bool,
    /// Lifecycle status
    pub status: RowStatus,
    /// Importance in [0, 1]
    pub importance: f64,
    /// Retention policy
    pub retention_type: RetentionType,
    /// Emotion tag
    pub emotion: Option<String>,
    /// Free-form category
    pub category: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Open annotations
    pub metadata: BTreeMap<String, Value>,
    /// Recall count
    pub access_count: i64,
    /// Last recall time
    pub last_access: Option<DateTime<Utc>>,
}

impl CatalogRow {
    /// Project the row onto the plain document view (no storage flags)
    pub fn to_document(&self) -> crate::model::Document {
        crate::model::Document {
            id: self.id.clone(),
            content: self.content.clone(),
            doc_type: self.doc_type,
            source: self.source.clone(),
            timestamp: self.timestamp,
            entities: self.entities.clone(),
            importance: self.importance,
            retention_type: self.retention_type,
            metadata: self.metadata.clone(),
            access_count: self.access_count,
            last_access: self.last_access,
        }
    }

    /// A minimal active row with defaults
    pub fn new(id: impl Into<String>, content: impl Into<String>, doc_type: DocumentType) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            doc_type,
            source: None,
            timestamp: Utc::now(),
            layer: DataLayer::Hot,
            stored_in_vector: false,
            graph_node_id: None,
            entities: Vec::new(),
            stored_in_graph: false,
            status: RowStatus::Active,
            importance: 0.5,
            retention_type: RetentionType::Temporary,
            emotion: None,
            category: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            access_count: 0,
            last_access: None,
        }
    }
}

/// Partial update of a row
#[derive(Debug, Clone, Default)]
pub struct RowPatch {
    /// New importance
    pub importance: Option<f64>,
    /// New status
    pub status: Option<RowStatus>,
    /// New vector presence flag
    pub stored_in_vector: Option<bool>,
    /// New graph presence flag
    pub stored_in_graph: Option<bool>,
    /// New graph node id
    pub graph_node_id: Option<String>,
    /// New layer
    pub layer: Option<DataLayer>,
    /// Replacement metadata map
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Replacement entities
    pub entities: Option<Vec<String>>,
}

impl RowPatch {
    fn is_empty(&self) -> bool {
        self.importance.is_none()
            && self.status.is_none()
            && self.stored_in_vector.is_none()
            && self.stored_in_graph.is_none()
            && self.graph_node_id.is_none()
            && self.layer.is_none()
            && self.metadata.is_none()
            && self.entities.is_none()
    }
}

/// Row filter for list/count/search
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    /// Equality on doc_type
    pub doc_type: Option<DocumentType>,
    /// Equality on status (defaults to active everywhere it matters)
    pub status: Option<RowStatus>,
    /// Equality on layer
    pub layer: Option<DataLayer>,
    /// Inclusive lower timestamp bound
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound
    pub before: Option<DateTime<Utc>>,
    /// Minimum importance
    pub min_importance: Option<f64>,
    /// Equality on category
    pub category: Option<String>,
}

impl CatalogFilter {
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = vec!["1=1".to_string()];
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(doc_type) = self.doc_type {
            clauses.push(format!("doc_type = ?{}", values.len() + 1));
            values.push(SqlValue::Text(doc_type.as_str().to_string()));
        }
        if let Some(status) = self.status {
            clauses.push(format!("status = ?{}", values.len() + 1));
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(layer) = self.layer {
            clauses.push(format!("layer = ?{}", values.len() + 1));
            values.push(SqlValue::Text(layer.as_str().to_string()));
        }
        if let Some(after) = self.after {
            clauses.push(format!("timestamp >= ?{}", values.len() + 1));
            values.push(SqlValue::Text(after.to_rfc3339()));
        }
        if let Some(before) = self.before {
            clauses.push(format!("timestamp <= ?{}", values.len() + 1));
            values.push(SqlValue::Text(before.to_rfc3339()));
        }
        if let Some(min) = self.min_importance {
            clauses.push(format!("importance >= ?{}", values.len() + 1));
            values.push(SqlValue::Real(min));
        }
        if let Some(category) = &self.category {
            clauses.push(format!("category = ?{}", values.len() + 1));
            values.push(SqlValue::Text(category.clone()));
        }

        (clauses.join(" AND "), values)
    }
}

// ============================================================================
// CATALOG
// ============================================================================

const ROW_COLUMNS: &str = "id, content, doc_type, source, timestamp, layer, stored_in_vector, \
     graph_node_id, entities, stored_in_graph, status, importance, retention_type, \
     emotion, category, tags, metadata, access_count, last_access";

/// SQLite-backed metadata catalog
pub struct MetadataCatalog {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl MetadataCatalog {
    /// Open (or create) a catalog at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -32000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| CoreError::Backend("catalog writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| CoreError::Backend("catalog reader lock poisoned".to_string()))
    }

    fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogRow> {
        let doc_type: String = row.get(2)?;
        let timestamp: String = row.get(4)?;
        let layer: String = row.get(5)?;
        let entities: String = row.get(8)?;
        let status: String = row.get(10)?;
        let retention: String = row.get(12)?;
        let tags: String = row.get(15)?;
        let metadata: String = row.get(16)?;
        let last_access: Option<String> = row.get(18)?;

        Ok(CatalogRow {
            id: row.get(0)?,
            content: row.get(1)?,
            doc_type: DocumentType::parse_name(&doc_type).unwrap_or_default(),
            source: row.get(3)?,
            timestamp: parse_timestamp(&timestamp),
            layer: DataLayer::parse_name(&layer).unwrap_or_default(),
            stored_in_vector: row.get::<_, i64>(6)? != 0,
            graph_node_id: row.get(7)?,
            entities: serde_json::from_str(&entities).unwrap_or_default(),
            stored_in_graph: row.get::<_, i64>(9)? != 0,
            status: RowStatus::parse_name(&status),
            importance: row.get(11)?,
            retention_type: RetentionType::parse_name(&retention).unwrap_or_default(),
            emotion: row.get(13)?,
            category: row.get(14)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            access_count: row.get(17)?,
            last_access: last_access.map(|t| parse_timestamp(&t)),
        })
    }

    /// Insert a row; fails with `Conflict` on duplicate id
    pub fn insert(&self, row: &CatalogRow) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.writer()?;
        let result = conn.execute(
            "INSERT INTO documents (
                id, content, doc_type, source, timestamp, layer, stored_in_vector,
                graph_node_id, entities, stored_in_graph, status, importance,
                retention_type, emotion, category, tags, metadata,
                access_count, last_access, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21
            )",
            params![
                row.id,
                row.content,
                row.doc_type.as_str(),
                row.source,
                row.timestamp.to_rfc3339(),
                row.layer.as_str(),
                row.stored_in_vector as i64,
                row.graph_node_id,
                serde_json::to_string(&row.entities).unwrap_or_else(|_| "[]".to_string()),
                row.stored_in_graph as i64,
                row.status.as_str(),
                row.importance,
                row.retention_type.as_str(),
                row.emotion,
                row.category,
                serde_json::to_string(&row.tags).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&row.metadata).unwrap_or_else(|_| "{}".to_string()),
                row.access_count,
                row.last_access.map(|t| t.to_rfc3339()),
                now,
                now,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CoreError::Conflict(format!("document {} exists", row.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one row by id
    pub fn fetch(&self, id: &str) -> Result<Option<CatalogRow>> {
        let conn = self.reader()?;
        let row = conn
            .query_row(
                &format!("SELECT {ROW_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                Self::row_from,
            )
            .optional()?;
        Ok(row)
    }

    /// Bulk fetch by ids, preserving only rows that exist
    pub fn fetch_many(&self, ids: &[String]) -> Result<Vec<CatalogRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM documents WHERE id IN ({})",
            placeholders.join(",")
        );
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), Self::row_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply a partial update
    pub fn patch(&self, id: &str, patch: &RowPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.fetch(id)?.is_some());
        }

        let mut sets = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(importance) = patch.importance {
            sets.push(format!("importance = ?{}", values.len() + 1));
            values.push(SqlValue::Real(importance));
        }
        if let Some(status) = patch.status {
            sets.push(format!("status = ?{}", values.len() + 1));
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(flag) = patch.stored_in_vector {
            sets.push(format!("stored_in_vector = ?{}", values.len() + 1));
            values.push(SqlValue::Integer(flag as i64));
        }
        if let Some(flag) = patch.stored_in_graph {
            sets.push(format!("stored_in_graph = ?{}", values.len() + 1));
            values.push(SqlValue::Integer(flag as i64));
        }
        if let Some(node_id) = &patch.graph_node_id {
            sets.push(format!("graph_node_id = ?{}", values.len() + 1));
            values.push(SqlValue::Text(node_id.clone()));
        }
        if let Some(layer) = patch.layer {
            sets.push(format!("layer = ?{}", values.len() + 1));
            values.push(SqlValue::Text(layer.as_str().to_string()));
        }
        if let Some(metadata) = &patch.metadata {
            sets.push(format!("metadata = ?{}", values.len() + 1));
            values.push(SqlValue::Text(
                serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string()),
            ));
        }
        if let Some(entities) = &patch.entities {
            sets.push(format!("entities = ?{}", values.len() + 1));
            values.push(SqlValue::Text(
                serde_json::to_string(entities).unwrap_or_else(|_| "[]".to_string()),
            ));
        }

        sets.push(format!("updated_at = ?{}", values.len() + 1));
        values.push(SqlValue::Text(Utc::now().to_rfc3339()));

        let sql = format!(
            "UPDATE documents SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len() + 1
        );
        values.push(SqlValue::Text(id.to_string()));

        let conn = self.writer()?;
        let changed = conn.execute(&sql, params_from_iter(values))?;
        Ok(changed > 0)
    }

    /// Bump `access_count` and set `last_access`
    pub fn record_access(&self, id: &str) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE documents SET access_count = access_count + 1,
                 last_access = ?1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Hard-delete a row; idempotent
    pub fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Soft-delete a row (status = deleted)
    pub fn mark_deleted(&self, id: &str) -> Result<bool> {
        self.patch(
            id,
            &RowPatch {
                status: Some(RowStatus::Deleted),
                ..Default::default()
            },
        )
    }

    /// List rows matching a filter, newest first
    pub fn list(&self, filter: &CatalogFilter, limit: usize, offset: usize) -> Result<Vec<CatalogRow>> {
        let (clause, mut values) = filter.where_clause();
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM documents WHERE {clause} \
             ORDER BY timestamp DESC LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2
        );
        values.push(SqlValue::Integer(limit as i64));
        values.push(SqlValue::Integer(offset as i64));

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::row_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Count rows matching a filter
    pub fn count_where(&self, filter: &CatalogFilter) -> Result<usize> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {clause}");
        let conn = self.reader()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete rows whose retention TTL has elapsed; returns their ids so
    /// the caller can drop vector mappings.
    pub fn sweep_expired(&self, retention: &RetentionConfig, now: DateTime<Utc>) -> Result<Vec<String>> {
        let temporary_cutoff =
            (now - chrono::Duration::days(retention.temporary_ttl_days)).to_rfc3339();
        let casual_cutoff = (now - chrono::Duration::days(retention.casual_ttl_days)).to_rfc3339();

        let conn = self.writer()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM documents WHERE
                 (retention_type = 'temporary' AND timestamp < ?1)
                 OR (retention_type = 'casual_chat' AND timestamp < ?2)",
        )?;
        let expired: Vec<String> = stmt
            .query_map(params![temporary_cutoff, casual_cutoff], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for id in &expired {
            conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        }
        Ok(expired)
    }

    /// Recompute hot/warm/cold layers from row age; returns rows changed
    pub fn reclassify_layers(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let mut stmt = conn.prepare("SELECT id, timestamp, layer FROM documents")?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut changed = 0;
        for (id, timestamp, layer) in rows {
            let age_days = (now - parse_timestamp(&timestamp)).num_days();
            let target = DataLayer::from_age_days(age_days);
            if target.as_str() != layer {
                conn.execute(
                    "UPDATE documents SET layer = ?1, updated_at = ?2 WHERE id = ?3",
                    params![target.as_str(), now.to_rfc3339(), id],
                )?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

#[async_trait]
impl Store for MetadataCatalog {
    type Item = CatalogRow;
    type Patch = RowPatch;
    type Query = CatalogFilter;
    type Hit = CatalogRow;

    async fn initialize(&self) -> Result<()> {
        // Migrations ran at open; re-running is a no-op by design.
        let conn = self.writer()?;
        apply_migrations(&conn)
    }

    async fn add(&self, id: &str, mut item: CatalogRow) -> Result<()> {
        item.id = id.to_string();
        self.insert(&item)
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogRow>> {
        self.fetch(id)
    }

    async fn update(&self, id: &str, patch: RowPatch) -> Result<bool> {
        self.patch(id, &patch)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.remove(id)
    }

    async fn search(&self, query: &CatalogFilter, k: usize) -> Result<Vec<CatalogRow>> {
        self.list(query, k, 0)
    }

    async fn count(&self) -> Result<usize> {
        self.count_where(&CatalogFilter {
            status: Some(RowStatus::Active),
            ..Default::default()
        })
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute("DELETE FROM documents", [])?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
