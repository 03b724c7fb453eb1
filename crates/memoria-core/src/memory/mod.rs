//! Memory engine.
//!
//! CRUD over content + embedding + metadata, coordinating the vector
//! store and the catalog under one contract. Recall combines vector
//! similarity with per-day time decay and an importance weight:
//!
//! `score = vector_score * decay_factor^days * (0.5 + 0.5 * importance)`
//!
//! Days are whole days (floor); sub-day age decays nothing.
//!
//! Writes are compensated, not transactional: a vector failure still
//! writes the catalog row (with `stored_in_vector = false`); a catalog
//! failure rolls the vector insert back and surfaces.

pub mod retention;

pub use retention::{RETENTION_HINT_KEY, RetentionClassifier};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde_json::Value;

use crate::config::MemoryConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, Result};
use crate::inference::InferenceContext;
use crate::model::{DocumentType, MemoryItem, RetentionType, StoreOutcome};
use crate::store::catalog::{CatalogRow, MetadataCatalog, RowPatch, RowStatus};
use crate::store::vector::VectorStore;

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for storing a memory
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    /// The content to remember
    pub content: String,
    /// Importance in [0, 1]
    pub importance: f64,
    /// Emotion tag
    pub emotion: Option<String>,
    /// Free-form category
    pub category: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Open annotations
    pub metadata: BTreeMap<String, Value>,
    /// Retention policy for the new memory
    pub retention_type: RetentionType,
}

impl MemoryDraft {
    /// A draft with default importance (0.5) and temporary retention
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            importance: 0.5,
            emotion: None,
            category: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            retention_type: RetentionType::Temporary,
        }
    }

    /// Set importance, builder-style
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }
}

/// Filters for memory recall
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    /// Equality on category
    pub category: Option<String>,
    /// Keep memories sharing at least one of these tags
    pub tags: Vec<String>,
}

impl MemoryFilters {
    fn passes(&self, row: &CatalogRow) -> bool {
        if let Some(category) = &self.category {
            if row.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| row.tags.contains(t)) {
            return false;
        }
        true
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Memory store with time-decayed, importance-weighted recall
pub struct MemoryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<VectorStore>,
    catalog: Arc<MetadataCatalog>,
    classifier: RetentionClassifier,
    config: MemoryConfig,
    id_clock: AtomicI64,
}

impl MemoryEngine {
    /// Assemble the engine over shared stores
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<VectorStore>,
        catalog: Arc<MetadataCatalog>,
        classifier: RetentionClassifier,
        config: MemoryConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            catalog,
            classifier,
            config,
            id_clock: AtomicI64::new(0),
        }
    }

    /// Derive a monotonic `mem_<micros>` id; the clock never repeats even
    /// for same-microsecond stores.
    fn next_id(&self) -> String {
        let now = Utc::now().timestamp_micros();
        let mut previous = self.id_clock.load(Ordering::Relaxed);
        let micros = loop {
            let candidate = now.max(previous + 1);
            match self.id_clock.compare_exchange_weak(
                previous,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => previous = actual,
            }
        };
        format!("mem_{micros}")
    }

    fn validate_draft(draft: &MemoryDraft) -> Result<()> {
        if draft.content.trim().is_empty() {
            return Err(CoreError::Validation("memory content is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&draft.importance) {
            return Err(CoreError::Validation(format!(
                "importance must be in [0, 1]: {}",
                draft.importance
            )));
        }
        Ok(())
    }

    /// Store a memory.
    ///
    /// Returns the assigned id. Fails on validation errors and catalog
    /// write failure; a vector-side failure degrades to a catalog-only
    /// row.
    pub async fn store(&self, draft: MemoryDraft) -> Result<String> {
        Self::validate_draft(&draft)?;

        let id = self.next_id();
        let persist_vector = draft.retention_type != RetentionType::CasualChat;

        let mut stored_in_vector = false;
        if persist_vector {
            match self.embedder.embed_text(&draft.content).await {
                Ok(embedded) => match self.vector.insert(&id, &embedded.vector) {
                    Ok(()) => stored_in_vector = true,
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                    Err(e) => {
                        tracing::warn!("vector insert failed for {id}, catalog row only: {e}");
                    }
                },
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    tracing::warn!("embedding failed for {id}, catalog row only: {e}");
                }
            }
        }

        let mut row = CatalogRow::new(id.as_str(), draft.content.as_str(), DocumentType::MemConversation);
        row.stored_in_vector = stored_in_vector;
        row.importance = draft.importance;
        row.retention_type = draft.retention_type;
        row.emotion = draft.emotion;
        row.category = draft.category;
        row.tags = draft.tags;
        row.metadata = draft.metadata;

        if let Err(e) = self.catalog.insert(&row) {
            // Compensate: the vector insert must not outlive the row.
            if stored_in_vector {
                if let Err(rollback) = self.vector.remove(&id) {
                    tracing::warn!("rollback of vector insert {id} failed: {rollback}");
                }
            }
            return Err(e);
        }

        tracing::debug!(memory = %id, "stored memory");
        Ok(id)
    }

    /// Classify retention for a message, then store accordingly.
    ///
    /// `casual_chat` content is not persisted to the vector index; its
    /// catalog row lingers transiently under the casual TTL, and the
    /// caller is told `stored: false`.
    pub async fn remember(
        &self,
        message: &str,
        context: &InferenceContext,
        mut draft: MemoryDraft,
    ) -> Result<StoreOutcome> {
        let retention = self.classifier.classify(message, context).await?;
        draft.content = message.to_string();
        draft.retention_type = retention;

        let id = self.store(draft).await?;
        Ok(StoreOutcome {
            stored: retention != RetentionType::CasualChat,
            id: Some(id),
            retention,
        })
    }

    /// Recall memories for a query.
    ///
    /// Non-fatal backend errors degrade to an empty list; cancellation
    /// propagates.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        time_decay: bool,
        importance_threshold: f64,
        filters: &MemoryFilters,
    ) -> Result<Vec<MemoryItem>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let embedded = match self.embedder.embed_text(query).await {
            Ok(embedded) => embedded,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                tracing::warn!("recall embedding failed: {e}");
                return Ok(Vec::new());
            }
        };

        let hits = match self.vector.knn(&embedded.vector, top_k * 2) {
            Ok(hits) => hits,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                tracing::warn!("recall vector search failed: {e}");
                return Ok(Vec::new());
            }
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let rows = match self.catalog.fetch_many(&ids) {
            Ok(rows) => rows,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                tracing::warn!("recall catalog fetch failed: {e}");
                return Ok(Vec::new());
            }
        };
        let row_map: std::collections::HashMap<String, CatalogRow> =
            rows.into_iter().map(|row| (row.id.clone(), row)).collect();

        let now = Utc::now();
        let mut scored: Vec<MemoryItem> = Vec::new();
        for hit in hits {
            let Some(row) = row_map.get(&hit.id) else {
                continue; // stale index entry without a row
            };
            if row.status != RowStatus::Active || !filters.passes(row) {
                continue;
            }
            if row.importance < importance_threshold {
                continue;
            }

            let mut score = f64::from(hit.score);
            if time_decay {
                let days = (now - row.timestamp).num_days().max(0);
                score *= self.config.decay_factor.powi(days as i32);
            }
            score *= 0.5 + 0.5 * row.importance;

            scored.push(MemoryItem {
                id: row.id.clone(),
                content: row.content.clone(),
                timestamp: row.timestamp,
                importance: row.importance,
                emotion: row.emotion.clone(),
                category: row.category.clone(),
                tags: row.tags.clone(),
                metadata: row.metadata.clone(),
                access_count: row.access_count,
                score: score.clamp(0.0, 1.0),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(top_k);

        // Best-effort access-stat bump on what we return.
        for item in &scored {
            if let Err(e) = self.catalog.record_access(&item.id) {
                tracing::debug!("access bump failed for {}: {e}", item.id);
            }
        }

        Ok(scored)
    }

    /// Fetch one memory by id, bumping its access stats
    pub async fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        let Some(row) = self.catalog.fetch(id)? else {
            return Ok(None);
        };
        if row.status != RowStatus::Active {
            return Ok(None);
        }
        if let Err(e) = self.catalog.record_access(id) {
            tracing::debug!("access bump failed for {id}: {e}");
        }
        Ok(Some(MemoryItem {
            id: row.id,
            content: row.content,
            timestamp: row.timestamp,
            importance: row.importance,
            emotion: row.emotion,
            category: row.category,
            tags: row.tags,
            metadata: row.metadata,
            access_count: row.access_count + 1,
            score: 1.0,
        }))
    }

    /// Update a memory's importance; false when the id is absent
    pub async fn update_importance(&self, id: &str, importance: f64) -> Result<bool> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(CoreError::Validation(format!(
                "importance must be in [0, 1]: {importance}"
            )));
        }
        self.catalog.patch(
            id,
            &RowPatch {
                importance: Some(importance),
                ..Default::default()
            },
        )
    }

    /// Delete a memory; idempotent
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if let Err(e) = self.vector.remove(id) {
            tracing::warn!("vector delete failed for {id}: {e}");
        }
        self.catalog.remove(id)
    }

    /// Remove items whose retention TTL has elapsed; returns swept ids
    pub async fn sweep_expired(&self) -> Result<Vec<String>> {
        let swept = self
            .catalog
            .sweep_expired(self.classifier.config(), Utc::now())?;
        for id in &swept {
            if let Err(e) = self.vector.remove(id) {
                tracing::debug!("vector sweep failed for {id}: {e}");
            }
        }
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "swept expired memories");
        }
        Ok(swept)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionConfig, VectorConfig};
    use crate::embedding::HashingEmbedder;
    use chrono::Duration;

    const DIMS: usize = 64;

    struct Fixture {
        engine: MemoryEngine,
        vector: Arc<VectorStore>,
        catalog: Arc<MetadataCatalog>,
        embedder: Arc<HashingEmbedder>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashingEmbedder::new(DIMS));
        let vector = Arc::new(VectorStore::new(VectorConfig {
            dimensions: DIMS,
            ..Default::default()
        }));
        let catalog = Arc::new(MetadataCatalog::open(&dir.path().join("catalog.db")).unwrap());
        let engine = MemoryEngine::new(
            embedder.clone(),
            vector.clone(),
            catalog.clone(),
            RetentionClassifier::new(RetentionConfig::default()),
            MemoryConfig::default(),
        );
        Fixture {
            engine,
            vector,
            catalog,
            embedder,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_store_get_roundtrip() {
        let fx = fixture();
        let id = fx
            .engine
            .store(MemoryDraft::new("decided to rewrite the retrieval layer").with_importance(0.8))
            .await
            .unwrap();
        assert!(id.starts_with("mem_"));

        let item = fx.engine.get(&id).await.unwrap().unwrap();
        assert_eq!(item.content, "decided to rewrite the retrieval layer");
        assert_eq!(item.importance, 0.8);
        assert_eq!(item.access_count, 1);

        let row = fx.catalog.fetch(&id).unwrap().unwrap();
        assert!(row.stored_in_vector);
        assert!(fx.vector.contains(&id));
    }

    #[tokio::test]
    async fn test_validation() {
        let fx = fixture();
        assert!(fx.engine.store(MemoryDraft::new("   ")).await.is_err());
        assert!(fx
            .engine
            .store(MemoryDraft::new("valid").with_importance(1.5))
            .await
            .is_err());
        assert!(fx
            .engine
            .update_importance("mem_1", -0.1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_monotonic() {
        let fx = fixture();
        let mut previous = String::new();
        for i in 0..5 {
            let id = fx
                .engine
                .store(MemoryDraft::new(format!("memory number {i}")))
                .await
                .unwrap();
            assert!(id > previous, "{id} should sort after {previous}");
            previous = id;
        }
    }

    #[tokio::test]
    async fn test_remember_casual_not_stored_in_vector() {
        let fx = fixture();
        let outcome = fx
            .engine
            .remember("ok", &InferenceContext::new(), MemoryDraft::new(""))
            .await
            .unwrap();
        assert!(!outcome.stored);
        assert_eq!(outcome.retention, RetentionType::CasualChat);

        let id = outcome.id.unwrap();
        let row = fx.catalog.fetch(&id).unwrap().unwrap();
        assert!(!row.stored_in_vector);
        assert_eq!(row.retention_type, RetentionType::CasualChat);
        assert!(!fx.vector.contains(&id));
    }

    #[tokio::test]
    async fn test_remember_permanent_is_stored() {
        let fx = fixture();
        let outcome = fx
            .engine
            .remember("我今天决定重构检索层", &InferenceContext::new(), MemoryDraft::new(""))
            .await
            .unwrap();
        assert!(outcome.stored);
        assert_eq!(outcome.retention, RetentionType::Permanent);
        assert!(fx.vector.contains(&outcome.id.unwrap()));
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_relevance() {
        let fx = fixture();
        fx.engine
            .store(MemoryDraft::new("notes about quantum computing experiments"))
            .await
            .unwrap();
        fx.engine
            .store(MemoryDraft::new("pasta recipe with tomatoes"))
            .await
            .unwrap();

        let items = fx
            .engine
            .retrieve(
                "quantum computing",
                5,
                true,
                0.0,
                &MemoryFilters::default(),
            )
            .await
            .unwrap();
        assert!(!items.is_empty());
        assert!(items[0].content.contains("quantum"));
    }

    #[tokio::test]
    async fn test_time_decay_ranks_recent_first() {
        let fx = fixture();
        let content = "weekly report on the migration project status";
        let embedded = fx.embedder.embed_text(content).await.unwrap();

        let now = Utc::now();
        for (id, age_days) in [("mem_recent", 0i64), ("mem_old", 30)] {
            fx.vector.insert(id, &embedded.vector).unwrap();
            let mut row = CatalogRow::new(id, content, DocumentType::MemConversation);
            row.stored_in_vector = true;
            row.retention_type = RetentionType::Permanent;
            row.timestamp = now - Duration::days(age_days);
            fx.catalog.insert(&row).unwrap();
        }

        let items = fx
            .engine
            .retrieve(content, 2, true, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "mem_recent");
        assert_eq!(items[1].id, "mem_old");
        // 0.99^30 with identical vector scores and importance.
        let ratio = items[1].score / items[0].score;
        assert!((ratio - 0.99f64.powi(30)).abs() < 1e-6);

        // Without decay the two tie and the id breaks the tie.
        let undecayed = fx
            .engine
            .retrieve(content, 2, false, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        assert!((undecayed[0].score - undecayed[1].score).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_importance_threshold_boundary() {
        let fx = fixture();
        fx.engine
            .store(MemoryDraft::new("a memory with zero importance").with_importance(0.0))
            .await
            .unwrap();

        let included = fx
            .engine
            .retrieve("zero importance memory", 5, false, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(included.len(), 1);

        let excluded = fx
            .engine
            .retrieve("zero importance memory", 5, false, 0.01, &MemoryFilters::default())
            .await
            .unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_filters() {
        let fx = fixture();
        let mut work = MemoryDraft::new("sprint planning discussion about the parser");
        work.category = Some("work".to_string());
        work.tags = vec!["planning".to_string()];
        fx.engine.store(work).await.unwrap();

        let mut life = MemoryDraft::new("dinner plans discussion with family");
        life.category = Some("life".to_string());
        fx.engine.store(life).await.unwrap();

        let filtered = fx
            .engine
            .retrieve(
                "plans discussion",
                5,
                false,
                0.0,
                &MemoryFilters {
                    category: Some("work".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].content.contains("sprint"));

        let tagged = fx
            .engine
            .retrieve(
                "plans discussion",
                5,
                false,
                0.0,
                &MemoryFilters {
                    tags: vec!["planning".to_string(), "unused".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_k() {
        let fx = fixture();
        fx.engine.store(MemoryDraft::new("something")).await.unwrap();
        assert!(fx
            .engine
            .retrieve("", 5, true, 0.0, &MemoryFilters::default())
            .await
            .unwrap()
            .is_empty());
        assert!(fx
            .engine
            .retrieve("something", 0, true, 0.0, &MemoryFilters::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let fx = fixture();
        let id = fx.engine.store(MemoryDraft::new("to be deleted")).await.unwrap();

        assert!(fx.engine.delete(&id).await.unwrap());
        assert!(fx.engine.get(&id).await.unwrap().is_none());
        assert!(!fx.engine.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_access_stats_updated_on_retrieve() {
        let fx = fixture();
        let id = fx
            .engine
            .store(MemoryDraft::new("frequently accessed memory about caching"))
            .await
            .unwrap();

        fx.engine
            .retrieve("caching memory", 5, false, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        let row = fx.catalog.fetch(&id).unwrap().unwrap();
        assert_eq!(row.access_count, 1);
        assert!(row.last_access.is_some());
    }

    #[tokio::test]
    async fn test_sweep_expired_drops_vector_mapping() {
        let fx = fixture();
        let content = "an old todo item from last week";
        let embedded = fx.embedder.embed_text(content).await.unwrap();
        fx.vector.insert("mem_expired", &embedded.vector).unwrap();
        let mut row = CatalogRow::new("mem_expired", content, DocumentType::MemConversation);
        row.stored_in_vector = true;
        row.retention_type = RetentionType::Temporary;
        row.timestamp = Utc::now() - Duration::days(10);
        fx.catalog.insert(&row).unwrap();

        let swept = fx.engine.sweep_expired().await.unwrap();
        assert_eq!(swept, vec!["mem_expired".to_string()]);
        assert!(!fx.vector.contains("mem_expired"));
        assert!(fx.catalog.fetch("mem_expired").unwrap().is_none());
    }
}
