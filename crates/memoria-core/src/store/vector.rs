//! Dense vector store.
//!
//! A USearch HNSW index keyed by internal integer ids, with bidirectional
//! `external <-> internal` maps on top. The index is created lazily on
//! the first insertion. Deletion is tombstone-based: only the mapping is
//! removed, the slot stays in the index and search drops unmapped hits.
//! When the tombstone ratio passes the configured threshold a warning is
//! surfaced and the caller should invoke [`VectorStore::rebuild`] with
//! the live vectors.
//!
//! Lock discipline: one `RwLock` over the whole state - many concurrent
//! readers during `search`, an exclusive writer during `add`, `delete`,
//! and `rebuild`.
//!
//! Persistence is two files, the index and a companion JSON mapping file;
//! loading requires both.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::VectorConfig;
use crate::error::{CoreError, Result};
use crate::store::Store;

// ============================================================================
// TYPES
// ============================================================================

/// One nearest-neighbor hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorHit {
    /// External document id
    pub id: String,
    /// Similarity score `1 / (1 + d)` for L2 distance `d`, in (0, 1]
    pub score: f32,
}

/// Index occupancy statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreStats {
    /// Mapped (live) vectors
    pub live: usize,
    /// Index slots including tombstones
    pub total: usize,
    /// `1 - live/total` (0 when empty)
    pub tombstone_ratio: f64,
    /// Vector dimensions
    pub dimensions: usize,
}

#[derive(Serialize, Deserialize)]
struct MappingFile {
    ext_to_int: HashMap<String, u64>,
    next_id: u64,
}

struct VectorState {
    index: Option<Index>,
    ext_to_int: HashMap<String, u64>,
    int_to_ext: HashMap<u64, String>,
    next_id: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// Tombstoning HNSW vector store
pub struct VectorStore {
    config: VectorConfig,
    state: RwLock<VectorState>,
}

impl VectorStore {
    /// Create an empty store; the index itself is built on first insert
    pub fn new(config: VectorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(VectorState {
                index: None,
                ext_to_int: HashMap::new(),
                int_to_ext: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Vector dimensions this store accepts
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn make_index(config: &VectorConfig) -> Result<Index> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };
        Index::new(&options).map_err(|e| CoreError::Backend(format!("index creation failed: {e}")))
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(CoreError::Validation(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Insert or replace a vector under an external id.
    ///
    /// Replacement removes the old slot and re-adds under the same
    /// internal id, so the swap is atomic from a reader's view of the
    /// mapping.
    pub fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;

        if state.index.is_none() {
            state.index = Some(Self::make_index(&self.config)?);
        }

        if let Some(&existing) = state.ext_to_int.get(id) {
            let index = state.index.as_ref().ok_or_else(index_missing)?;
            index
                .remove(existing)
                .map_err(|e| CoreError::Backend(format!("vector replace failed: {e}")))?;
            reserve_for(index, index.size() + 1)?;
            index
                .add(existing, vector)
                .map_err(|e| CoreError::Backend(format!("vector replace failed: {e}")))?;
            return Ok(());
        }

        let internal = state.next_id;
        {
            let index = state.index.as_ref().ok_or_else(index_missing)?;
            if index.size() >= index.capacity() {
                let target = (index.capacity() * 2).max(16);
                reserve_for(index, target)?;
            }
            index
                .add(internal, vector)
                .map_err(|e| CoreError::Backend(format!("vector add failed: {e}")))?;
        }
        state.next_id += 1;
        state.ext_to_int.insert(id.to_string(), internal);
        state.int_to_ext.insert(internal, id.to_string());
        Ok(())
    }

    /// k-nearest-neighbor search by L2 distance.
    ///
    /// Tombstoned slots are skipped; the score is `1/(1+d)`.
    pub fn knn(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.check_dimensions(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().map_err(|_| lock_poisoned())?;
        let Some(index) = state.index.as_ref() else {
            return Ok(Vec::new());
        };
        if state.ext_to_int.is_empty() {
            return Ok(Vec::new());
        }

        // Oversample so tombstoned slots cannot starve the result set.
        let tombstones = index.size().saturating_sub(state.ext_to_int.len());
        let fetch = (k + tombstones).min(index.size());

        let matches = index
            .search(query, fetch)
            .map_err(|e| CoreError::Backend(format!("vector search failed: {e}")))?;

        let mut hits = Vec::with_capacity(k);
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(external) = state.int_to_ext.get(key) else {
                continue; // tombstone
            };
            hits.push(VectorHit {
                id: external.clone(),
                score: 1.0 / (1.0 + distance.max(0.0)),
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Tombstone a vector: drop the mapping, keep the index slot.
    ///
    /// Returns false if the id was not mapped. Surfaces a warning when
    /// the tombstone ratio crosses the rebuild threshold.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let Some(internal) = state.ext_to_int.remove(id) else {
            return Ok(false);
        };
        state.int_to_ext.remove(&internal);

        let total = state.index.as_ref().map(|i| i.size()).unwrap_or(0);
        let live = state.ext_to_int.len();
        if total > 0 {
            let ratio = 1.0 - live as f64 / total as f64;
            if ratio > self.config.rebuild_threshold {
                tracing::warn!(
                    live,
                    total,
                    "vector index tombstone ratio {ratio:.2} above threshold, rebuild recommended"
                );
            }
        }
        Ok(true)
    }

    /// Whether an external id is currently mapped
    pub fn contains(&self, id: &str) -> bool {
        self.state
            .read()
            .map(|s| s.ext_to_int.contains_key(id))
            .unwrap_or(false)
    }

    /// Compact the index from the supplied live vectors.
    ///
    /// Replaces the index and both maps wholesale; tombstones are gone
    /// afterwards.
    pub fn rebuild(&self, live: Vec<(String, Vec<f32>)>) -> Result<()> {
        for (_, vector) in &live {
            self.check_dimensions(vector)?;
        }

        let index = Self::make_index(&self.config)?;
        reserve_for(&index, live.len().max(16))?;

        let mut ext_to_int = HashMap::with_capacity(live.len());
        let mut int_to_ext = HashMap::with_capacity(live.len());
        for (next_id, (id, vector)) in live.iter().enumerate() {
            let internal = next_id as u64;
            index
                .add(internal, vector)
                .map_err(|e| CoreError::Backend(format!("rebuild add failed: {e}")))?;
            ext_to_int.insert(id.clone(), internal);
            int_to_ext.insert(internal, id.clone());
        }

        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        *state = VectorState {
            index: Some(index),
            next_id: live.len() as u64,
            ext_to_int,
            int_to_ext,
        };
        Ok(())
    }

    /// Occupancy statistics
    pub fn stats(&self) -> VectorStoreStats {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => {
                return VectorStoreStats {
                    live: 0,
                    total: 0,
                    tombstone_ratio: 0.0,
                    dimensions: self.config.dimensions,
                };
            }
        };
        let live = state.ext_to_int.len();
        let total = state.index.as_ref().map(|i| i.size()).unwrap_or(0);
        VectorStoreStats {
            live,
            total,
            tombstone_ratio: if total == 0 {
                0.0
            } else {
                1.0 - live as f64 / total as f64
            },
            dimensions: self.config.dimensions,
        }
    }

    /// Persist the index and its mapping file.
    ///
    /// `path` is the index file; the mappings go to
    /// `path.with_extension("mappings.json")`. Both are required for a
    /// later [`VectorStore::load`].
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        let Some(index) = state.index.as_ref() else {
            return Err(CoreError::Validation(
                "cannot persist an empty vector store".to_string(),
            ));
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| CoreError::Validation("non-UTF-8 index path".to_string()))?;
        index
            .save(path_str)
            .map_err(|e| CoreError::Backend(format!("index save failed: {e}")))?;

        let mapping = MappingFile {
            ext_to_int: state.ext_to_int.clone(),
            next_id: state.next_id,
        };
        let mapping_json = serde_json::to_string(&mapping)
            .map_err(|e| CoreError::Backend(format!("mapping serialization failed: {e}")))?;
        std::fs::write(mapping_path(path), mapping_json)?;
        Ok(())
    }

    /// Load a persisted store. Fails unless both the index file and the
    /// mapping file are present and consistent.
    pub fn load(path: &Path, config: VectorConfig) -> Result<Self> {
        let mappings = mapping_path(path);
        if !path.exists() || !mappings.exists() {
            return Err(CoreError::NotFound(format!(
                "vector store load requires both {} and {}",
                path.display(),
                mappings.display()
            )));
        }

        let index = Self::make_index(&config)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| CoreError::Validation("non-UTF-8 index path".to_string()))?;
        index
            .load(path_str)
            .map_err(|e| CoreError::Backend(format!("index load failed: {e}")))?;

        let mapping_json = std::fs::read_to_string(&mappings)?;
        let mapping: MappingFile = serde_json::from_str(&mapping_json)
            .map_err(|e| CoreError::Parse(format!("mapping file malformed: {e}")))?;

        let int_to_ext = mapping
            .ext_to_int
            .iter()
            .map(|(k, &v)| (v, k.clone()))
            .collect();

        Ok(Self {
            config,
            state: RwLock::new(VectorState {
                index: Some(index),
                ext_to_int: mapping.ext_to_int,
                int_to_ext,
                next_id: mapping.next_id,
            }),
        })
    }
}

fn mapping_path(path: &Path) -> std::path::PathBuf {
    path.with_extension("mappings.json")
}

fn reserve_for(index: &Index, capacity: usize) -> Result<()> {
    index
        .reserve(capacity)
        .map_err(|e| CoreError::Backend(format!("index reserve failed: {e}")))
}

fn lock_poisoned() -> CoreError {
    CoreError::Backend("vector store lock poisoned".to_string())
}

fn index_missing() -> CoreError {
    CoreError::Backend("vector index missing after lazy init".to_string())
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

#[async_trait]
impl Store for VectorStore {
    type Item = Vec<f32>;
    type Patch = Vec<f32>;
    type Query = Vec<f32>;
    type Hit = VectorHit;

    async fn initialize(&self) -> Result<()> {
        // Index creation is lazy; nothing to prepare.
        Ok(())
    }

    async fn add(&self, id: &str, item: Vec<f32>) -> Result<()> {
        self.insert(id, &item)
    }

    async fn get(&self, _id: &str) -> Result<Option<Vec<f32>>> {
        Err(CoreError::Unsupported(
            "vector store does not support get; fetch content from the catalog".to_string(),
        ))
    }

    async fn update(&self, id: &str, patch: Vec<f32>) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.insert(id, &patch)?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.remove(id)
    }

    async fn search(&self, query: &Vec<f32>, k: usize) -> Result<Vec<VectorHit>> {
        self.knn(query, k)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.stats().live)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        *state = VectorState {
            index: None,
            ext_to_int: HashMap::new(),
            int_to_ext: HashMap::new(),
            next_id: 0,
        };
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VectorConfig {
        VectorConfig {
            dimensions: 8,
            ..Default::default()
        }
    }

    fn test_vector(seed: f32) -> Vec<f32> {
        (0..8).map(|i| ((i as f32 + seed) / 8.0).sin()).collect()
    }

    #[test]
    fn test_insert_and_knn() {
        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        store.insert("doc-2", &test_vector(2.0)).unwrap();
        store.insert("doc-3", &test_vector(40.0)).unwrap();

        let hits = store.knn(&test_vector(1.0), 3).unwrap();
        assert_eq!(hits[0].id, "doc-1");
        assert!(hits[0].score > hits[1].score);
        // Exact match at distance zero scores 1.0.
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_store_search() {
        let store = VectorStore::new(small_config());
        assert!(store.knn(&test_vector(1.0), 5).unwrap().is_empty());
    }

    #[test]
    fn test_k_zero() {
        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        assert!(store.knn(&test_vector(1.0), 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let store = VectorStore::new(small_config());
        let result = store.insert("doc-1", &[1.0, 2.0]);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_delete_tombstones() {
        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        store.insert("doc-2", &test_vector(2.0)).unwrap();

        assert!(store.remove("doc-1").unwrap());
        // Idempotent second delete.
        assert!(!store.remove("doc-1").unwrap());

        let stats = store.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.total, 2);
        assert!((stats.tombstone_ratio - 0.5).abs() < 1e-9);

        // Tombstoned id never surfaces in search results.
        let hits = store.knn(&test_vector(1.0), 2).unwrap();
        assert!(hits.iter().all(|h| h.id != "doc-1"));
    }

    #[test]
    fn test_tombstone_compaction() {
        let store = VectorStore::new(small_config());
        for i in 0..100 {
            store.insert(&format!("doc-{i}"), &test_vector(i as f32)).unwrap();
        }
        for i in 0..40 {
            store.remove(&format!("doc-{i}")).unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.live, 60);
        assert_eq!(stats.total, 100);
        assert!((stats.tombstone_ratio - 0.4).abs() < 1e-9);

        let live: Vec<(String, Vec<f32>)> = (40..100)
            .map(|i| (format!("doc-{i}"), test_vector(i as f32)))
            .collect();
        store.rebuild(live).unwrap();

        let stats = store.stats();
        assert_eq!(stats.live, 60);
        assert_eq!(stats.total, 60);
        assert_eq!(stats.tombstone_ratio, 0.0);

        // Rebuilt index still answers correctly.
        let hits = store.knn(&test_vector(50.0), 1).unwrap();
        assert_eq!(hits[0].id, "doc-50");
    }

    #[test]
    fn test_replace_keeps_count() {
        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        store.insert("doc-1", &test_vector(9.0)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.live, 1);

        let hits = store.knn(&test_vector(9.0), 1).unwrap();
        assert_eq!(hits[0].id, "doc-1");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_get_is_unsupported() {
        let store = VectorStore::new(small_config());
        let result = Store::get(&store, "doc-1").await;
        assert!(matches!(result, Err(CoreError::Unsupported(_))));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.usearch");

        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        store.insert("doc-2", &test_vector(2.0)).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path, small_config()).unwrap();
        assert_eq!(loaded.stats().live, 2);
        let hits = loaded.knn(&test_vector(2.0), 1).unwrap();
        assert_eq!(hits[0].id, "doc-2");
    }

    #[test]
    fn test_load_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.usearch");

        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        store.save(&path).unwrap();

        std::fs::remove_file(mapping_path(&path)).unwrap();
        let result = VectorStore::load(&path, small_config());
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = VectorStore::new(small_config());
        store.insert("doc-1", &test_vector(1.0)).unwrap();
        Store::clear(&store).await.unwrap();
        assert_eq!(store.stats().live, 0);
        assert_eq!(store.stats().total, 0);
    }
}
