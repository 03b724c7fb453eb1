//! Vector index tombstone accounting, compaction, and persistence.

use memoria_core::{CoreError, Store, VectorConfig, VectorStore};
use memoria_e2e_tests::harness::TEST_DIMENSIONS;

fn store() -> VectorStore {
    VectorStore::new(VectorConfig {
        dimensions: TEST_DIMENSIONS,
        ..Default::default()
    })
}

fn vector(seed: f32) -> Vec<f32> {
    (0..TEST_DIMENSIONS)
        .map(|i| ((i as f32 + seed) / TEST_DIMENSIONS as f32).sin())
        .collect()
}

#[test]
fn tombstone_ratio_and_rebuild() {
    let store = store();
    for i in 0..100 {
        store.insert(&format!("doc-{i}"), &vector(i as f32)).unwrap();
    }
    for i in 0..40 {
        store.remove(&format!("doc-{i}")).unwrap();
    }

    // 60 live entries over 100 slots: ratio 0.4, above the 0.3 threshold.
    let stats = store.stats();
    assert_eq!(stats.live, 60);
    assert_eq!(stats.total, 100);
    assert!((stats.tombstone_ratio - 0.4).abs() < 1e-9);

    let live: Vec<(String, Vec<f32>)> = (40..100)
        .map(|i| (format!("doc-{i}"), vector(i as f32)))
        .collect();
    store.rebuild(live).unwrap();

    let stats = store.stats();
    assert_eq!(stats.live, 60);
    assert_eq!(stats.total, 60);
    assert_eq!(stats.tombstone_ratio, 0.0);

    // Searches keep working against the compacted index.
    let hits = store.knn(&vector(77.0), 1).unwrap();
    assert_eq!(hits[0].id, "doc-77");
}

#[test]
fn tombstoned_entries_never_surface() {
    let store = store();
    store.insert("doc-keep", &vector(1.0)).unwrap();
    store.insert("doc-drop", &vector(2.0)).unwrap();
    store.remove("doc-drop").unwrap();

    let hits = store.knn(&vector(2.0), 5).unwrap();
    assert!(hits.iter().all(|h| h.id != "doc-drop"));
    assert!(hits.iter().any(|h| h.id == "doc-keep"));
}

#[tokio::test]
async fn get_is_an_unsupported_operation() {
    let store = store();
    store.insert("doc-1", &vector(1.0)).unwrap();
    let result = Store::get(&store, "doc-1").await;
    assert!(matches!(result, Err(CoreError::Unsupported(_))));
}

#[test]
fn persistence_requires_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.usearch");

    let store = store();
    store.insert("doc-1", &vector(1.0)).unwrap();
    store.insert("doc-2", &vector(2.0)).unwrap();
    store.save(&path).unwrap();

    // Both files present: load works and answers.
    let loaded = VectorStore::load(
        &path,
        VectorConfig {
            dimensions: TEST_DIMENSIONS,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(loaded.stats().live, 2);
    assert_eq!(loaded.knn(&vector(1.0), 1).unwrap()[0].id, "doc-1");

    // Missing companion mapping file: load refuses.
    std::fs::remove_file(path.with_extension("mappings.json")).unwrap();
    let result = VectorStore::load(
        &path,
        VectorConfig {
            dimensions: TEST_DIMENSIONS,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[test]
fn replacement_is_atomic_for_readers() {
    let store = store();
    store.insert("doc-1", &vector(1.0)).unwrap();
    store.insert("doc-1", &vector(50.0)).unwrap();

    assert_eq!(store.stats().live, 1);
    let hits = store.knn(&vector(50.0), 1).unwrap();
    assert_eq!(hits[0].id, "doc-1");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}
