//! End-to-end tests across the four stores.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::json;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use stowage::storage::{DEFAULT_NAMESPACE, normalize};
use stowage::{
    AttachmentCache, AttachmentRequest, Error, ManualClock, MemoryStore, SearchOptions,
    StorageAdapter, StorageConfig, Stores, TtlCache, VectorDocument, VectorIndex,
};
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, bytes: usize) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "x".repeat(bytes)).expect("write failed");
    path
}

fn bump_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .expect("open failed")
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .expect("set_modified failed");
}

#[test]
fn test_vector_search_scenario() {
    let index = VectorIndex::new(&StorageConfig::default().with_vector_dimensions(3));
    index.initialize().expect("initialize failed");
    index
        .add_batch(vec![
            VectorDocument::new("doc1", "exact", vec![1.0, 0.0, 0.0]),
            VectorDocument::new("doc2", "orthogonal", vec![0.0, 1.0, 0.0]),
            VectorDocument::new("doc3", "close", vec![0.9, 0.1, 0.0]),
        ])
        .expect("add_batch failed");

    let hits = index.search(&[1.0, 0.0, 0.0], 2).expect("search failed");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].document.id, "doc1");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].document.id, "doc3");
    assert!((hits[1].score - 0.994).abs() < 1e-3);
    assert!(hits.iter().all(|hit| hit.document.id != "doc2"));
}

#[tokio::test]
async fn test_attachment_budget_rejects_file_over_max_file_size() {
    let dir = TempDir::new().expect("tempdir failed");
    let a = write_file(&dir, "a.txt", 40);
    let b = write_file(&dir, "b.txt", 70);
    let config = StorageConfig::default()
        .with_max_cache_size(100)
        .with_max_file_size(60);
    let cache = AttachmentCache::new(&config);

    cache.read_file(&a).await;
    let content = cache.read_file(&b).await;

    assert_eq!(content.len(), 70);
    let stats = cache.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.total_bytes, 40);
}

#[tokio::test]
async fn test_attachment_eviction_then_admit() {
    let dir = TempDir::new().expect("tempdir failed");
    let a = write_file(&dir, "a.txt", 40);
    let b = write_file(&dir, "b.txt", 70);
    let config = StorageConfig::default()
        .with_max_cache_size(100)
        .with_max_file_size(80);
    let cache = AttachmentCache::new(&config);

    cache.read_file(&a).await;
    cache.read_file(&b).await;

    let stats = cache.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.total_bytes, 70);
    assert!(!cache.invalidate(&a));
    assert!(cache.invalidate(&b));
}

#[tokio::test]
async fn test_attachment_never_serves_stale_content() {
    let dir = TempDir::new().expect("tempdir failed");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "version = 1").expect("write failed");
    let cache = AttachmentCache::new(&StorageConfig::default());

    assert_eq!(cache.read_file(&path).await, "version = 1");

    std::fs::write(&path, "version = 2").expect("write failed");
    bump_mtime(&path, 120);
    assert_eq!(cache.read_file(&path).await, "version = 2");

    std::fs::remove_file(&path).expect("remove failed");
    let placeholder = cache.read_file(&path).await;
    assert!(placeholder.starts_with("[Error reading file: "));
    assert_eq!(cache.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_read_attachments_degrades_per_file() {
    let dir = TempDir::new().expect("tempdir failed");
    let good = dir.path().join("good.rs");
    std::fs::write(&good, "fn good() {}").expect("write failed");
    let cache = AttachmentCache::new(&StorageConfig::default());

    let rendered = cache
        .read_attachments(&[
            AttachmentRequest::new(dir.path().join("absent.rs"), "absent.rs"),
            AttachmentRequest::new(&good, "good.rs"),
        ])
        .await;

    assert!(rendered[0].starts_with("<attachment path=\"absent.rs\">\n[Error reading file: "));
    assert_eq!(
        rendered[1],
        "<attachment path=\"good.rs\">\nfn good() {}\n</attachment>"
    );
}

#[tokio::test]
async fn test_ttl_cache_aside_with_manual_clock() {
    let clock = Arc::new(ManualClock::new(0));
    let config = StorageConfig::default().with_default_ttl_secs(30);
    let cache: TtlCache<String> = TtlCache::with_clock(&config, clock.clone());
    cache.initialize().expect("initialize failed");

    let mut calls = 0;
    for _ in 0..3 {
        let value = cache
            .get_or_set(
                "profile",
                || {
                    calls += 1;
                    async { Ok::<_, std::io::Error>("loaded".to_string()) }
                },
                None,
            )
            .await
            .expect("get_or_set failed");
        assert_eq!(value, "loaded");
    }
    assert_eq!(calls, 1);

    clock.advance(Duration::from_secs(30));
    cache
        .get_or_set(
            "profile",
            || {
                calls += 1;
                async { Ok::<_, std::io::Error>("reloaded".to_string()) }
            },
            None,
        )
        .await
        .expect("get_or_set failed");
    assert_eq!(calls, 2);
    assert_eq!(
        cache.get("profile").expect("get failed"),
        Some("reloaded".to_string())
    );
}

#[test]
fn test_memory_store_search_across_namespaces() {
    let store: MemoryStore<serde_json::Value> = MemoryStore::new();
    store.initialize().expect("initialize failed");
    store
        .set_in("task-1", json!({"title": "Fix login bug"}), "work")
        .expect("set failed");
    store
        .set_in("task-2", json!({"title": "Write docs"}), "work")
        .expect("set failed");
    store
        .set("note", json!({"title": "login ideas"}))
        .expect("set failed");

    let work = store
        .search_by_value("LOGIN", "work", SearchOptions::default())
        .expect("search failed");
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].0, "task-1");

    let default = store
        .search_by_value("login", DEFAULT_NAMESPACE, SearchOptions::default())
        .expect("search failed");
    assert_eq!(default.len(), 1);
}

#[test]
fn test_every_adapter_rejects_use_before_initialize() {
    let config = StorageConfig::default();
    let ttl: TtlCache<String> = TtlCache::new(&config);
    let memory: MemoryStore<String> = MemoryStore::new();
    let vectors = VectorIndex::new(&config);

    assert!(matches!(ttl.keys(), Err(Error::NotInitialized { .. })));
    assert!(matches!(memory.keys(), Err(Error::NotInitialized { .. })));
    assert!(matches!(vectors.keys(), Err(Error::NotInitialized { .. })));
}

#[test]
fn test_adapters_share_lifecycle_contract() {
    fn exercise<A: StorageAdapter>(adapter: &A, value: A::Value) {
        adapter.initialize().expect("initialize failed");
        adapter.initialize().expect("second initialize failed");
        adapter.set("key", value).expect("set failed");
        assert!(adapter.exists("key").expect("exists failed"));
        assert_eq!(adapter.size().expect("size failed"), 1);
        adapter.clear().expect("clear failed");
        adapter.clear().expect("second clear failed");
        assert_eq!(adapter.size().expect("size failed"), 0);
        adapter.close().expect("close failed");
        adapter.close().expect("second close failed");
        assert!(!adapter.is_initialized());
    }

    let config = StorageConfig::default().with_vector_dimensions(2);
    exercise(&TtlCache::<u32>::new(&config), 7);
    exercise(&MemoryStore::<u32>::new(), 7);
    exercise(
        &VectorIndex::new(&config),
        VectorDocument::new("key", "content", vec![0.5, 0.5]),
    );
}

#[test]
fn test_stores_from_config() {
    let config = StorageConfig::default().with_vector_dimensions(4);
    let stores = Stores::from_config(&config).expect("build failed");
    stores.initialize_all().expect("initialize failed");

    assert_eq!(stores.vectors().dimensions(), 4);
    stores
        .memory()
        .set("k", json!("v"))
        .expect("set failed");
    assert_eq!(stores.memory().get("k").expect("get failed"), Some(json!("v")));

    stores.close_all().expect("close failed");
}

#[test]
fn test_normalize_preserves_crate_errors() {
    let err = normalize(
        "update",
        anyhow::Error::new(Error::NotFound {
            kind: "vector document",
            id: "x".to_string(),
        }),
    );
    assert!(err.is_caller_error());

    let err = normalize("load", anyhow::anyhow!("socket closed"));
    assert_eq!(err.operation(), Some("load"));
}
