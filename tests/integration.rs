// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for the Index Replicator
//!
//! In-process scenarios run against `MemoryStore` and always run. Scenarios
//! against real Elasticsearch use testcontainers and are `#[ignore]`d.
//!
//! # Running Tests
//! ```bash
//! # In-process scenarios
//! cargo test --test integration
//!
//! # Elasticsearch scenarios (requires Docker)
//! cargo test --test integration -- --ignored
//! ```
//!
//! # Test Organization
//! - `pass_*` - full replication passes
//! - `discover_*` - collection discovery and exclusion
//! - `verify_*` - drift verification
//! - `checkpoint_*` - sync checkpoint persistence
//! - `es_*` - real clusters (Docker)

mod common;

use common::{fields, seed_collection, test_config, typed_schema, TestCluster};
use index_replicator::checkpoint::CheckpointStore;
use index_replicator::store::{Document, IndexSettings, MemoryStore, Schema, StoreClient};
use index_replicator::{
    fingerprint, CollectionState, ReplicationConfig, ReplicationEngine, SharedStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::clients::Cli;

async fn connected(
    config: ReplicationConfig,
    source: &Arc<MemoryStore>,
    target: &Arc<MemoryStore>,
) -> ReplicationEngine {
    let engine = ReplicationEngine::new(config, source.clone(), target.clone()).unwrap();
    engine.connect().await.unwrap();
    engine
}

fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    (
        Arc::new(MemoryStore::new("source")),
        Arc::new(MemoryStore::new("target")),
    )
}

// =============================================================================
// Replication Pass Tests
// =============================================================================

#[tokio::test]
async fn pass_replicates_every_document_with_fingerprint() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 35).await;
    seed_collection(&source, "users", 12).await;
    let engine = connected(test_config(), &source, &target).await;

    let summary = engine.run(false, Duration::ZERO).await.unwrap();
    assert_eq!(summary.stats.processed, 47);
    assert_eq!(summary.stats.updated, 47);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(summary.failed_count(), 0);

    for doc in source.documents("orders").await {
        let replicated = target.get_document("orders", &doc.id).await.unwrap().unwrap();
        assert_eq!(replicated["_doc_hash"], json!(fingerprint(&doc.fields)));
        assert_eq!(replicated["n"], doc.fields["n"]);
    }
    // The source is never written.
    assert!(source.documents("orders").await.iter().all(|d| !d.fields.contains_key("_doc_hash")));
}

#[tokio::test]
async fn pass_twice_is_idempotent() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 20).await;
    let engine = connected(test_config(), &source, &target).await;

    engine.run(false, Duration::ZERO).await.unwrap();
    let first: Vec<Document> = target.documents("orders").await;

    let second_summary = engine.run_once().await.unwrap();
    let second: Vec<Document> = target.documents("orders").await;

    assert_eq!(first, second);
    assert_eq!(second_summary.stats.updated, 20);
    let report = engine.verify_all().await.unwrap();
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn pass_clones_portable_schema() {
    let (source, target) = stores();
    let mut schema = typed_schema();
    schema.settings = serde_json::from_value(json!({
        "number_of_shards": "3",
        "number_of_replicas": "0",
        "uuid": "abc",
        "creation_date": "1700000000000",
        "provided_name": "orders",
        "version": {"created": "8110099"},
        "history.uuid": "h"
    }))
    .unwrap();
    source.insert_collection("orders", schema).await;
    let engine = connected(test_config(), &source, &target).await;

    engine.run(false, Duration::ZERO).await.unwrap();

    let settings = target.settings("orders").await.unwrap();
    assert_eq!(settings.number_of_shards, Some(3));
    for key in ["uuid", "creation_date", "provided_name", "version", "history.uuid"] {
        assert!(!settings.other.contains_key(key), "{key} leaked to target");
    }
    let mappings = target.mappings("orders").await.unwrap();
    assert_eq!(
        serde_json::to_value(&mappings.properties["_doc_hash"]).unwrap(),
        json!({"type": "keyword", "index": false, "doc_values": false})
    );
    assert!(mappings.properties.contains_key("ts"));
}

#[tokio::test]
async fn pass_restores_refresh_interval() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 5).await;
    target.insert_collection("orders", typed_schema()).await;
    target
        .put_settings("orders", &IndexSettings::refresh_only("30s"))
        .await
        .unwrap();
    let engine = connected(test_config(), &source, &target).await;

    engine.run(false, Duration::ZERO).await.unwrap();
    assert_eq!(
        target.settings("orders").await.unwrap().refresh_interval.as_deref(),
        Some("30s")
    );
}

#[tokio::test]
async fn pass_partial_batch_failure_is_contained() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 9).await;
    source
        .insert_document("orders", "bad", fields(json!({"n": "not-a-number"})))
        .await;
    let engine = connected(test_config(), &source, &target).await;

    let summary = engine.run(false, Duration::ZERO).await.unwrap();
    let report = &summary.collections[0];
    assert_eq!(report.state, CollectionState::Done);
    assert_eq!(report.stats.updated, 9);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(target.count("orders").await.unwrap(), 9);
}

#[tokio::test]
async fn pass_empty_collection_reaches_done() {
    let (source, target) = stores();
    source.insert_collection("empty", typed_schema()).await;
    let engine = connected(test_config(), &source, &target).await;

    let summary = engine.run(false, Duration::ZERO).await.unwrap();
    assert_eq!(summary.collections[0].state, CollectionState::Done);
    assert_eq!(summary.stats.processed, 0);
    assert!(target.collection_exists("empty").await.unwrap());
}

#[tokio::test]
async fn pass_detects_nested_timestamp_field() {
    let (source, target) = stores();
    let schema: Schema = Schema {
        mappings: serde_json::from_value(json!({
            "properties": {
                "n": {"type": "long"},
                "event": {"properties": {"created": {"type": "date"}}}
            }
        }))
        .unwrap(),
        ..Default::default()
    };
    source.insert_collection("events", schema).await;
    source
        .insert_document("events", "e1", fields(json!({"n": 1, "event": {"created": "2024-01-01"}})))
        .await;
    let engine = connected(test_config(), &source, &target).await;

    let report = engine.replicate_collection("events").await.unwrap();
    assert_eq!(report.timestamp_field.as_deref(), Some("event.created"));
}

#[tokio::test]
async fn pass_large_collection_with_small_pools() {
    let (source, target) = stores();
    seed_collection(&source, "bulk", 1_000).await;
    let mut config = test_config();
    config.replication.batch_size = 37;
    config.replication.collection_workers = 1;
    config.replication.document_workers = 3;
    config.replication.max_inflight_bulk = 2;
    let engine = connected(config, &source, &target).await;

    let summary = engine.run(false, Duration::ZERO).await.unwrap();
    assert_eq!(summary.stats.updated, 1_000);
    assert_eq!(target.count("bulk").await.unwrap(), 1_000);
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[tokio::test]
async fn discover_excludes_reserved_and_configured_patterns() {
    let (source, target) = stores();
    for name in ["orders", ".internal", "tmp-scratch", "users", "_ilm_history-1"] {
        source.insert_collection(name, Schema::default()).await;
    }
    let mut config = test_config();
    config.replication.exclude_patterns = vec!["tmp-.*".to_string()];
    let engine = connected(config, &source, &target).await;

    assert_eq!(engine.discover_collections().await.unwrap(), vec!["orders", "users"]);
}

#[tokio::test]
async fn discover_missing_is_set_difference() {
    let (source, target) = stores();
    for name in ["a", "b", "c"] {
        source.insert_collection(name, Schema::default()).await;
    }
    target.insert_collection("b", Schema::default()).await;
    let engine = connected(test_config(), &source, &target).await;

    assert_eq!(engine.discover_missing().await.unwrap(), vec!["a", "c"]);
}

#[tokio::test]
async fn discover_missing_backfill_leaves_existing_untouched() {
    let (source, target) = stores();
    seed_collection(&source, "a", 3).await;
    seed_collection(&source, "b", 3).await;
    target.insert_collection("b", typed_schema()).await;
    let engine = connected(test_config(), &source, &target).await;

    let summary = engine.replicate_missing().await.unwrap();
    assert_eq!(summary.collections.len(), 1);
    assert_eq!(target.count("a").await.unwrap(), 3);
    assert_eq!(target.count("b").await.unwrap(), 0);
}

// =============================================================================
// Verification Tests
// =============================================================================

#[tokio::test]
async fn verify_detects_single_content_drift() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 100).await;
    let engine = connected(test_config(), &source, &target).await;
    engine.run(false, Duration::ZERO).await.unwrap();

    source
        .insert_document(
            "orders",
            "d17",
            fields(json!({"n": 17, "msg": "changed", "ts": "2024-05-01T12:00:00Z"})),
        )
        .await;

    let report = engine.verify(&["orders".to_string()]).await.unwrap();
    assert_eq!(report.content_mismatches, 1);
    assert_eq!(report.count_mismatches, 0);
    assert_eq!(report.mismatches, 1);
}

#[tokio::test]
async fn verify_detects_count_mismatch() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 100).await;
    let engine = connected(test_config(), &source, &target).await;
    engine.run(false, Duration::ZERO).await.unwrap();
    for id in ["d1", "d2", "d3"] {
        target.remove_document("orders", id).await;
    }

    let report = engine.verify(&["orders".to_string()]).await.unwrap();
    assert_eq!(report.count_mismatches, 3);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn verify_reports_missing_collection() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 10).await;
    let engine = connected(test_config(), &source, &target).await;

    let report = engine.verify_all().await.unwrap();
    assert_eq!(report.missing_indices, 1);
    assert_eq!(report.checked, 0);
    assert!(!target.collection_exists("orders").await.unwrap());
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[tokio::test]
async fn checkpoint_advances_after_pass() {
    let (source, target) = stores();
    seed_collection(&source, "orders", 3).await;
    let config = test_config();
    let checkpoints = CheckpointStore::new(target.clone(), config.checkpoint.clone());
    let engine = connected(config, &source, &target).await;

    assert!(checkpoints.load().await.unwrap().is_none());
    let before = engine.last_sync_time().unwrap();

    engine.run(false, Duration::ZERO).await.unwrap();
    let after = checkpoints.load().await.unwrap().unwrap();
    assert!(after > before);

    // The metadata collection is hidden from discovery.
    assert!(target.collection_exists(".replication_meta").await.unwrap());
}

#[tokio::test]
async fn checkpoint_loaded_on_connect() {
    let (source, target) = stores();
    let config = test_config();
    let stamp = chrono::Utc::now() - chrono::Duration::hours(3);
    CheckpointStore::new(target.clone(), config.checkpoint.clone())
        .save(stamp)
        .await
        .unwrap();

    let engine = connected(config, &source, &target).await;
    let loaded = engine.last_sync_time().unwrap();
    assert!((loaded - stamp).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn config_from_yaml_drives_engine() {
    let yaml = r#"
source:
  hosts: ["http://source.test:9200"]
target:
  hosts: ["http://target.test:9200"]
replication:
  batch_size: 4
  collection_workers: 1
  document_workers: 2
  max_inflight_bulk: 2
  fingerprint_field: "_fp"
"#;
    let config = ReplicationConfig::from_yaml_str(yaml).unwrap();
    let (source, target) = stores();
    seed_collection(&source, "orders", 9).await;
    let engine = connected(config, &source, &target).await;

    engine.run(false, Duration::ZERO).await.unwrap();
    let doc = target.get_document("orders", "d0").await.unwrap().unwrap();
    assert!(doc.contains_key("_fp"));
    assert!(!doc.contains_key("_doc_hash"));
}

// =============================================================================
// Elasticsearch Tests
// =============================================================================

async fn seed_http(store: &dyn StoreClient, name: &str, count: usize) {
    store.create_collection(name, &typed_schema()).await.unwrap();
    let docs: Vec<Document> = (0..count)
        .map(|i| {
            Document::new(
                format!("d{i}"),
                fields(json!({"n": i, "msg": format!("message {i}"), "ts": "2024-05-01T12:00:00Z"})),
            )
        })
        .collect();
    let outcome = store.bulk_upsert(name, docs).await.unwrap();
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn es_full_pass_and_verify() {
    let docker = Cli::default();
    let source_cluster = TestCluster::start(&docker, "source").await;
    let target_cluster = TestCluster::start(&docker, "target").await;

    let source: SharedStore = Arc::new(source_cluster.store("source"));
    let target: SharedStore = Arc::new(target_cluster.store("target"));
    seed_http(source.as_ref(), "orders", 250).await;
    source_cluster.refresh("orders").await;

    let mut config = test_config();
    config.source = source_cluster.config.clone();
    config.target = target_cluster.config.clone();
    config.replication.batch_size = 100;

    let engine = ReplicationEngine::new(config, source.clone(), target.clone()).unwrap();
    engine.connect().await.unwrap();
    let summary = engine.run(false, Duration::ZERO).await.unwrap();
    assert_eq!(summary.stats.updated, 250);

    target_cluster.refresh("orders").await;
    assert_eq!(target.count("orders").await.unwrap(), 250);

    let settings = target.get_settings("orders").await.unwrap();
    assert_ne!(settings.refresh_interval.as_deref(), Some("-1"));

    let report = engine.verify_all().await.unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.checked, 250);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn es_checkpoint_roundtrip() {
    let docker = Cli::default();
    let cluster = TestCluster::start(&docker, "target").await;
    let target: SharedStore = Arc::new(cluster.store("target"));
    let checkpoints = CheckpointStore::new(target, test_config().checkpoint);

    assert!(checkpoints.load().await.unwrap().is_none());
    let stamp = chrono::Utc::now();
    checkpoints.save(stamp).await.unwrap();
    let loaded = checkpoints.load().await.unwrap().unwrap();
    assert!((loaded - stamp).num_milliseconds().abs() < 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn es_discover_and_missing() {
    let docker = Cli::default();
    let source_cluster = TestCluster::start(&docker, "source").await;
    let target_cluster = TestCluster::start(&docker, "target").await;
    let source: SharedStore = Arc::new(source_cluster.store("source"));
    let target: SharedStore = Arc::new(target_cluster.store("target"));

    for name in ["a", "b", "c"] {
        source.create_collection(name, &Schema::default()).await.unwrap();
    }
    target.create_collection("b", &Schema::default()).await.unwrap();

    let mut config = test_config();
    config.source = source_cluster.config.clone();
    config.target = target_cluster.config.clone();
    let engine = ReplicationEngine::new(config, source, target).unwrap();
    engine.connect().await.unwrap();

    assert_eq!(engine.discover_collections().await.unwrap(), vec!["a", "b", "c"]);
    assert_eq!(engine.discover_missing().await.unwrap(), vec!["a", "c"]);
}
