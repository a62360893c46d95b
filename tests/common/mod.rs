// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Elasticsearch testcontainer setup
//! - `FaultyStore`, a `MemoryStore` wrapper that injects failures and records calls
//! - Seeding helpers

#![allow(dead_code)]

pub mod containers;
pub mod faulty_store;

pub use containers::*;
pub use faulty_store::*;

use index_replicator::store::{FieldMapping, Fields, Mappings, MemoryStore, Schema};
use index_replicator::ReplicationConfig;
use serde_json::json;

/// Build a field map from a JSON object literal.
pub fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().expect("json object")
}

/// Schema with a numeric `n`, a text `msg` and a date `ts`.
pub fn typed_schema() -> Schema {
    let mut mappings = Mappings::default();
    mappings.properties.insert("n".into(), FieldMapping::of_type("long"));
    mappings.properties.insert("msg".into(), FieldMapping::of_type("text"));
    mappings.properties.insert("ts".into(), FieldMapping::of_type("date"));
    Schema {
        mappings,
        ..Default::default()
    }
}

/// Create `name` on `store` with `count` well-formed documents `d0..dN`.
pub async fn seed_collection(store: &MemoryStore, name: &str, count: usize) {
    store.insert_collection(name, typed_schema()).await;
    for i in 0..count {
        store
            .insert_document(
                name,
                &format!("d{i}"),
                fields(json!({
                    "n": i,
                    "msg": format!("message {i}"),
                    "ts": "2024-05-01T12:00:00Z"
                })),
            )
            .await;
    }
}

/// Small, fast config: batch 10, 2 collection workers, 4 document workers.
pub fn test_config() -> ReplicationConfig {
    ReplicationConfig::for_testing()
}
