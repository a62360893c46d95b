// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Index Replicator
//!
//! Replicates collections (indices) from a source search cluster to a target
//! cluster, tagging every document with a content fingerprint so drift can be
//! measured later without transferring full documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           ReplicationEngine                               │
//! │                                                                           │
//! │  discover ──► [collection pool] ──► per collection:                       │
//! │  (exclusion                          SchemaCloner ──► Extractor ──► Loader │
//! │   patterns)                          (clean + fp     (scroll,     (hash,  │
//! │                                       field)          batches)     bulk)  │
//! │                                            │               │              │
//! │                                            ▼               ▼              │
//! │                                      RefreshGuard    [document pool]      │
//! │                                                                           │
//! │  end of pass ──► CheckpointStore (target meta collection)                 │
//! │                                                                           │
//! │  DriftVerifier: counts + sampled fingerprints, read-only on both sides    │
//! └───────────────────────────────────────────────────────────────────────────┘
//!         │                                              │
//!         ▼                                              ▼
//!   source StoreClient                            target StoreClient
//!   (HttpStore / MemoryStore)                     (HttpStore / MemoryStore)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use index_replicator::{HttpStore, ReplicationConfig, ReplicationEngine, SharedStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> index_replicator::Result<()> {
//!     let config = ReplicationConfig::from_yaml_file("replication.yaml")?;
//!     let source: SharedStore = Arc::new(HttpStore::new("source", &config.source)?);
//!     let target: SharedStore = Arc::new(HttpStore::new("target", &config.target)?);
//!
//!     let engine = ReplicationEngine::new(config, source, target)?;
//!     engine.connect().await?;
//!     let summary = engine.run(false, Duration::ZERO).await?;
//!     println!("updated {}", summary.stats.updated);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod hasher;
pub mod loader;
pub mod metrics;
pub mod resilience;
pub mod schema;
pub mod store;
pub mod verify;

// Re-exports for convenience
pub use checkpoint::CheckpointStore;
pub use config::{CheckpointConfig, ClusterConfig, ReplicationConfig, ReplicationSettings, VerifyConfig};
pub use coordinator::{
    CollectionReport, CollectionState, EngineState, PassSummary, ReplicationEngine, ReplicationStats,
    ShutdownHandle,
};
pub use error::{ReplicationError, Result};
pub use extractor::{Extractor, RefreshGuard};
pub use filter::ExclusionFilter;
pub use hasher::fingerprint;
pub use loader::{BatchResult, Loader};
pub use schema::SchemaCloner;
pub use store::{Document, Fields, HttpStore, MemoryStore, SharedStore, StoreClient};
pub use verify::{DriftVerifier, VerificationReport};
