// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The main orchestrator that ties together:
//! - Source and target clusters via [`crate::store::StoreClient`]
//! - Schema cloning via [`crate::schema::SchemaCloner`]
//! - Extraction and bulk loading via [`crate::extractor`] and [`crate::loader`]
//! - Checkpoint persistence via [`crate::checkpoint::CheckpointStore`]
//! - Drift verification via [`crate::verify::DriftVerifier`]
//!
//! # Architecture
//!
//! The coordinator manages the full replication lifecycle:
//! 1. Checks both clusters are reachable and loads the last checkpoint
//! 2. Discovers eligible collections on the source (exclusion patterns applied)
//! 3. Replicates collections in parallel through a bounded collection pool,
//!    each with its own bounded pool of bulk-load tasks
//! 4. Writes a checkpoint after every completed pass
//! 5. In continuous mode, sleeps and repeats until shutdown is requested

mod collection;
mod pass;
mod types;

pub use types::{
    CollectionReport, CollectionState, EngineState, PassSummary, ReplicationStats, StatsCollector,
};

use crate::checkpoint::CheckpointStore;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::extractor::Extractor;
use crate::filter::ExclusionFilter;
use crate::loader::Loader;
use crate::metrics;
use crate::resilience::{Bulkhead, RateLimiter};
use crate::schema::SchemaCloner;
use crate::store::{ClusterInfo, SharedStore};
use crate::verify::{DriftVerifier, VerificationReport};
use chrono::{DateTime, Utc};
use collection::{CollectionWorker, StateRegistry};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Cloneable handle that requests a graceful shutdown.
///
/// Hand this to a signal handler; the engine stops starting collections and
/// the continuous loop exits instead of sleeping.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// The main replication engine.
///
/// Replicates collections from a source cluster to a target cluster. The
/// source is only read. The target receives schemas, documents (tagged with
/// a content fingerprint), refresh-interval toggles and the sync checkpoint.
pub struct ReplicationEngine {
    /// Validated configuration, immutable after construction
    config: ReplicationConfig,

    source: SharedStore,
    target: SharedStore,

    /// Compiled exclusion patterns
    filter: ExclusionFilter,

    checkpoints: CheckpointStore,

    /// Template cloned into every collection task
    worker: CollectionWorker,

    verifier: DriftVerifier,

    /// Latest state per collection, readable while a pass runs
    registry: StateRegistry,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Shutdown signal sender
    shutdown_tx: Arc<watch::Sender<bool>>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Checkpoint loaded at connect, advanced after every completed pass
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
}

impl ReplicationEngine {
    /// Create a new engine over two store clients.
    ///
    /// The configuration is validated here; an invalid one is a `Config`
    /// error. The engine starts in `Created` state. Call
    /// [`connect()`](Self::connect) before running passes.
    pub fn new(config: ReplicationConfig, source: SharedStore, target: SharedStore) -> Result<Self> {
        config.validate()?;
        let settings = &config.replication;

        let filter = settings.exclusion_filter()?;
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry: StateRegistry = Arc::new(DashMap::new());

        let mut loader = Loader::new(target.clone(), &settings.fingerprint_field);
        if let Some(cfg) = settings.rate_limit_config() {
            info!(
                rate_per_sec = cfg.refill_rate,
                burst = cfg.burst_size,
                "Rate limiting enabled for bulk requests"
            );
            loader = loader.with_rate_limiter(Arc::new(RateLimiter::new(cfg)));
        }

        let worker = CollectionWorker {
            source: source.clone(),
            target: target.clone(),
            cloner: SchemaCloner::new(source.clone(), target.clone(), settings.fingerprint_field.clone()),
            extractor: Extractor::new(source.clone(), settings.batch_size, settings.scroll_ttl()),
            loader,
            document_workers: settings.document_workers,
            inflight: Arc::new(Bulkhead::new(settings.max_inflight_bulk)),
            restore_refresh: settings.restore_refresh_interval.clone(),
            timestamp_override: settings.timestamp_field.clone(),
            registry: registry.clone(),
        };

        let verifier = DriftVerifier::new(
            source.clone(),
            target.clone(),
            settings.fingerprint_field.clone(),
            config.verify.sample_size,
        );
        let checkpoints = CheckpointStore::new(target.clone(), config.checkpoint.clone());

        Ok(Self {
            config,
            source,
            target,
            filter,
            checkpoints,
            worker,
            verifier,
            registry,
            state_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            last_sync: watch::channel(None).0,
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Ask running passes to stop after their in-flight collections.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Last completed pass, or the default lookback if none was recorded.
    /// `None` before [`connect()`](Self::connect).
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.borrow()
    }

    pub fn collection_state(&self, name: &str) -> Option<CollectionState> {
        self.registry.get(name).map(|s| *s)
    }

    /// Snapshot of every collection seen so far, sorted by name.
    pub fn collection_states(&self) -> Vec<(String, CollectionState)> {
        let mut states: Vec<_> = self
            .registry
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    fn set_state(&self, state: EngineState) {
        self.state_tx.send_replace(state);
        metrics::set_engine_state(&state.to_string());
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            EngineState::Running => Ok(()),
            other => Err(ReplicationError::InvalidState {
                expected: EngineState::Running.to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Check both clusters and load the sync checkpoint.
    ///
    /// An unreachable cluster is a `Connectivity` error and leaves the engine
    /// `Failed`; nothing has been written at that point.
    pub async fn connect(&self) -> Result<()> {
        let current = self.state();
        if current != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: EngineState::Created.to_string(),
                actual: current.to_string(),
            });
        }

        info!("Connecting to source and target clusters");
        self.set_state(EngineState::Connecting);

        for (role, store) in [("source", &self.source), ("target", &self.target)] {
            match check_cluster(role, store).await {
                Ok(info) => info!(
                    role,
                    cluster = %store.name(),
                    cluster_name = %info.cluster_name,
                    version = %info.version,
                    "Cluster reachable"
                ),
                Err(e) => {
                    error!(role, cluster = %store.name(), error = %e, "Cluster unreachable");
                    self.set_state(EngineState::Failed);
                    return Err(e);
                }
            }
        }

        let checkpoint = self.checkpoints.load_or_default(Utc::now()).await;
        self.last_sync.send_replace(Some(checkpoint));

        self.set_state(EngineState::Running);
        info!(last_sync = %checkpoint.to_rfc3339(), "Replication engine running");
        Ok(())
    }

    /// Source collections eligible for replication, sorted by name.
    ///
    /// Exclusion patterns are applied on every call.
    pub async fn discover_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .source
            .list_collections("*")
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        let eligible = self.filter.apply(names);
        info!(collections = eligible.len(), "Discovered source collections");
        Ok(eligible)
    }

    /// Eligible source collections that do not exist on the target.
    pub async fn discover_missing(&self) -> Result<Vec<String>> {
        let eligible = self.discover_collections().await?;
        let on_target: HashSet<String> = self
            .target
            .list_collections("*")
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let missing: Vec<String> = eligible
            .into_iter()
            .filter(|name| !on_target.contains(name))
            .collect();
        info!(collections = missing.len(), "Discovered collections missing on target");
        Ok(missing)
    }

    /// Run the per-collection state machine for one collection.
    ///
    /// Replication failures are reported in the returned report, not as an
    /// error.
    pub async fn replicate_collection(&self, name: &str) -> Result<CollectionReport> {
        self.ensure_running()?;
        Ok(self.worker.replicate(name).await)
    }

    async fn pass_over(&self, names: Vec<String>) -> PassSummary {
        pass::run_pass(
            self.worker.clone(),
            names,
            self.config.replication.collection_workers,
            self.shutdown_rx.clone(),
        )
        .await
    }

    /// One full pass over every eligible collection, then a checkpoint.
    ///
    /// An interrupted pass does not write a checkpoint.
    pub async fn run_once(&self) -> Result<PassSummary> {
        self.ensure_running()?;
        let names = self.discover_collections().await?;
        let summary = self.pass_over(names).await;
        log_summary("Replication pass", &summary);

        if summary.interrupted {
            warn!("Pass interrupted, checkpoint not written");
        } else {
            let completed = Utc::now();
            match self.checkpoints.save(completed).await {
                Ok(()) => {
                    self.last_sync.send_replace(Some(completed));
                }
                Err(e) => warn!(error = %e, "Failed to write sync checkpoint"),
            }
        }
        Ok(summary)
    }

    /// Replicate once, or loop until shutdown sleeping `interval` between
    /// passes. Returns the summary of the last pass.
    ///
    /// Shutdown is honoured between collections and between passes; running
    /// collections always complete.
    pub async fn run(&self, continuous: bool, interval: Duration) -> Result<PassSummary> {
        self.ensure_running()?;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut last = PassSummary {
            interrupted: true,
            ..Default::default()
        };
        let mut pass_no: u64 = 0;

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown requested, not starting another pass");
                break;
            }

            pass_no += 1;
            info!(pass = pass_no, continuous, "Starting pass");
            match self.run_once().await {
                Ok(summary) => {
                    let interrupted = summary.interrupted;
                    last = summary;
                    if interrupted {
                        break;
                    }
                }
                Err(e) if continuous => {
                    warn!(pass = pass_no, error = %e, "Pass failed, retrying after interval");
                }
                Err(e) => return Err(e),
            }

            if !continuous {
                break;
            }

            info!(interval_secs = interval.as_secs(), "Sleeping until next pass");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    info!("Shutdown requested during sleep");
                    break;
                }
            }
        }

        Ok(last)
    }

    /// Replicate only collections missing on the target. No checkpoint.
    pub async fn replicate_missing(&self) -> Result<PassSummary> {
        self.ensure_running()?;
        let names = self.discover_missing().await?;
        if names.is_empty() {
            info!("No missing collections");
        }
        let summary = self.pass_over(names).await;
        log_summary("Missing-collection backfill", &summary);
        Ok(summary)
    }

    /// Verify the given collections. Read-only on both clusters.
    pub async fn verify(&self, names: &[String]) -> Result<VerificationReport> {
        self.ensure_running()?;
        Ok(self.verifier.verify(names).await)
    }

    /// Verify every eligible source collection.
    pub async fn verify_all(&self) -> Result<VerificationReport> {
        let names = self.discover_collections().await?;
        self.verify(&names).await
    }

    /// Shutdown the replication engine.
    ///
    /// Signals any running pass to stop after its in-flight collections.
    /// Callers that own the pass future await it before calling this.
    pub async fn shutdown(&self) {
        info!("Shutting down replication engine");
        self.set_state(EngineState::ShuttingDown);
        self.request_shutdown();
        self.set_state(EngineState::Stopped);
        info!("Replication engine stopped");
    }
}

async fn check_cluster(role: &str, store: &SharedStore) -> Result<ClusterInfo> {
    let down = |message: String| ReplicationError::Connectivity {
        cluster: format!("{role} ({})", store.name()),
        message,
    };
    match store.ping().await {
        Ok(true) => {}
        Ok(false) => return Err(down("ping failed".to_string())),
        Err(e) => return Err(down(e.to_string())),
    }
    store.info().await.map_err(|e| down(e.to_string()))
}

fn log_summary(what: &str, summary: &PassSummary) {
    info!(
        what,
        collections = summary.collections.len(),
        failed_collections = summary.failed_count(),
        processed = summary.stats.processed,
        updated = summary.stats.updated,
        failed = summary.stats.failed,
        interrupted = summary.interrupted,
        duration_ms = summary.duration.as_millis() as u64,
        "Pass complete"
    );
    for report in summary.failed_collections() {
        warn!(
            collection = %report.name,
            error = report.error.as_deref().unwrap_or("unknown"),
            "Collection failed"
        );
    }
}
