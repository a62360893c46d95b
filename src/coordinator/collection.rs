// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-collection replication worker.
//!
//! Drives one collection through its state machine:
//!
//! ```text
//! Pending ── ensure schema ──► SchemaReady ── count == 0 ──────────────► Done
//!                                  │
//!                                  │ disable refresh, first batch out
//!                                  ▼
//!                              Extracting ── drain batch tasks ──► Done
//!
//! any error ─────────────────────────────────────────────────────► Failed
//! ```
//!
//! Each batch is dispatched to its own task once a permit is held from both
//! the collection's document pool and the process-wide in-flight bulkhead.
//! Holding permits before spawning keeps the scroll from running ahead of the
//! target. All tasks are joined before the refresh guard is released.

use super::types::{CollectionReport, CollectionState, ReplicationStats, StatsCollector};
use crate::error::{ReplicationError, Result};
use crate::extractor::{Extractor, RefreshGuard};
use crate::loader::{BatchResult, Loader};
use crate::metrics;
use crate::resilience::Bulkhead;
use crate::schema::{detect_timestamp_field, SchemaCloner};
use crate::store::SharedStore;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// Lower bound on the progress log interval, in documents.
const PROGRESS_LOG_MIN: u64 = 10_000;

/// Shared registry of the latest state per collection.
pub(crate) type StateRegistry = Arc<DashMap<String, CollectionState>>;

/// Everything needed to replicate one collection. Cheap to clone.
#[derive(Clone)]
pub(crate) struct CollectionWorker {
    pub(crate) source: SharedStore,
    pub(crate) target: SharedStore,
    pub(crate) cloner: SchemaCloner,
    pub(crate) extractor: Extractor,
    pub(crate) loader: Loader,
    pub(crate) document_workers: usize,
    pub(crate) inflight: Arc<Bulkhead>,
    pub(crate) restore_refresh: String,
    pub(crate) timestamp_override: Option<String>,
    pub(crate) registry: StateRegistry,
}

struct Progress {
    state: CollectionState,
    timestamp_field: Option<String>,
    source_count: u64,
}

impl CollectionWorker {
    /// Replicate `name`. Never returns an error: failures end up in the report.
    #[instrument(skip(self, name), fields(collection = %name))]
    pub(crate) async fn replicate(&self, name: &str) -> CollectionReport {
        let started = Instant::now();
        let stats = StatsCollector::new();
        let mut progress = Progress {
            state: CollectionState::Pending,
            timestamp_field: None,
            source_count: 0,
        };
        self.transition(name, &mut progress, CollectionState::Pending);

        let outcome = self.run(name, &stats, &mut progress).await;

        let (report_stats, error) = match outcome {
            Ok(()) => {
                self.transition(name, &mut progress, CollectionState::Done);
                (stats.snapshot(), None)
            }
            Err(e) => {
                // A failed collection reports zero progress. Batches already
                // upserted stay on the target and are only logged.
                let partial = stats.snapshot();
                error!(
                    collection = %name,
                    state = %progress.state,
                    loaded_before_failure = partial.updated,
                    error = %e,
                    "Collection replication failed"
                );
                self.transition(name, &mut progress, CollectionState::Failed);
                (ReplicationStats::failed_collection(), Some(e.to_string()))
            }
        };

        let report = CollectionReport {
            name: name.to_string(),
            state: progress.state,
            stats: report_stats,
            timestamp_field: progress.timestamp_field,
            source_count: progress.source_count,
            error,
            duration: started.elapsed(),
        };
        metrics::record_collection_outcome(&report);
        info!(
            collection = %name,
            state = %report.state,
            processed = report.stats.processed,
            updated = report.stats.updated,
            failed = report.stats.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Collection finished"
        );
        report
    }

    async fn run(&self, name: &str, stats: &StatsCollector, progress: &mut Progress) -> Result<()> {
        if !self.source.collection_exists(name).await? {
            return Err(ReplicationError::NotFound(format!("source collection {name}")));
        }

        let schema = self.cloner.fetch_source_schema(name).await?;
        progress.timestamp_field = self
            .timestamp_override
            .clone()
            .or_else(|| detect_timestamp_field(&schema.mappings));
        match &progress.timestamp_field {
            Some(field) => debug!(collection = %name, timestamp_field = %field, "Timestamp field"),
            None => debug!(collection = %name, "No timestamp field found"),
        }

        self.cloner.ensure_from(name, &schema).await?;
        self.transition(name, progress, CollectionState::SchemaReady);

        let total = self.source.count(name).await?;
        progress.source_count = total;
        if total == 0 {
            info!(collection = %name, "Source collection is empty, skipping extraction");
            return Ok(());
        }
        info!(collection = %name, documents = total, "Replicating collection");

        let guard = RefreshGuard::acquire(self.target.clone(), name, &self.restore_refresh).await;
        let result = self.extract_and_load(name, total, stats, progress).await;
        // Release failures are logged inside the guard.
        let _ = guard.release().await;
        result
    }

    async fn extract_and_load(
        &self,
        name: &str,
        total: u64,
        stats: &StatsCollector,
        progress: &mut Progress,
    ) -> Result<()> {
        let doc_pool = Bulkhead::new(self.document_workers);
        let log_every = PROGRESS_LOG_MIN.max(total / 100);
        let mut next_log = log_every;
        let mut dispatched: u64 = 0;
        let mut tasks: JoinSet<BatchResult> = JoinSet::new();
        let mut scan_error = None;

        let mut batches = self.extractor.scan(name);
        while let Some(item) = batches.next().await {
            let batch = match item {
                Ok(batch) => batch,
                Err(e) => {
                    scan_error = Some(e);
                    break;
                }
            };

            let local = doc_pool.acquire().await?;
            let global = self.inflight.acquire().await?;

            dispatched += batch.len() as u64;
            let loader = self.loader.clone();
            let collection = name.to_string();
            tasks.spawn(async move {
                let _permits = (local, global);
                loader.load(&collection, batch).await
            });

            if progress.state == CollectionState::SchemaReady {
                self.transition(name, progress, CollectionState::Extracting);
            }

            if dispatched >= next_log {
                let done = stats.snapshot();
                info!(
                    collection = %name,
                    dispatched,
                    total,
                    updated = done.updated,
                    failed = done.failed,
                    "Replication progress"
                );
                next_log = dispatched + log_every;
            }

            while let Some(joined) = tasks.try_join_next() {
                absorb(name, joined, stats);
            }
        }
        drop(batches);

        // Drain barrier: every dispatched batch is accounted for before the
        // collection is reported.
        while let Some(joined) = tasks.join_next().await {
            absorb(name, joined, stats);
        }

        match scan_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn transition(&self, name: &str, progress: &mut Progress, next: CollectionState) {
        progress.state = next;
        self.registry.insert(name.to_string(), next);
        debug!(collection = %name, state = %next, "Collection state");
    }
}

fn absorb(name: &str, joined: std::result::Result<BatchResult, JoinError>, stats: &StatsCollector) {
    match joined {
        Ok(result) => stats.record_batch(&result),
        Err(e) => {
            warn!(collection = %name, error = %e, "Batch task did not complete");
            stats.record_failure(1);
        }
    }
}
