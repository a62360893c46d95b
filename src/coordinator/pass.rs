// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One replication pass over a set of collections.
//!
//! # Design
//!
//! ```text
//! names ──► [collection bulkhead] ──► JoinSet<CollectionReport>
//!               ▲                             │
//!               │ select! shutdown            ▼
//!               └── stop starting new    drain barrier ──► PassSummary
//! ```
//!
//! A shutdown signal stops the loop before the next collection is started.
//! Collections already running finish (their refresh guards release) and are
//! included in the summary, which is marked `interrupted`.

use super::collection::CollectionWorker;
use super::types::{CollectionReport, PassSummary};
use crate::metrics;
use crate::resilience::Bulkhead;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub(crate) async fn run_pass(
    worker: CollectionWorker,
    names: Vec<String>,
    collection_workers: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> PassSummary {
    let started = Instant::now();
    let pool = Bulkhead::new(collection_workers);
    let mut tasks: JoinSet<CollectionReport> = JoinSet::new();
    let mut reports = Vec::with_capacity(names.len());
    let mut interrupted = false;

    info!(collections = names.len(), workers = collection_workers, "Starting replication pass");

    for name in names {
        if *shutdown_rx.borrow_and_update() {
            interrupted = true;
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                interrupted = true;
                break;
            }
            permit = pool.acquire() => permit,
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                warn!(error = %e, "Collection pool closed");
                interrupted = true;
                break;
            }
        };

        let worker = worker.clone();
        tasks.spawn(async move {
            let _permit = permit;
            worker.replicate(&name).await
        });

        while let Some(joined) = tasks.try_join_next() {
            collect(joined, &mut reports);
        }
    }

    if interrupted {
        info!(in_flight = tasks.len(), "Shutdown requested, draining running collections");
    }
    while let Some(joined) = tasks.join_next().await {
        collect(joined, &mut reports);
    }

    reports.sort_by(|a, b| a.name.cmp(&b.name));
    let stats = reports.iter().map(|r| r.stats).sum();
    let summary = PassSummary {
        collections: reports,
        stats,
        duration: started.elapsed(),
        interrupted,
    };
    metrics::record_pass(&summary);
    debug!(
        collections = summary.collections.len(),
        failed_collections = summary.failed_count(),
        "Pass drained"
    );
    summary
}

fn collect(
    joined: std::result::Result<CollectionReport, tokio::task::JoinError>,
    reports: &mut Vec<CollectionReport>,
) {
    match joined {
        Ok(report) => reports.push(report),
        // The worker catches its own errors; only a panic lands here.
        Err(e) => warn!(error = %e, "Collection task did not complete"),
    }
}
