// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine and collection state types.
//!
//! # Engine State Transitions
//!
//! ```text
//!                  connect()
//! Created ───────────────────→ Connecting
//!    │                              │
//!    │ (shutdown before connect)    │ (both clusters reachable)
//!    ↓                              ↓
//! Stopped                       Running ──── passes, verify, backfill
//!    ↑                              │
//!    │                    shutdown()│
//!    │                              ↓
//!    └────────────────── ShuttingDown
//!
//! Connecting ── (ping/info failed) ──→ Failed
//! ```
//!
//! # Collection State Transitions
//!
//! ```text
//! Pending ──► SchemaReady ──► Extracting ──► Done
//!    │             │              │
//!    └─────────────┴──────────────┴────────► Failed
//! ```
//!
//! An empty collection goes `SchemaReady → Done` without extracting.

use crate::loader::BatchResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// State of the replication engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created, clusters not contacted yet.
    ///
    /// Call [`connect()`](super::ReplicationEngine::connect) before running passes.
    Created,

    /// Checking connectivity to source and target.
    Connecting,

    /// Both clusters answered. Passes, verification and backfill may run.
    Running,

    /// Shutdown requested. In-flight collections finish, no new ones start.
    ShuttingDown,

    /// Stopped cleanly.
    Stopped,

    /// A cluster was unreachable at startup.
    ///
    /// Check logs for error details. Engine cannot recover from this state.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Connecting => write!(f, "Connecting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-collection replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Pending,
    SchemaReady,
    Extracting,
    Done,
    Failed,
}

impl CollectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollectionState::Done | CollectionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionState::Pending => "pending",
            CollectionState::SchemaReady => "schema_ready",
            CollectionState::Extracting => "extracting",
            CollectionState::Done => "done",
            CollectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document counts for a batch, a collection or a whole pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    /// Documents handed to the loader (`updated + failed` for loaded batches).
    pub processed: u64,
    /// Documents the target accepted.
    pub updated: u64,
    /// Documents rejected. A failed collection reports exactly one.
    pub failed: u64,
}

impl ReplicationStats {
    pub fn from_batch(result: &BatchResult) -> Self {
        Self {
            processed: result.success + result.failed,
            updated: result.success,
            failed: result.failed,
        }
    }

    /// Entry reported for a collection that hit a fatal error.
    pub fn failed_collection() -> Self {
        Self {
            processed: 0,
            updated: 0,
            failed: 1,
        }
    }
}

impl std::ops::Add for ReplicationStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            processed: self.processed + rhs.processed,
            updated: self.updated + rhs.updated,
            failed: self.failed + rhs.failed,
        }
    }
}

impl std::ops::AddAssign for ReplicationStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for ReplicationStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, s| acc + s)
    }
}

/// Lock-free accumulator shared by concurrent batch tasks.
#[derive(Debug, Default)]
pub struct StatsCollector {
    processed: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, result: &BatchResult) {
        self.add(ReplicationStats::from_batch(result));
    }

    /// Count a failure that did not come from a bulk response.
    pub fn record_failure(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add(&self, stats: ReplicationStats) {
        self.processed.fetch_add(stats.processed, Ordering::Relaxed);
        self.updated.fetch_add(stats.updated, Ordering::Relaxed);
        self.failed.fetch_add(stats.failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReplicationStats {
        ReplicationStats {
            processed: self.processed.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of replicating one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub name: String,
    pub state: CollectionState,
    pub stats: ReplicationStats,
    /// Explicit or detected timestamp field, informational.
    pub timestamp_field: Option<String>,
    /// Documents on the source when extraction started.
    pub source_count: u64,
    pub error: Option<String>,
    #[serde(with = "humantime_serde_compat")]
    pub duration: Duration,
}

impl CollectionReport {
    pub fn is_failed(&self) -> bool {
        self.state == CollectionState::Failed
    }
}

/// Outcome of one pass over a set of collections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub collections: Vec<CollectionReport>,
    pub stats: ReplicationStats,
    #[serde(with = "humantime_serde_compat")]
    pub duration: Duration,
    /// Shutdown stopped the pass before every collection was started.
    pub interrupted: bool,
}

impl PassSummary {
    pub fn failed_collections(&self) -> impl Iterator<Item = &CollectionReport> {
        self.collections.iter().filter(|c| c.is_failed())
    }

    pub fn failed_count(&self) -> usize {
        self.failed_collections().count()
    }
}

mod humantime_serde_compat {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }
}
