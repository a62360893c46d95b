// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk loader for tagged documents.
//!
//! # Design
//!
//! ```text
//! batch ──▶ tag each doc ──▶ one bulk_upsert ──▶ BatchResult
//!           (fingerprint       (per-doc status     success / failed
//!            original fields,   counted, never
//!            then attach)       raised)
//! ```
//!
//! A batch never fails as a whole from the caller's point of view: a request
//! that could not complete (after the store client's own retries) counts
//! every document in it as failed.

use crate::hasher;
use crate::metrics;
use crate::resilience::RateLimiter;
use crate::store::{Document, SharedStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Outcome of loading one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Documents in the batch.
    pub total: u64,
    /// Documents the target accepted.
    pub success: u64,
    /// Documents the target rejected, or that were in a failed request.
    pub failed: u64,
}

impl BatchResult {
    /// Check if every document was accepted.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Writes batches to the target collection.
#[derive(Clone)]
pub struct Loader {
    target: SharedStore,
    fingerprint_field: Arc<str>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl Loader {
    pub fn new(target: SharedStore, fingerprint_field: &str) -> Self {
        Self {
            target,
            fingerprint_field: Arc::from(fingerprint_field),
            rate_limiter: None,
        }
    }

    /// Throttle bulk requests through a shared limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn fingerprint_field(&self) -> &str {
        &self.fingerprint_field
    }

    /// Attach the fingerprint of the document's original fields.
    ///
    /// A fingerprint field already present on the source is not part of the
    /// original content and is replaced.
    pub fn tag(&self, mut doc: Document) -> Document {
        doc.fields.remove(&*self.fingerprint_field);
        let fp = hasher::fingerprint(&doc.fields);
        doc.fields
            .insert(self.fingerprint_field.to_string(), Value::String(fp));
        doc
    }

    /// Tag and upsert one batch.
    #[instrument(skip(self, batch), fields(collection = %collection, docs = batch.len()))]
    pub async fn load(&self, collection: &str, batch: Vec<Document>) -> BatchResult {
        let total = batch.len() as u64;
        if total == 0 {
            return BatchResult::default();
        }

        let tagged: Vec<Document> = batch.into_iter().map(|d| self.tag(d)).collect();

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let started = Instant::now();
        let result = match self.target.bulk_upsert(collection, tagged).await {
            Ok(outcome) => BatchResult {
                total,
                success: outcome.success,
                failed: outcome.failed,
            },
            Err(e) => {
                warn!(
                    collection = %collection,
                    docs = total,
                    error = %e,
                    "Bulk request failed, counting batch as failed"
                );
                BatchResult {
                    total,
                    success: 0,
                    failed: total,
                }
            }
        };

        metrics::record_batch_load(collection, &result, started.elapsed());
        debug!(
            collection = %collection,
            total = result.total,
            success = result.success,
            failed = result.failed,
            "Batch loaded"
        );
        result
    }
}
