// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drift verification by sampling both clusters.
//!
//! # Algorithm
//!
//! ```text
//! for each collection:
//!   exists on both? ── no ──► missing_indices += 1, mismatches += 1, next
//!        │ yes
//!   |count(source) - count(target)| ──► count_mismatches, mismatches
//!        │
//!   random sample source (full docs)  ──► id → fingerprint(fields)
//!   random sample target (fp field)   ──► id → stored fingerprint
//!        │
//!   every source id: absent on target side or different ──► content mismatch
//!                    otherwise                          ──► checked
//! ```
//!
//! The two samples are drawn independently, so on collections larger than the
//! sample size a source id can be missing from the target sample by chance.
//! The result is a statistical drift signal, not a completeness proof.
//!
//! Source fingerprints are recomputed from the source documents, so the
//! source never needs to carry the fingerprint field. Nothing is written to
//! either cluster.

use crate::error::Result;
use crate::hasher;
use crate::metrics;
use crate::store::SharedStore;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Findings for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionVerification {
    pub name: String,
    pub source_count: Option<u64>,
    pub target_count: Option<u64>,
    /// Source sample size actually drawn.
    pub sampled: u64,
    pub checked: u64,
    pub missing: bool,
    pub count_delta: u64,
    pub content_mismatches: u64,
    /// Set when a read failed and the collection could not be compared.
    pub error: Option<String>,
}

impl CollectionVerification {
    pub fn is_clean(&self) -> bool {
        !self.missing && self.count_delta == 0 && self.content_mismatches == 0 && self.error.is_none()
    }
}

/// Aggregated verification result. Fresh per run, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Sampled documents whose fingerprints matched.
    pub checked: u64,
    /// `missing_indices + count_mismatches + content_mismatches`.
    pub mismatches: u64,
    pub missing_indices: u64,
    pub count_mismatches: u64,
    pub content_mismatches: u64,
    /// Collections that could not be compared because of read errors.
    pub errors: u64,
    pub collections: Vec<CollectionVerification>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0 && self.errors == 0
    }

    fn absorb(&mut self, c: CollectionVerification) {
        self.checked += c.checked;
        if c.missing {
            self.missing_indices += 1;
            self.mismatches += 1;
        }
        self.count_mismatches += c.count_delta;
        self.content_mismatches += c.content_mismatches;
        self.mismatches += c.count_delta + c.content_mismatches;
        if c.error.is_some() {
            self.errors += 1;
        }
        self.collections.push(c);
    }
}

/// Compares source and target by counts and sampled fingerprints.
#[derive(Clone)]
pub struct DriftVerifier {
    source: SharedStore,
    target: SharedStore,
    fingerprint_field: String,
    sample_size: usize,
}

impl DriftVerifier {
    pub fn new(
        source: SharedStore,
        target: SharedStore,
        fingerprint_field: impl Into<String>,
        sample_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            fingerprint_field: fingerprint_field.into(),
            sample_size,
        }
    }

    /// Verify each named collection. Read errors are counted per collection
    /// and do not stop the run.
    pub async fn verify(&self, names: &[String]) -> VerificationReport {
        let mut report = VerificationReport::default();
        for name in names {
            let result = match self.verify_collection(name).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(collection = %name, error = %e, "Verification failed");
                    CollectionVerification {
                        name: name.clone(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            report.absorb(result);
        }

        metrics::record_verification(&report);
        info!(
            collections = names.len(),
            checked = report.checked,
            mismatches = report.mismatches,
            missing_indices = report.missing_indices,
            count_mismatches = report.count_mismatches,
            content_mismatches = report.content_mismatches,
            errors = report.errors,
            "Verification complete"
        );
        report
    }

    #[instrument(skip(self))]
    pub async fn verify_collection(&self, name: &str) -> Result<CollectionVerification> {
        let mut result = CollectionVerification {
            name: name.to_string(),
            ..Default::default()
        };

        let (on_source, on_target) = futures::try_join!(
            self.source.collection_exists(name),
            self.target.collection_exists(name)
        )?;
        if !on_source || !on_target {
            warn!(collection = %name, on_source, on_target, "Collection missing on one side");
            result.missing = true;
            return Ok(result);
        }

        let (source_count, target_count) =
            futures::try_join!(self.source.count(name), self.target.count(name))?;
        result.source_count = Some(source_count);
        result.target_count = Some(target_count);
        result.count_delta = source_count.abs_diff(target_count);
        if result.count_delta > 0 {
            warn!(collection = %name, source_count, target_count, "Document count mismatch");
        }

        let size = (self.sample_size as u64).min(source_count) as usize;
        if size == 0 {
            return Ok(result);
        }

        // Source documents carry no stored fingerprint, so the full body is
        // fetched and fingerprinted here.
        let source_sample = self.source.search_sample(name, size, &[]).await?;
        let target_sample = self
            .target
            .search_sample(name, size, &[self.fingerprint_field.as_str()])
            .await?;

        let target_fps: HashMap<String, Option<String>> = target_sample
            .into_iter()
            .map(|doc| {
                let fp = doc
                    .fields
                    .get(&self.fingerprint_field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                (doc.id, fp)
            })
            .collect();

        result.sampled = source_sample.len() as u64;
        for doc in &source_sample {
            let expected = hasher::fingerprint_without(&doc.fields, &self.fingerprint_field);
            match target_fps.get(&doc.id) {
                Some(Some(actual)) if *actual == expected => result.checked += 1,
                Some(_) => {
                    debug!(collection = %name, id = %doc.id, "Fingerprint differs");
                    result.content_mismatches += 1;
                }
                None => {
                    debug!(collection = %name, id = %doc.id, "Not in target sample");
                    result.content_mismatches += 1;
                }
            }
        }

        debug!(
            collection = %name,
            sampled = result.sampled,
            checked = result.checked,
            content_mismatches = result.content_mismatches,
            "Collection verified"
        );
        Ok(result)
    }
}
