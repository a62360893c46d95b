// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema cloning from source to target.
//!
//! # Flow
//!
//! ```text
//! source settings + mappings
//!        │
//!        ▼
//!  strip non-portable settings (uuid, version, creation_date, history.*, ...)
//!        │
//!        ▼
//!  inject fingerprint field  { type: keyword, index: false, doc_values: false }
//!        │
//!        ▼
//!  target exists? ── yes ──► no-op (schemas are created once, never altered)
//!        │ no
//!        ▼
//!  create_collection ── error ──► log cleaned payload, Schema error
//! ```

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::store::{FieldMapping, IndexSettings, Mappings, Schema, SharedStore};
use tracing::{debug, error, info};

/// Settings generated by the cluster that must not be sent on creation.
///
/// Matched against the exact key and against dotted sub-keys, so `history`
/// also removes `history.uuid`.
pub const NON_PORTABLE_SETTINGS: &[&str] = &[
    "uuid",
    "version",
    "creation_date",
    "creation_date_string",
    "provided_name",
    "history",
];

/// What `ensure_*` did on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    Created,
    AlreadyExists,
}

/// Remove cluster-generated settings.
pub fn clean_settings(settings: &IndexSettings) -> IndexSettings {
    let mut cleaned = settings.clone();
    cleaned.other.retain(|key, _| !is_non_portable(key));
    cleaned
}

fn is_non_portable(key: &str) -> bool {
    NON_PORTABLE_SETTINGS.iter().any(|np| {
        key == *np
            || key
                .strip_prefix(np)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    })
}

/// Add the fingerprint field definition. Replaces any existing definition.
pub fn inject_fingerprint(mappings: &mut Mappings, fingerprint_field: &str) {
    mappings
        .properties
        .insert(fingerprint_field.to_string(), FieldMapping::stored_keyword());
}

/// Target-ready schema built from the source's settings and mappings.
pub fn portable_schema(source: &Schema, fingerprint_field: &str) -> Schema {
    let mut mappings = source.mappings.clone();
    inject_fingerprint(&mut mappings, fingerprint_field);
    Schema {
        settings: clean_settings(&source.settings),
        mappings,
    }
}

/// First date field: top level first, then one level into object fields.
///
/// Nested matches are returned in dotted form (`event.created`).
pub fn detect_timestamp_field(mappings: &Mappings) -> Option<String> {
    if let Some((name, _)) = mappings.properties.iter().find(|(_, m)| m.is_date()) {
        return Some(name.clone());
    }
    mappings
        .properties
        .iter()
        .filter(|(_, m)| m.is_object())
        .find_map(|(parent, m)| {
            m.properties
                .iter()
                .find(|(_, child)| child.is_date())
                .map(|(child, _)| format!("{parent}.{child}"))
        })
}

/// Recreates source collection schemas on the target.
#[derive(Clone)]
pub struct SchemaCloner {
    source: SharedStore,
    target: SharedStore,
    fingerprint_field: String,
}

impl SchemaCloner {
    pub fn new(source: SharedStore, target: SharedStore, fingerprint_field: impl Into<String>) -> Self {
        Self {
            source,
            target,
            fingerprint_field: fingerprint_field.into(),
        }
    }

    /// Read settings and mappings of a source collection, unmodified.
    ///
    /// A vanished collection surfaces as `NotFound`; other read failures
    /// become `Schema` errors.
    pub async fn fetch_source_schema(&self, name: &str) -> Result<Schema> {
        let settings = self
            .source
            .get_settings(name)
            .await
            .map_err(|e| read_error(name, e))?;
        let mappings = self
            .source
            .get_schema(name)
            .await
            .map_err(|e| read_error(name, e))?;
        Ok(Schema { settings, mappings })
    }

    /// Make sure `name` exists on the target with the source's schema.
    pub async fn ensure_target_schema(&self, name: &str) -> Result<SchemaOutcome> {
        if self.target_exists(name).await? {
            debug!(collection = %name, "Target collection already exists");
            return Ok(SchemaOutcome::AlreadyExists);
        }
        let source = self.fetch_source_schema(name).await?;
        self.create_from(name, &source).await
    }

    /// Like [`ensure_target_schema`](Self::ensure_target_schema) with an
    /// already-fetched source schema.
    pub async fn ensure_from(&self, name: &str, source: &Schema) -> Result<SchemaOutcome> {
        if self.target_exists(name).await? {
            debug!(collection = %name, "Target collection already exists");
            return Ok(SchemaOutcome::AlreadyExists);
        }
        self.create_from(name, source).await
    }

    async fn target_exists(&self, name: &str) -> Result<bool> {
        self.target
            .collection_exists(name)
            .await
            .map_err(|e| ReplicationError::schema(name, format!("target existence check: {e}")))
    }

    async fn create_from(&self, name: &str, source: &Schema) -> Result<SchemaOutcome> {
        let schema = portable_schema(source, &self.fingerprint_field);

        match self.target.create_collection(name, &schema).await {
            Ok(()) => {
                info!(
                    collection = %name,
                    fields = schema.mappings.properties.len(),
                    shards = ?schema.settings.number_of_shards,
                    "Created target collection"
                );
                metrics::record_schema_created(true);
                Ok(SchemaOutcome::Created)
            }
            Err(e) => {
                // Lost a creation race with someone else: the schema is there.
                if matches!(self.target.collection_exists(name).await, Ok(true)) {
                    debug!(collection = %name, "Target collection appeared concurrently");
                    return Ok(SchemaOutcome::AlreadyExists);
                }
                let payload = serde_json::to_string(&schema.to_create_body())
                    .unwrap_or_else(|_| "<unserializable>".to_string());
                error!(
                    collection = %name,
                    error = %e,
                    payload = %payload,
                    "Failed to create target collection"
                );
                metrics::record_schema_created(false);
                Err(ReplicationError::schema(name, e.to_string()))
            }
        }
    }
}

fn read_error(name: &str, e: ReplicationError) -> ReplicationError {
    match e {
        ReplicationError::NotFound(_) => e,
        other => ReplicationError::schema(name, format!("source schema read: {other}")),
    }
}
