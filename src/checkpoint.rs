// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync checkpoint persistence.
//!
//! One document on the target cluster records when the last full pass
//! completed:
//!
//! ```text
//! <meta_collection>/_doc/<document_id>  =  { "timestamp": "2024-05-01T12:00:00.000000Z" }
//! ```
//!
//! ## Checkpoint Semantics
//!
//! - Read once when the engine connects. Absent or unreadable means
//!   "24 hours ago" (the configured lookback).
//! - Written by the coordinator only, once per *completed* pass. An
//!   interrupted pass leaves the previous checkpoint untouched.
//! - Timestamps are written as RFC 3339 UTC. Naive ISO-8601 values (no
//!   offset) written by older tooling are read as UTC.

use crate::config::CheckpointConfig;
use crate::error::{ReplicationError, Result};
use crate::store::{FieldMapping, Fields, Schema, SharedStore};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

const TIMESTAMP_FIELD: &str = "timestamp";

/// Parse a stored checkpoint timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a checkpoint timestamp.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reads and writes the sync checkpoint on the target.
#[derive(Clone)]
pub struct CheckpointStore {
    target: SharedStore,
    config: CheckpointConfig,
}

impl CheckpointStore {
    pub fn new(target: SharedStore, config: CheckpointConfig) -> Self {
        Self { target, config }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// The stored checkpoint, `Ok(None)` if absent.
    pub async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let doc = self
            .target
            .get_document(&self.config.meta_collection, &self.config.document_id)
            .await?;
        let Some(fields) = doc else {
            return Ok(None);
        };

        let raw = fields
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ReplicationError::Decode("checkpoint without timestamp".into()))?;
        parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| ReplicationError::Decode(format!("unparseable checkpoint {raw:?}")))
    }

    /// The stored checkpoint, or `now - default_lookback` when it is absent
    /// or unreadable.
    pub async fn load_or_default(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = now
            - chrono::Duration::from_std(self.config.default_lookback())
                .unwrap_or_else(|_| chrono::Duration::days(1));

        match self.load().await {
            Ok(Some(at)) => {
                debug!(checkpoint = %format_timestamp(at), "Loaded sync checkpoint");
                at
            }
            Ok(None) => {
                info!(default = %format_timestamp(fallback), "No sync checkpoint, using default lookback");
                fallback
            }
            Err(e) => {
                warn!(error = %e, default = %format_timestamp(fallback), "Unreadable sync checkpoint, using default lookback");
                fallback
            }
        }
    }

    /// Persist `at` as the last completed pass. Creates the metadata
    /// collection when missing.
    pub async fn save(&self, at: DateTime<Utc>) -> Result<()> {
        self.ensure_meta_collection().await?;

        let mut fields = Fields::new();
        fields.insert(TIMESTAMP_FIELD.into(), Value::String(format_timestamp(at)));
        self.target
            .put_document(&self.config.meta_collection, &self.config.document_id, fields)
            .await?;

        info!(checkpoint = %format_timestamp(at), "Sync checkpoint saved");
        Ok(())
    }

    async fn ensure_meta_collection(&self) -> Result<()> {
        let name = &self.config.meta_collection;
        if self.target.collection_exists(name).await? {
            return Ok(());
        }

        let mut schema = Schema::default();
        schema.settings.number_of_shards = Some(1);
        schema
            .mappings
            .properties
            .insert(TIMESTAMP_FIELD.into(), FieldMapping::of_type("date"));

        match self.target.create_collection(name, &schema).await {
            Ok(()) => {
                debug!(collection = %name, "Created checkpoint collection");
                Ok(())
            }
            Err(e) => {
                // Another writer may have created it first.
                if self.target.collection_exists(name).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreClient};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryStore>, CheckpointStore) {
        let target = Arc::new(MemoryStore::new("target"));
        let checkpoints = CheckpointStore::new(target.clone(), CheckpointConfig::default());
        (target, checkpoints)
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00"), Some(expected));
        assert!(parse_timestamp("2024-05-01T12:00:00.123456").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_format_roundtrip() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let raw = format_timestamp(at);
        assert_eq!(raw, "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_timestamp(&raw), Some(at));
    }

    #[tokio::test]
    async fn test_default_lookback_is_exactly_24h() {
        let (_target, checkpoints) = store();
        let now = Utc::now();
        let at = checkpoints.load_or_default(now).await;
        assert_eq!(now - at, chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn test_save_creates_meta_collection_and_loads_back() {
        let (target, checkpoints) = store();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        checkpoints.save(at).await.unwrap();

        assert!(target.collection_exists(".replication_meta").await.unwrap());
        assert_eq!(checkpoints.load().await.unwrap(), Some(at));
        assert_eq!(checkpoints.load_or_default(Utc::now()).await, at);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_target, checkpoints) = store();
        let first = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

        checkpoints.save(first).await.unwrap();
        checkpoints.save(second).await.unwrap();
        assert_eq!(checkpoints.load().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_unreadable_checkpoint_falls_back() {
        let (target, checkpoints) = store();
        target
            .insert_document(
                ".replication_meta",
                "last_sync",
                json!({"timestamp": "not-a-date"}).as_object().cloned().unwrap(),
            )
            .await;

        assert!(checkpoints.load().await.is_err());
        let now = Utc::now();
        assert_eq!(
            checkpoints.load_or_default(now).await,
            now - chrono::Duration::hours(24)
        );
    }

    #[tokio::test]
    async fn test_naive_legacy_checkpoint_is_read_as_utc() {
        let (target, checkpoints) = store();
        target
            .insert_document(
                ".replication_meta",
                "last_sync",
                json!({"timestamp": "2024-03-10T08:30:00.250000"}).as_object().cloned().unwrap(),
            )
            .await;

        let at = checkpoints.load().await.unwrap().unwrap();
        assert_eq!(at.timestamp(), Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap().timestamp());
    }
}
