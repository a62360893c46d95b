// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication engine.
//!
//! This module defines all configuration types needed to run the replication engine.
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! It is validated once and never mutated afterwards.
//!
//! # Quick Start
//!
//! ```rust
//! use index_replicator::config::{ClusterConfig, ReplicationConfig};
//!
//! let config = ReplicationConfig {
//!     source: ClusterConfig::for_testing("http://source:9200"),
//!     target: ClusterConfig::for_testing("http://target:9200"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── source: ClusterConfig          # Cluster to read from
//! ├── target: ClusterConfig          # Cluster to write to
//! ├── replication: ReplicationSettings
//! │   ├── batch_size / scroll_ttl    # Extraction windows
//! │   ├── collection_workers         # Collection pool
//! │   ├── document_workers           # Per-collection bulk pool
//! │   └── max_inflight_bulk          # Process-wide bulk ceiling
//! ├── verify: VerifyConfig           # Drift sampling
//! └── checkpoint: CheckpointConfig   # Sync checkpoint location
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! source:
//!   hosts: ["https://es-old:9200"]
//!   username: elastic
//!   password: changeme
//! target:
//!   hosts: ["https://es-new:9200"]
//!   username: elastic
//!   password: changeme
//!
//! replication:
//!   collection_workers: 5
//!   document_workers: 100
//!   exclude_patterns: ["tmp-.*"]
//! ```

use crate::error::{ReplicationError, Result};
use crate::filter::ExclusionFilter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed from the CLI to ReplicationEngine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Cluster documents are read from. Never mutated by replication.
    pub source: ClusterConfig,

    /// Cluster documents are written to. Also holds the sync checkpoint.
    pub target: ClusterConfig,

    /// Pass scheduling, batching and pool sizes.
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Drift verification settings.
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Where the sync checkpoint lives on the target.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            source: ClusterConfig::default(),
            target: ClusterConfig::default(),
            replication: ReplicationSettings::default(),
            verify: VerifyConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a small, fast config for testing.
    pub fn for_testing() -> Self {
        Self {
            source: ClusterConfig::for_testing("http://source.test:9200"),
            target: ClusterConfig::for_testing("http://target.test:9200"),
            replication: ReplicationSettings {
                batch_size: 10,
                collection_workers: 2,
                document_workers: 4,
                max_inflight_bulk: 8,
                interval_sec: 1,
                ..Default::default()
            },
            verify: VerifyConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }

    /// Parse a YAML document. Does not validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ReplicationError::Config(format!("invalid YAML: {e}")))
    }

    /// Read and parse a YAML file. Does not validate.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Fail fast on anything that would otherwise surface mid-pass.
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.target.validate("target")?;
        self.replication.validate()?;
        self.verify.validate()?;
        self.checkpoint.validate()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClusterConfig: one connection per cluster
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for one cluster.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base URLs, tried in rotation.
    /// Example: `["https://es1:9200", "https://es2:9200"]`
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Basic-auth username. Must be paired with `password`.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic-auth password. Never logged.
    #[serde(default)]
    pub password: Option<String>,

    /// Verify TLS certificates.
    #[serde(default = "default_false")]
    pub verify_certs: bool,

    /// Per-request timeout as a duration string (e.g., "5m").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Request gzip-compressed responses.
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_request_timeout() -> String {
    "5m".to_string()
}

fn default_max_retries() -> usize {
    3
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            username: None,
            password: None,
            verify_certs: false,
            request_timeout: default_request_timeout(),
            max_retries: 3,
            compress: true,
        }
    }
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("verify_certs", &self.verify_certs)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("compress", &self.compress)
            .finish()
    }
}

impl ClusterConfig {
    /// Unauthenticated single-host config for testing.
    pub fn for_testing(host: &str) -> Self {
        Self {
            hosts: vec![host.to_string()],
            request_timeout: "5s".to_string(),
            max_retries: 1,
            ..Default::default()
        }
    }

    /// Parse `request_timeout`, falling back to 5 minutes.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(300))
    }

    /// Retry policy derived from this connection's settings.
    pub fn retry_config(&self) -> crate::resilience::RetryConfig {
        crate::resilience::RetryConfig::for_store(self.max_retries, self.request_timeout_duration())
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ReplicationError::Config(format!("{role} hosts must be specified")));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ReplicationError::Config(format!("{role} hosts contain an empty entry")));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ReplicationError::Config(format!(
                "{role} username and password must be given together"
            )));
        }
        parse_duration_field(&format!("{role}.request_timeout"), &self.request_timeout)?;
        Ok(())
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Config(format!("{field}: invalid duration {value:?}: {e}")))
}

/// Elasticsearch time unit grammar for values sent to the cluster as-is.
const TIME_VALUE_PATTERN: &str = r"^\d+(d|h|m|s|ms|micros|nanos)$";

fn validate_time_value(field: &str, value: &str) -> Result<()> {
    let grammar = Regex::new(TIME_VALUE_PATTERN)
        .map_err(|e| ReplicationError::Config(format!("time value grammar: {e}")))?;
    if grammar.is_match(value) {
        Ok(())
    } else {
        Err(ReplicationError::Config(format!(
            "{field}: invalid time value {value:?}, expected e.g. \"60m\" or \"500ms\""
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings: pass scheduling, batching, pools
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for replication passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Loop forever, sleeping `interval_sec` between passes.
    #[serde(default = "default_false")]
    pub continuous: bool,

    /// Seconds between passes in continuous mode.
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,

    /// Documents per bulk request. Also the scroll page size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Scroll cursor lifetime as a duration string.
    #[serde(default = "default_scroll_ttl")]
    pub scroll_ttl: String,

    /// Collections replicated in parallel.
    #[serde(default = "default_collection_workers")]
    pub collection_workers: usize,

    /// Bulk requests in flight per collection.
    #[serde(default = "default_document_workers")]
    pub document_workers: usize,

    /// Bulk requests in flight across the whole process.
    /// Must not exceed `collection_workers * document_workers`.
    #[serde(default = "default_max_inflight_bulk")]
    pub max_inflight_bulk: usize,

    /// Optional throttle on bulk requests per second.
    #[serde(default)]
    pub bulk_rate_limit_per_sec: Option<u32>,

    /// Extra exclusion patterns, appended to the built-in ones.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Explicit timestamp field; overrides schema detection.
    #[serde(default)]
    pub timestamp_field: Option<String>,

    /// Reserved field holding each document's content fingerprint.
    #[serde(default = "default_fingerprint_field")]
    pub fingerprint_field: String,

    /// Refresh interval applied when the previous one cannot be restored.
    #[serde(default = "default_restore_refresh_interval")]
    pub restore_refresh_interval: String,
}

fn default_interval_sec() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    10_000
}

fn default_scroll_ttl() -> String {
    "60m".to_string()
}

fn default_collection_workers() -> usize {
    5
}

fn default_document_workers() -> usize {
    100
}

fn default_max_inflight_bulk() -> usize {
    64
}

fn default_fingerprint_field() -> String {
    "_doc_hash".to_string()
}

fn default_restore_refresh_interval() -> String {
    "1s".to_string()
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            continuous: false,
            interval_sec: 3600,
            batch_size: 10_000,
            scroll_ttl: default_scroll_ttl(),
            collection_workers: 5,
            document_workers: 100,
            max_inflight_bulk: 64,
            bulk_rate_limit_per_sec: None,
            exclude_patterns: Vec::new(),
            timestamp_field: None,
            fingerprint_field: default_fingerprint_field(),
            restore_refresh_interval: default_restore_refresh_interval(),
        }
    }
}

impl ReplicationSettings {
    /// Get the pass interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    /// Scroll TTL in the cluster's time-unit syntax ("60m").
    ///
    /// Validated by `validate()`, passed through verbatim.
    pub fn scroll_ttl(&self) -> &str {
        &self.scroll_ttl
    }

    /// Rate limit for bulk requests, if configured.
    pub fn rate_limit_config(&self) -> Option<crate::resilience::RateLimitConfig> {
        self.bulk_rate_limit_per_sec
            .map(crate::resilience::RateLimitConfig::per_second)
    }

    /// Built-in exclusion patterns plus the configured extras.
    pub fn exclusion_filter(&self) -> Result<ExclusionFilter> {
        ExclusionFilter::with_extra(&self.exclude_patterns)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ReplicationError::Config("batch_size must be > 0".into()));
        }
        if self.collection_workers == 0 || self.document_workers == 0 {
            return Err(ReplicationError::Config("worker counts must be > 0".into()));
        }
        if self.max_inflight_bulk == 0 {
            return Err(ReplicationError::Config("max_inflight_bulk must be > 0".into()));
        }
        let ceiling = self.collection_workers.saturating_mul(self.document_workers);
        if self.max_inflight_bulk > ceiling {
            return Err(ReplicationError::Config(format!(
                "max_inflight_bulk ({}) exceeds collection_workers x document_workers ({ceiling})",
                self.max_inflight_bulk
            )));
        }
        if self.fingerprint_field.trim().is_empty() {
            return Err(ReplicationError::Config("fingerprint_field must not be empty".into()));
        }
        if self.bulk_rate_limit_per_sec == Some(0) {
            return Err(ReplicationError::Config("bulk_rate_limit_per_sec must be > 0".into()));
        }
        validate_time_value("replication.scroll_ttl", &self.scroll_ttl)?;
        if self.restore_refresh_interval != "-1" {
            validate_time_value(
                "replication.restore_refresh_interval",
                &self.restore_refresh_interval,
            )?;
        }
        self.exclusion_filter()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VerifyConfig: drift sampling
// ═══════════════════════════════════════════════════════════════════════════════

/// Drift verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Upper bound on documents sampled per side per collection.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

fn default_sample_size() -> usize {
    1000
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { sample_size: 1000 }
    }
}

impl VerifyConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(ReplicationError::Config("verify.sample_size must be > 0".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig: sync checkpoint persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Sync checkpoint location on the target cluster.
///
/// A single document holding the completion time of the last full pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Metadata collection on the target.
    #[serde(default = "default_meta_collection")]
    pub meta_collection: String,

    /// Document id of the checkpoint record.
    #[serde(default = "default_document_id")]
    pub document_id: String,

    /// How far back the checkpoint defaults to when absent (seconds).
    #[serde(default = "default_lookback_sec")]
    pub default_lookback_sec: u64,
}

fn default_meta_collection() -> String {
    ".replication_meta".to_string()
}

fn default_document_id() -> String {
    "last_sync".to_string()
}

fn default_lookback_sec() -> u64 {
    86_400 // 24 hours
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            meta_collection: default_meta_collection(),
            document_id: default_document_id(),
            default_lookback_sec: 86_400,
        }
    }
}

impl CheckpointConfig {
    /// Get the default lookback as a Duration.
    pub fn default_lookback(&self) -> Duration {
        Duration::from_secs(self.default_lookback_sec)
    }

    fn validate(&self) -> Result<()> {
        if self.meta_collection.is_empty() || self.document_id.is_empty() {
            return Err(ReplicationError::Config(
                "checkpoint meta_collection and document_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
