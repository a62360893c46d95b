// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are categorized by where they surface in a replication pass and
//! carry enough context (operation, cluster, collection) to debug from logs.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Network errors, timeouts, connection resets |
//! | `Store` | 429/5xx only | Cluster answered with an error status |
//! | `Connectivity` | No | Cluster unreachable at startup (fatal) |
//! | `NotFound` | No | Collection or document does not exist |
//! | `Schema` | No | Schema read/create failed for one collection |
//! | `Config` | No | Configuration invalid |
//! | `Decode` | No | Response body did not have the expected shape |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Propagation
//!
//! Per-document and per-batch failures never surface as errors: the loader
//! folds them into statistics. Per-collection errors are caught by the
//! coordinator and turned into a failed collection report. Only
//! `Connectivity` and `Config` errors are expected to end the process.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication or verification.
///
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried with backoff.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// HTTP transport failure talking to a cluster.
    ///
    /// Connection refused, reset, timed out. Retryable.
    #[error("Transport error ({operation}): {message}")]
    Transport {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The cluster answered with a non-success HTTP status.
    ///
    /// Retryable only when the cluster signals overload (429) or a
    /// server-side failure (5xx).
    #[error("Store error ({operation}): HTTP {status}: {message}")]
    Store {
        operation: String,
        status: u16,
        message: String,
    },

    /// A cluster could not be reached during the startup check.
    ///
    /// Fatal: the process exits before any replication work.
    #[error("Cannot reach {cluster} cluster: {message}")]
    Connectivity { cluster: String, message: String },

    /// A collection or document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reading or creating a collection schema failed.
    ///
    /// Fatal for that collection only, never retried.
    #[error("Schema error ({collection}): {message}")]
    Schema { collection: String, message: String },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., running a pass before `connect()`).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a transport error from a reqwest error.
    pub fn transport(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a transport error without source
    pub fn transport_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error from an HTTP status and response body.
    pub fn store(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a schema error for a collection.
    pub fn schema(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Store { status, .. } => *status == 429 || *status >= 500,
            Self::Connectivity { .. } => false,
            Self::NotFound(_) => false,
            Self::Schema { .. } => false,
            Self::Config(_) => false,
            Self::Decode(_) => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Store { .. } => "store",
            Self::Connectivity { .. } => "connectivity",
            Self::NotFound(_) => "not_found",
            Self::Schema { .. } => "schema",
            Self::Config(_) => "config",
            Self::Decode(_) => "decode",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for ReplicationError {
    fn from(e: reqwest::Error) -> Self {
        Self::transport("unknown", e)
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
