// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store client boundary.
//!
//! [`StoreClient`] is the complete set of cluster operations the engine
//! consumes. Two implementations ship with the crate:
//!
//! - [`HttpStore`]: Elasticsearch-compatible REST client (reqwest)
//! - [`MemoryStore`]: in-process store for tests and dry runs
//!
//! # Example
//!
//! ```rust,no_run
//! use index_replicator::store::{StoreClient, BoxFuture, PageStream, MemoryStore};
//!
//! # async fn example() -> index_replicator::Result<()> {
//! let store = MemoryStore::new("source");
//! if store.ping().await? {
//!     let info = store.info().await?;
//!     println!("{} {}", info.cluster_name, info.version);
//! }
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod memory;
pub mod types;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use types::{
    BulkOutcome, ClusterInfo, CollectionInfo, Document, FieldMapping, Fields, IndexSettings,
    Mappings, Schema,
};

use crate::error::Result;
use futures::stream::BoxStream;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Lazy sequence of scan pages. Finite; ends after the last page or after
/// the first error.
pub type PageStream<'a> = BoxStream<'a, Result<Vec<Document>>>;

/// A store shared by every worker of a pass.
pub type SharedStore = Arc<dyn StoreClient>;

/// Operations the engine needs from one cluster.
///
/// Implementations are shared across every worker of a pass, so all methods
/// take `&self` and must be safe under concurrent use.
pub trait StoreClient: Send + Sync + 'static {
    /// Label used in logs and metrics ("source", "target").
    fn name(&self) -> &str;

    /// Cheap reachability check.
    fn ping(&self) -> BoxFuture<'_, bool>;

    /// Version and cluster name.
    fn info(&self) -> BoxFuture<'_, ClusterInfo>;

    /// Collections whose names match `pattern` (`*` wildcards).
    fn list_collections(&self, pattern: &str) -> BoxFuture<'_, Vec<CollectionInfo>>;

    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool>;

    /// Create a collection. Fails if it already exists.
    fn create_collection(&self, name: &str, schema: &Schema) -> BoxFuture<'_, ()>;

    fn get_schema(&self, name: &str) -> BoxFuture<'_, Mappings>;

    fn get_settings(&self, name: &str) -> BoxFuture<'_, IndexSettings>;

    /// Apply a partial settings update. Only fields that are set are sent.
    fn put_settings(&self, name: &str, settings: &IndexSettings) -> BoxFuture<'_, ()>;

    fn count(&self, name: &str) -> BoxFuture<'_, u64>;

    /// Start a fresh, independent full scan. Each call opens its own cursor.
    fn scan(&self, name: &str, page_size: usize, cursor_ttl: &str) -> PageStream<'_>;

    /// Create-or-replace every document by id.
    ///
    /// Individual document rejections are counted in the outcome; an `Err`
    /// means the request as a whole did not complete.
    fn bulk_upsert(&self, collection: &str, docs: Vec<Document>) -> BoxFuture<'_, BulkOutcome>;

    /// Randomly scored sample of up to `size` documents, projected to
    /// `fields` (all fields when empty).
    fn search_sample(&self, name: &str, size: usize, fields: &[&str])
        -> BoxFuture<'_, Vec<Document>>;

    /// `Ok(None)` when the document or its collection does not exist.
    fn get_document(&self, collection: &str, id: &str) -> BoxFuture<'_, Option<Fields>>;

    fn put_document(&self, collection: &str, id: &str, fields: Fields) -> BoxFuture<'_, ()>;
}

/// Does `name` match a `*`-wildcard pattern? Everything but `*` is literal.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    match Regex::new(&format!("^(?s:{})$", body.join(".*"))) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("logs-*", "logs-2024"));
        assert!(!wildcard_match("logs-*", "app-logs"));
        assert!(wildcard_match("*-2024", "logs-2024"));
        assert!(wildcard_match("a*c*e", "abcde"));
        assert!(!wildcard_match("a*c*e", "abcd"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exactly"));
    }

    #[test]
    fn test_wildcard_treats_regex_syntax_literally() {
        assert!(wildcard_match("logs.2024*", "logs.2024-01"));
        assert!(!wildcard_match("logs.2024*", "logsX2024-01"));
        assert!(wildcard_match("a+b(c)*", "a+b(c)-d"));
        assert!(!wildcard_match("a+b", "aab"));
        assert!(wildcard_match("**", ""));
    }

    #[test]
    fn test_wildcard_suffix_does_not_overlap_prefix() {
        assert!(!wildcard_match("ab*ba", "aba"));
        assert!(wildcard_match("ab*ba", "abba"));
    }
}
