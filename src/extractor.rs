// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-collection extraction and the target refresh guard.
//!
//! [`Extractor::scan`] opens a fresh scroll cursor on every call and regroups
//! the store's pages into batches of at most `batch_size` documents. Order
//! across the collection is whatever the cluster returns.
//!
//! [`RefreshGuard`] switches the target collection's refresh off for the
//! duration of a bulk load and puts it back afterwards:
//!
//! ```text
//! acquire: read refresh_interval ──► put "-1"
//!   ... bulk load ...
//! release: put previous (or default "1s")
//!          └─ not released? Drop spawns the restore on the runtime
//! ```

use crate::error::Result;
use crate::store::{Document, IndexSettings, PageStream, SharedStore};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Stream of batches; ends after the last batch or after the first error.
pub type BatchStream<'a> = BoxStream<'a, Result<Vec<Document>>>;

/// Refresh interval meaning "never refresh".
pub const REFRESH_DISABLED: &str = "-1";

/// Scans source collections in fixed-size windows.
#[derive(Clone)]
pub struct Extractor {
    source: SharedStore,
    batch_size: usize,
    cursor_ttl: String,
}

struct Rechunk<'a> {
    pages: PageStream<'a>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl Extractor {
    pub fn new(source: SharedStore, batch_size: usize, cursor_ttl: impl Into<String>) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            cursor_ttl: cursor_ttl.into(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start a new, independent scan of `name`.
    pub fn scan(&self, name: &str) -> BatchStream<'_> {
        let batch_size = self.batch_size;
        let state = Rechunk {
            pages: self.source.scan(name, batch_size, &self.cursor_ttl),
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(state, move |mut st| async move {
            loop {
                if st.buffer.len() >= batch_size {
                    let batch: Vec<Document> = st.buffer.drain(..batch_size).collect();
                    return Some((Ok(batch), st));
                }
                if st.exhausted {
                    if st.buffer.is_empty() {
                        return None;
                    }
                    let batch: Vec<Document> = st.buffer.drain(..).collect();
                    return Some((Ok(batch), st));
                }
                match st.pages.next().await {
                    Some(Ok(page)) => st.buffer.extend(page),
                    Some(Err(e)) => {
                        st.exhausted = true;
                        st.buffer.clear();
                        return Some((Err(e), st));
                    }
                    None => st.exhausted = true,
                }
            }
        })
        .boxed()
    }
}

/// Scoped "refresh disabled" state on a target collection.
///
/// Call [`release`](Self::release) when the collection finishes, whether it
/// succeeded or not. A guard dropped without release (panic, cancelled task)
/// schedules the restore on the current runtime.
pub struct RefreshGuard {
    target: SharedStore,
    collection: String,
    restore_to: String,
    active: bool,
}

impl RefreshGuard {
    /// Disable refresh on `collection`. Best-effort: a failure is logged and
    /// the returned guard is inert.
    pub async fn acquire(target: SharedStore, collection: &str, default_restore: &str) -> Self {
        let previous = match target.get_settings(collection).await {
            Ok(settings) => settings.refresh_interval,
            Err(e) => {
                debug!(collection, error = %e, "Could not read refresh interval");
                None
            }
        };
        let restore_to = previous
            .filter(|p| p != REFRESH_DISABLED)
            .unwrap_or_else(|| default_restore.to_string());

        let active = match target
            .put_settings(collection, &IndexSettings::refresh_only(REFRESH_DISABLED))
            .await
        {
            Ok(()) => {
                debug!(collection, restore_to = %restore_to, "Refresh disabled");
                true
            }
            Err(e) => {
                warn!(collection, error = %e, "Failed to disable refresh, continuing");
                false
            }
        };

        Self {
            target,
            collection: collection.to_string(),
            restore_to,
            active,
        }
    }

    /// Whether refresh was actually disabled.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn restore_to(&self) -> &str {
        &self.restore_to
    }

    /// Restore the refresh interval. Failure is logged, not retried.
    pub async fn release(mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let result = self
            .target
            .put_settings(&self.collection, &IndexSettings::refresh_only(self.restore_to.clone()))
            .await;
        match &result {
            Ok(()) => debug!(collection = %self.collection, refresh = %self.restore_to, "Refresh restored"),
            Err(e) => warn!(
                collection = %self.collection,
                error = %e,
                "Failed to restore refresh interval"
            ),
        }
        result
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let target = self.target.clone();
        let collection = std::mem::take(&mut self.collection);
        let restore_to = std::mem::take(&mut self.restore_to);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = target
                        .put_settings(&collection, &IndexSettings::refresh_only(restore_to))
                        .await
                    {
                        warn!(collection = %collection, error = %e, "Deferred refresh restore failed");
                    }
                });
            }
            Err(_) => warn!(
                collection = %collection,
                "Refresh guard dropped outside a runtime, refresh left disabled"
            ),
        }
    }
}
