// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fault-injecting store for chaos tests.
//!
//! Wraps a [`MemoryStore`], counts calls per operation, tracks peak bulk
//! concurrency, and fails chosen operations on chosen collections.

use futures::stream::{self, StreamExt};
use index_replicator::store::{
    BoxFuture, BulkOutcome, ClusterInfo, CollectionInfo, Document, Fields, IndexSettings, Mappings,
    MemoryStore, PageStream, Schema, StoreClient,
};
use index_replicator::ReplicationError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation names used for injection and call counting.
pub mod op {
    pub const PING: &str = "ping";
    pub const INFO: &str = "info";
    pub const LIST: &str = "list_collections";
    pub const EXISTS: &str = "collection_exists";
    pub const CREATE: &str = "create_collection";
    pub const GET_SCHEMA: &str = "get_schema";
    pub const GET_SETTINGS: &str = "get_settings";
    pub const PUT_SETTINGS: &str = "put_settings";
    pub const COUNT: &str = "count";
    pub const SCAN: &str = "scan";
    pub const BULK: &str = "bulk_upsert";
    pub const SAMPLE: &str = "search_sample";
    pub const GET_DOC: &str = "get_document";
    pub const PUT_DOC: &str = "put_document";
}

#[derive(Debug, Clone)]
struct Rule {
    op: &'static str,
    collection: Option<String>,
    /// `None` fails forever.
    remaining: Option<usize>,
}

pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    rules: Mutex<Vec<Rule>>,
    /// Collection → pages delivered before the scan errors out.
    scan_cutoffs: Mutex<HashMap<String, usize>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    settings_log: Mutex<Vec<(String, Option<String>)>>,
    bulk_delay: Mutex<Option<Duration>>,
    bulk_inflight: AtomicUsize,
    bulk_peak: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            rules: Mutex::new(Vec::new()),
            scan_cutoffs: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            settings_log: Mutex::new(Vec::new()),
            bulk_delay: Mutex::new(None),
            bulk_inflight: AtomicUsize::new(0),
            bulk_peak: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Fail `op` on every collection, forever.
    pub fn fail_always(&self, op: &'static str) {
        self.push_rule(op, None, None);
    }

    /// Fail `op` on `collection`, forever.
    pub fn fail_on(&self, op: &'static str, collection: &str) {
        self.push_rule(op, Some(collection.to_string()), None);
    }

    /// Fail the next `times` calls of `op` on any collection.
    pub fn fail_times(&self, op: &'static str, times: usize) {
        self.push_rule(op, None, Some(times));
    }

    /// Deliver `pages` scan pages of `collection`, then fail as if it vanished.
    pub fn cut_scan_after(&self, collection: &str, pages: usize) {
        self.scan_cutoffs
            .lock()
            .unwrap()
            .insert(collection.to_string(), pages);
    }

    pub fn set_bulk_delay(&self, delay: Duration) {
        *self.bulk_delay.lock().unwrap() = Some(delay);
    }

    pub fn clear_faults(&self) {
        self.rules.lock().unwrap().clear();
        self.scan_cutoffs.lock().unwrap().clear();
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Highest number of bulk requests observed in flight at once.
    pub fn peak_bulk_concurrency(&self) -> usize {
        self.bulk_peak.load(Ordering::SeqCst)
    }

    /// Every refresh interval written through `put_settings`, in order.
    pub fn refresh_writes(&self, collection: &str) -> Vec<Option<String>> {
        self.settings_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn push_rule(&self, op: &'static str, collection: Option<String>, remaining: Option<usize>) {
        self.rules.lock().unwrap().push(Rule {
            op,
            collection,
            remaining,
        });
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
    }

    /// Record the call and return the injected error, if a rule matches.
    fn check(&self, op: &'static str, collection: Option<&str>) -> Option<ReplicationError> {
        self.record(op);
        let mut rules = self.rules.lock().unwrap();
        let hit = rules.iter_mut().position(|rule| {
            rule.op == op
                && match (&rule.collection, collection) {
                    (None, _) => true,
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                }
                && rule.remaining != Some(0)
        })?;
        if let Some(n) = rules[hit].remaining.as_mut() {
            *n -= 1;
        }
        Some(ReplicationError::transport_msg(op, "injected fault"))
    }
}

fn fail<'a, T: Send + 'a>(e: ReplicationError) -> BoxFuture<'a, T> {
    Box::pin(async move { Err(e) })
}

impl StoreClient for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        match self.check(op::PING, None) {
            Some(_) => Box::pin(async { Ok(false) }),
            None => self.inner.ping(),
        }
    }

    fn info(&self) -> BoxFuture<'_, ClusterInfo> {
        match self.check(op::INFO, None) {
            Some(e) => fail(e),
            None => self.inner.info(),
        }
    }

    fn list_collections(&self, pattern: &str) -> BoxFuture<'_, Vec<CollectionInfo>> {
        match self.check(op::LIST, None) {
            Some(e) => fail(e),
            None => self.inner.list_collections(pattern),
        }
    }

    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool> {
        match self.check(op::EXISTS, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.collection_exists(name),
        }
    }

    fn create_collection(&self, name: &str, schema: &Schema) -> BoxFuture<'_, ()> {
        match self.check(op::CREATE, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.create_collection(name, schema),
        }
    }

    fn get_schema(&self, name: &str) -> BoxFuture<'_, Mappings> {
        match self.check(op::GET_SCHEMA, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.get_schema(name),
        }
    }

    fn get_settings(&self, name: &str) -> BoxFuture<'_, IndexSettings> {
        match self.check(op::GET_SETTINGS, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.get_settings(name),
        }
    }

    fn put_settings(&self, name: &str, settings: &IndexSettings) -> BoxFuture<'_, ()> {
        if let Some(e) = self.check(op::PUT_SETTINGS, Some(name)) {
            return fail(e);
        }
        self.settings_log
            .lock()
            .unwrap()
            .push((name.to_string(), settings.refresh_interval.clone()));
        self.inner.put_settings(name, settings)
    }

    fn count(&self, name: &str) -> BoxFuture<'_, u64> {
        match self.check(op::COUNT, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.count(name),
        }
    }

    fn scan(&self, name: &str, page_size: usize, cursor_ttl: &str) -> PageStream<'_> {
        if let Some(e) = self.check(op::SCAN, Some(name)) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let pages = self.inner.scan(name, page_size, cursor_ttl);
        let cutoff = self.scan_cutoffs.lock().unwrap().get(name).copied();
        match cutoff {
            Some(n) => {
                let vanished = ReplicationError::NotFound(format!("collection {name} (scroll lost)"));
                pages
                    .take(n)
                    .chain(stream::once(async move { Err(vanished) }))
                    .boxed()
            }
            None => pages,
        }
    }

    fn bulk_upsert(&self, collection: &str, docs: Vec<Document>) -> BoxFuture<'_, BulkOutcome> {
        if let Some(e) = self.check(op::BULK, Some(collection)) {
            return fail(e);
        }
        let collection = collection.to_string();
        let delay = *self.bulk_delay.lock().unwrap();
        Box::pin(async move {
            let now = self.bulk_inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.bulk_peak.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let result = self.inner.bulk_upsert(&collection, docs).await;
            self.bulk_inflight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn search_sample(&self, name: &str, size: usize, fields: &[&str]) -> BoxFuture<'_, Vec<Document>> {
        match self.check(op::SAMPLE, Some(name)) {
            Some(e) => fail(e),
            None => self.inner.search_sample(name, size, fields),
        }
    }

    fn get_document(&self, collection: &str, id: &str) -> BoxFuture<'_, Option<Fields>> {
        match self.check(op::GET_DOC, Some(collection)) {
            Some(e) => fail(e),
            None => self.inner.get_document(collection, id),
        }
    }

    fn put_document(&self, collection: &str, id: &str, fields: Fields) -> BoxFuture<'_, ()> {
        match self.check(op::PUT_DOC, Some(collection)) {
            Some(e) => fail(e),
            None => self.inner.put_document(collection, id, fields),
        }
    }
}
