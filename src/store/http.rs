// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Elasticsearch-compatible REST client.
//!
//! # Request Flow
//!
//! ```text
//! operation ──► request(host = next in rotation) ──► send
//!                    ▲                                  │
//!                    │   transport error / 429 / 5xx    │
//!                    └──────── backoff, retry ◄─────────┤
//!                                                       ▼
//!                                       2xx / 4xx handed to the caller
//! ```
//!
//! Each retry goes to the next configured host. 4xx answers are never
//! retried; 404 becomes `NotFound` (or `false` / `None` where the operation
//! only checks existence).

use super::types::{
    BulkOutcome, ClusterInfo, CollectionInfo, Document, Fields, IndexSettings, Mappings, Schema,
};
use super::{BoxFuture, PageStream, StoreClient};
use crate::config::ClusterConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::{retry_with_backoff, RetryConfig};
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
enum RequestBody {
    Json(Value),
    Ndjson(String),
}

enum ScrollState {
    Start,
    Continue(ScrollContext),
    Done,
}

/// Open scroll context on the cluster. Dropped while armed, it clears the
/// context from a background task.
struct ScrollContext {
    id: String,
    on_drop: Option<reqwest::RequestBuilder>,
}

impl ScrollContext {
    fn new(store: &HttpStore, id: String) -> Self {
        let on_drop = store
            .request(
                Method::DELETE,
                &["_search", "scroll"],
                &[],
                Some(&RequestBody::Json(clear_scroll_body(&id))),
            )
            .ok();
        Self { id, on_drop }
    }

    /// Follow a scroll id handed back with the next page.
    fn renew(&mut self, store: &HttpStore, id: String) {
        if self.id != id {
            // Same context under a new id; the old id must not clear it.
            self.on_drop = None;
            *self = Self::new(store, id);
        }
    }

    /// Clear the context now. Stays armed until the request completes.
    async fn release(mut self, store: &HttpStore) {
        store.clear_scroll(&self.id).await;
        self.on_drop = None;
    }
}

impl Drop for ScrollContext {
    fn drop(&mut self) {
        let Some(request) = self.on_drop.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!(scroll_id = %id, error = %e, "Failed to clear abandoned scroll context");
            }
        });
    }
}

fn clear_scroll_body(scroll_id: &str) -> Value {
    json!({ "scroll_id": [scroll_id] })
}

/// REST [`StoreClient`] for one cluster.
pub struct HttpStore {
    name: String,
    hosts: Vec<Url>,
    next_host: AtomicUsize,
    client: reqwest::Client,
    username: Option<String>,
    password: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl HttpStore {
    /// Build a client from validated connection settings.
    pub fn new(name: impl Into<String>, config: &ClusterConfig) -> Result<Self> {
        let name = name.into();
        if config.hosts.is_empty() {
            return Err(ReplicationError::Config(format!("{name} hosts must be specified")));
        }

        let hosts = config
            .hosts
            .iter()
            .map(|h| {
                let url = Url::parse(h.trim()).map_err(|e| {
                    ReplicationError::Config(format!("{name} host {h:?} is not a URL: {e}"))
                })?;
                if url.cannot_be_a_base() {
                    return Err(ReplicationError::Config(format!(
                        "{name} host {h:?} cannot be used as a base URL"
                    )));
                }
                Ok(url)
            })
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout_duration())
            .gzip(config.compress)
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| ReplicationError::Config(format!("{name} HTTP client: {e}")))?;

        Ok(Self {
            name,
            hosts,
            next_host: AtomicUsize::new(0),
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            retry: config.retry_config(),
        })
    }

    fn next_host(&self) -> &Url {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[i]
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&RequestBody>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut url = self.next_host().clone();
        url.path_segments_mut()
            .map_err(|_| ReplicationError::Config(format!("{}: host is not a base URL", self.name)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut builder = self.client.request(method, url);
        if let Some(user) = &self.username {
            builder = builder.basic_auth(user, self.password.as_ref());
        }
        builder = match body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Ndjson(lines)) => builder
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(lines.clone()),
            None => builder,
        };
        Ok(builder)
    }

    /// Send with retry. Returns any 2xx/4xx response; 429/5xx and transport
    /// failures are retried and surface as errors once the budget is spent.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<RequestBody>,
    ) -> Result<reqwest::Response> {
        let started = Instant::now();
        let result = retry_with_backoff(&self.retry, operation, |_| {
            let request = self.request(method.clone(), segments, query, body.as_ref());
            async move {
                let response = request?
                    .send()
                    .await
                    .map_err(|e| ReplicationError::transport(operation, e))?;
                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ReplicationError::store(
                        operation,
                        status.as_u16(),
                        truncate(message),
                    ));
                }
                Ok(response)
            }
        })
        .await;

        metrics::record_store_request(&self.name, operation, started.elapsed(), result.is_ok());
        result
    }

    /// Decode a successful response; map 404 to `NotFound(what)`.
    async fn into_json(
        operation: &'static str,
        what: &str,
        response: reqwest::Response,
    ) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ReplicationError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReplicationError::store(operation, status.as_u16(), truncate(message)));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ReplicationError::Decode(format!("{operation}: {e}")))
    }

    async fn expect_success(operation: &'static str, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(ReplicationError::store(operation, status.as_u16(), truncate(message)))
    }

    async fn open_scroll(&self, name: &str, page_size: usize, ttl: &str) -> Result<ScrollPage> {
        let body = json!({
            "size": page_size,
            "sort": ["_doc"],
            "query": {"match_all": {}},
        });
        let response = self
            .send(
                "scan",
                Method::POST,
                &[name, "_search"],
                &[("scroll", ttl)],
                Some(RequestBody::Json(body)),
            )
            .await?;
        let value = Self::into_json("scan", &format!("collection {name}"), response).await?;
        ScrollPage::from_response(&value)
    }

    async fn next_scroll(&self, scroll_id: &str, ttl: &str) -> Result<ScrollPage> {
        let body = json!({ "scroll": ttl, "scroll_id": scroll_id });
        let response = self
            .send(
                "scroll",
                Method::POST,
                &["_search", "scroll"],
                &[],
                Some(RequestBody::Json(body)),
            )
            .await?;
        let value = Self::into_json("scroll", "scroll context", response).await?;
        ScrollPage::from_response(&value)
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let body = clear_scroll_body(scroll_id);
        let result = self
            .send(
                "clear_scroll",
                Method::DELETE,
                &["_search", "scroll"],
                &[],
                Some(RequestBody::Json(body)),
            )
            .await;
        if let Err(e) = result {
            debug!(cluster = %self.name, error = %e, "Failed to clear scroll context");
        }
    }
}

struct ScrollPage {
    scroll_id: Option<String>,
    docs: Vec<Document>,
}

impl ScrollPage {
    fn from_response(value: &Value) -> Result<Self> {
        Ok(Self {
            scroll_id: value
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            docs: parse_hits(value)?,
        })
    }
}

fn truncate(message: String) -> String {
    if message.len() <= MAX_ERROR_BODY {
        return message;
    }
    message.chars().take(MAX_ERROR_BODY).collect()
}

/// `hits.hits[]` → documents. A hit without `_source` has no fields.
fn parse_hits(value: &Value) -> Result<Vec<Document>> {
    let hits = value
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| ReplicationError::Decode("search response without hits.hits".into()))?;

    hits.iter()
        .map(|hit| {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| ReplicationError::Decode("hit without _id".into()))?;
            let fields = hit
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Document::new(id, fields))
        })
        .collect()
}

/// `_cat/indices?format=json` rows. Every value arrives as a string.
fn parse_cat_indices(value: &Value) -> Result<Vec<CollectionInfo>> {
    let rows = value
        .as_array()
        .ok_or_else(|| ReplicationError::Decode("_cat/indices did not return an array".into()))?;

    rows.iter()
        .map(|row| {
            let name = row
                .get("index")
                .and_then(Value::as_str)
                .ok_or_else(|| ReplicationError::Decode("_cat/indices row without index".into()))?;
            let text = |key: &str| row.get(key).and_then(Value::as_str);
            Ok(CollectionInfo {
                name: name.to_string(),
                doc_count: text("docs.count").and_then(|s| s.parse().ok()),
                creation_time: text("creation.date")
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                size: text("store.size").map(str::to_string),
            })
        })
        .collect()
}

/// NDJSON body of `index` actions, one action line + one source line per doc.
fn bulk_body(collection: &str, docs: &[Document]) -> Result<String> {
    let mut body = String::with_capacity(docs.len() * 128);
    for doc in docs {
        let action = json!({ "index": { "_index": collection, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.fields)?);
        body.push('\n');
    }
    Ok(body)
}

/// Per-item outcome of a `_bulk` response.
fn count_bulk_items(value: &Value) -> Result<BulkOutcome> {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ReplicationError::Decode("bulk response without items".into()))?;

    let mut outcome = BulkOutcome::default();
    for item in items {
        let ok = item
            .as_object()
            .and_then(|action| action.values().next())
            .and_then(|result| result.get("status"))
            .and_then(Value::as_u64)
            .map(|status| (200..300).contains(&status))
            .unwrap_or(false);
        if ok {
            outcome.success += 1;
        } else {
            outcome.failed += 1;
        }
    }
    Ok(outcome)
}

fn sample_query(size: usize, fields: &[&str]) -> Value {
    let source = if fields.is_empty() {
        json!(true)
    } else {
        json!(fields)
    };
    json!({
        "size": size,
        "query": {
            "function_score": {
                "functions": [{"random_score": {}}],
                "score_mode": "sum"
            }
        },
        "_source": source,
    })
}

/// First value of a `{collection: {...}}` envelope.
fn unwrap_envelope<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .as_object()
        .and_then(|m| m.values().next())
        .and_then(|inner| inner.get(key))
        .ok_or_else(|| ReplicationError::Decode(format!("response without {key} section")))
}

impl StoreClient for HttpStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.send("ping", Method::HEAD, &[], &[], None).await {
                Ok(response) => Ok(response.status().is_success()),
                Err(e) => {
                    warn!(cluster = %self.name, error = %e, "Ping failed");
                    Ok(false)
                }
            }
        })
    }

    fn info(&self) -> BoxFuture<'_, ClusterInfo> {
        Box::pin(async move {
            let response = self.send("info", Method::GET, &[], &[], None).await?;
            let value = Self::into_json("info", "cluster root", response).await?;
            Ok(ClusterInfo {
                version: value
                    .pointer("/version/number")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                cluster_name: value
                    .get("cluster_name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            })
        })
    }

    fn list_collections(&self, pattern: &str) -> BoxFuture<'_, Vec<CollectionInfo>> {
        let pattern = pattern.to_string();
        Box::pin(async move {
            let response = self
                .send(
                    "list_collections",
                    Method::GET,
                    &["_cat", "indices", pattern.as_str()],
                    &[
                        ("format", "json"),
                        ("h", "index,docs.count,creation.date,store.size"),
                    ],
                    None,
                )
                .await?;
            match Self::into_json("list_collections", &pattern, response).await {
                Ok(value) => parse_cat_indices(&value),
                Err(ReplicationError::NotFound(_)) => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
    }

    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move {
            let response = self
                .send("collection_exists", Method::HEAD, &[name.as_str()], &[], None)
                .await?;
            match response.status() {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                s => Err(ReplicationError::store(
                    "collection_exists",
                    s.as_u16(),
                    format!("unexpected status for {name}"),
                )),
            }
        })
    }

    fn create_collection(&self, name: &str, schema: &Schema) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let body = schema.to_create_body();
        Box::pin(async move {
            let response = self
                .send(
                    "create_collection",
                    Method::PUT,
                    &[name.as_str()],
                    &[],
                    Some(RequestBody::Json(body)),
                )
                .await?;
            Self::expect_success("create_collection", response).await
        })
    }

    fn get_schema(&self, name: &str) -> BoxFuture<'_, Mappings> {
        let name = name.to_string();
        Box::pin(async move {
            let response = self
                .send("get_schema", Method::GET, &[name.as_str(), "_mapping"], &[], None)
                .await?;
            let value =
                Self::into_json("get_schema", &format!("collection {name}"), response).await?;
            let mappings = unwrap_envelope(&value, "mappings")?;
            Ok(serde_json::from_value(mappings.clone())?)
        })
    }

    fn get_settings(&self, name: &str) -> BoxFuture<'_, IndexSettings> {
        let name = name.to_string();
        Box::pin(async move {
            let response = self
                .send("get_settings", Method::GET, &[name.as_str(), "_settings"], &[], None)
                .await?;
            let value =
                Self::into_json("get_settings", &format!("collection {name}"), response).await?;
            let settings = unwrap_envelope(&value, "settings")?;
            let index = settings.get("index").cloned().unwrap_or_else(|| json!({}));
            Ok(serde_json::from_value(index)?)
        })
    }

    fn put_settings(&self, name: &str, settings: &IndexSettings) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let body = settings.to_body();
        Box::pin(async move {
            let response = self
                .send(
                    "put_settings",
                    Method::PUT,
                    &[name.as_str(), "_settings"],
                    &[],
                    Some(RequestBody::Json(body)),
                )
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(ReplicationError::NotFound(format!("collection {name}")));
            }
            Self::expect_success("put_settings", response).await
        })
    }

    fn count(&self, name: &str) -> BoxFuture<'_, u64> {
        let name = name.to_string();
        Box::pin(async move {
            let response = self
                .send("count", Method::GET, &[name.as_str(), "_count"], &[], None)
                .await?;
            let value = Self::into_json("count", &format!("collection {name}"), response).await?;
            value
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| ReplicationError::Decode("count response without count".into()))
        })
    }

    fn scan(&self, name: &str, page_size: usize, cursor_ttl: &str) -> PageStream<'_> {
        let name = name.to_string();
        let ttl = cursor_ttl.to_string();
        stream::unfold(ScrollState::Start, move |state| {
            let name = name.clone();
            let ttl = ttl.clone();
            async move {
                let (page, open) = match state {
                    ScrollState::Done => return None,
                    ScrollState::Start => (self.open_scroll(&name, page_size, &ttl).await, None),
                    ScrollState::Continue(ctx) => (self.next_scroll(&ctx.id, &ttl).await, Some(ctx)),
                };
                match page {
                    Ok(ScrollPage {
                        scroll_id: Some(id),
                        docs,
                    }) => {
                        let ctx = match open {
                            Some(mut ctx) => {
                                ctx.renew(self, id);
                                ctx
                            }
                            None => ScrollContext::new(self, id),
                        };
                        if docs.is_empty() {
                            ctx.release(self).await;
                            return None;
                        }
                        Some((Ok(docs), ScrollState::Continue(ctx)))
                    }
                    Ok(ScrollPage {
                        scroll_id: None,
                        docs,
                    }) => {
                        if let Some(ctx) = open {
                            ctx.release(self).await;
                        }
                        if docs.is_empty() {
                            return None;
                        }
                        Some((Ok(docs), ScrollState::Done))
                    }
                    Err(e) => {
                        if let Some(ctx) = open {
                            ctx.release(self).await;
                        }
                        Some((Err(e), ScrollState::Done))
                    }
                }
            }
        })
        .boxed()
    }

    fn bulk_upsert(&self, collection: &str, docs: Vec<Document>) -> BoxFuture<'_, BulkOutcome> {
        let collection = collection.to_string();
        Box::pin(async move {
            if docs.is_empty() {
                return Ok(BulkOutcome::default());
            }
            let body = bulk_body(&collection, &docs)?;
            let response = self
                .send(
                    "bulk_upsert",
                    Method::POST,
                    &["_bulk"],
                    &[],
                    Some(RequestBody::Ndjson(body)),
                )
                .await?;
            let value = Self::into_json("bulk_upsert", &collection, response).await?;
            count_bulk_items(&value)
        })
    }

    fn search_sample(
        &self,
        name: &str,
        size: usize,
        fields: &[&str],
    ) -> BoxFuture<'_, Vec<Document>> {
        let name = name.to_string();
        let body = sample_query(size, fields);
        Box::pin(async move {
            let response = self
                .send(
                    "search_sample",
                    Method::POST,
                    &[name.as_str(), "_search"],
                    &[],
                    Some(RequestBody::Json(body)),
                )
                .await?;
            let value =
                Self::into_json("search_sample", &format!("collection {name}"), response).await?;
            parse_hits(&value)
        })
    }

    fn get_document(&self, collection: &str, id: &str) -> BoxFuture<'_, Option<Fields>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let response = self
                .send("get_document", Method::GET, &[collection.as_str(), "_doc", id.as_str()], &[], None)
                .await?;
            let value = match Self::into_json("get_document", &id, response).await {
                Ok(value) => value,
                Err(ReplicationError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            if value.get("found").and_then(Value::as_bool) == Some(false) {
                return Ok(None);
            }
            Ok(value.get("_source").and_then(Value::as_object).cloned())
        })
    }

    fn put_document(&self, collection: &str, id: &str, fields: Fields) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let response = self
                .send(
                    "put_document",
                    Method::PUT,
                    &[collection.as_str(), "_doc", id.as_str()],
                    &[],
                    Some(RequestBody::Json(Value::Object(fields))),
                )
                .await?;
            Self::expect_success("put_document", response).await
        })
    }
}
