// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process store.
//!
//! Behaves like a single-node cluster for everything the engine touches:
//! collections carry settings, mappings and documents; bulk upserts reject
//! documents whose fields contradict the mapping (a `long` field receiving a
//! string), so partial batch failure is observable; samples come back in a
//! different random order on every call.

use super::types::{
    BulkOutcome, ClusterInfo, CollectionInfo, Document, FieldMapping, Fields, IndexSettings,
    Mappings, Schema,
};
use super::{wildcard_match, BoxFuture, PageStream, StoreClient};
use crate::error::ReplicationError;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryCollection {
    settings: IndexSettings,
    mappings: Mappings,
    documents: BTreeMap<String, Fields>,
    created: DateTime<Utc>,
}

impl MemoryCollection {
    fn from_schema(schema: &Schema) -> Self {
        Self {
            settings: schema.settings.clone(),
            mappings: schema.mappings.clone(),
            documents: BTreeMap::new(),
            created: Utc::now(),
        }
    }
}

/// In-memory [`StoreClient`].
pub struct MemoryStore {
    name: String,
    info: ClusterInfo,
    collections: RwLock<BTreeMap<String, MemoryCollection>>,
    reachable: AtomicBool,
    sample_seed: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            info: ClusterInfo {
                version: "8.11.0".to_string(),
                cluster_name: format!("{name}-memory"),
            },
            name,
            collections: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            sample_seed: AtomicU64::new(0),
        }
    }

    /// Simulate the cluster going away (ping false, info fails).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Create (or replace) a collection with the given schema.
    pub async fn insert_collection(&self, name: &str, schema: Schema) {
        self.collections
            .write()
            .await
            .insert(name.to_string(), MemoryCollection::from_schema(&schema));
    }

    /// Write a document directly, bypassing mapping checks. Creates the
    /// collection if needed.
    pub async fn insert_document(&self, collection: &str, id: &str, fields: Fields) {
        let mut guard = self.collections.write().await;
        let coll = guard
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection::from_schema(&Schema::default()));
        coll.documents.insert(id.to_string(), fields);
    }

    pub async fn remove_document(&self, collection: &str, id: &str) -> bool {
        let mut guard = self.collections.write().await;
        guard
            .get_mut(collection)
            .map(|c| c.documents.remove(id).is_some())
            .unwrap_or(false)
    }

    pub async fn remove_collection(&self, name: &str) -> bool {
        self.collections.write().await.remove(name).is_some()
    }

    /// Snapshot of a collection's documents, ordered by id.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let guard = self.collections.read().await;
        guard
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .map(|(id, f)| Document::new(id.clone(), f.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn settings(&self, collection: &str) -> Option<IndexSettings> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.settings.clone())
    }

    pub async fn mappings(&self, collection: &str) -> Option<Mappings> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.mappings.clone())
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.collections.read().await.keys().cloned().collect()
    }

    fn check_reachable(&self, operation: &str) -> crate::error::Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReplicationError::transport_msg(
                operation,
                format!("{} cluster unreachable", self.name),
            ))
        }
    }

    async fn snapshot(&self, name: &str) -> crate::error::Result<Vec<Document>> {
        self.check_reachable("scan")?;
        let guard = self.collections.read().await;
        let coll = guard
            .get(name)
            .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))?;
        Ok(coll
            .documents
            .iter()
            .map(|(id, f)| Document::new(id.clone(), f.clone()))
            .collect())
    }
}

/// Would the cluster reject `value` for a field mapped as `mapping`?
fn incompatible(mapping: &FieldMapping, value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => items.iter().any(|v| incompatible(mapping, v)),
        _ if mapping.is_object() => match value {
            Value::Object(inner) => first_incompatible(&mapping.properties, inner).is_some(),
            _ => true,
        },
        _ => match mapping.field_type.as_deref() {
            Some(
                "long" | "integer" | "short" | "byte" | "double" | "float" | "half_float"
                | "scaled_float" | "unsigned_long",
            ) => !value.is_number(),
            Some("boolean") => !value.is_boolean(),
            Some("date" | "date_nanos") => !(value.is_string() || value.is_number()),
            _ => false,
        },
    }
}

fn first_incompatible<'a>(
    properties: &BTreeMap<String, FieldMapping>,
    fields: &'a Fields,
) -> Option<&'a str> {
    fields.iter().find_map(|(key, value)| {
        properties
            .get(key)
            .filter(|m| incompatible(m, value))
            .map(|_| key.as_str())
    })
}

fn project(fields: &Fields, projection: &[String]) -> Fields {
    if projection.is_empty() {
        return fields.clone();
    }
    projection
        .iter()
        .filter_map(|k| fields.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

impl StoreClient for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { Ok(self.reachable.load(Ordering::SeqCst)) })
    }

    fn info(&self) -> BoxFuture<'_, ClusterInfo> {
        Box::pin(async move {
            self.check_reachable("info")?;
            Ok(self.info.clone())
        })
    }

    fn list_collections(&self, pattern: &str) -> BoxFuture<'_, Vec<CollectionInfo>> {
        let pattern = pattern.to_string();
        Box::pin(async move {
            self.check_reachable("list_collections")?;
            let guard = self.collections.read().await;
            Ok(guard
                .iter()
                .filter(|(name, _)| wildcard_match(&pattern, name))
                .map(|(name, c)| CollectionInfo {
                    name: name.clone(),
                    doc_count: Some(c.documents.len() as u64),
                    creation_time: Some(c.created),
                    size: None,
                })
                .collect())
        })
    }

    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_reachable("collection_exists")?;
            Ok(self.collections.read().await.contains_key(&name))
        })
    }

    fn create_collection(&self, name: &str, schema: &Schema) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let schema = schema.clone();
        Box::pin(async move {
            self.check_reachable("create_collection")?;
            let mut guard = self.collections.write().await;
            if guard.contains_key(&name) {
                return Err(ReplicationError::store(
                    "create_collection",
                    400,
                    format!("resource_already_exists_exception: {name}"),
                ));
            }
            guard.insert(name, MemoryCollection::from_schema(&schema));
            Ok(())
        })
    }

    fn get_schema(&self, name: &str) -> BoxFuture<'_, Mappings> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_reachable("get_schema")?;
            self.mappings(&name)
                .await
                .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))
        })
    }

    fn get_settings(&self, name: &str) -> BoxFuture<'_, IndexSettings> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_reachable("get_settings")?;
            self.settings(&name)
                .await
                .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))
        })
    }

    fn put_settings(&self, name: &str, settings: &IndexSettings) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let update = settings.clone();
        Box::pin(async move {
            self.check_reachable("put_settings")?;
            let mut guard = self.collections.write().await;
            let coll = guard
                .get_mut(&name)
                .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))?;
            if update.number_of_shards.is_some() {
                return Err(ReplicationError::store(
                    "put_settings",
                    400,
                    "final setting [number_of_shards] cannot be updated",
                ));
            }
            if let Some(replicas) = update.number_of_replicas {
                coll.settings.number_of_replicas = Some(replicas);
            }
            if let Some(refresh) = update.refresh_interval {
                coll.settings.refresh_interval = Some(refresh);
            }
            coll.settings.other.extend(update.other);
            Ok(())
        })
    }

    fn count(&self, name: &str) -> BoxFuture<'_, u64> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_reachable("count")?;
            let guard = self.collections.read().await;
            guard
                .get(&name)
                .map(|c| c.documents.len() as u64)
                .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))
        })
    }

    fn scan(&self, name: &str, page_size: usize, _cursor_ttl: &str) -> PageStream<'_> {
        let name = name.to_string();
        let page_size = page_size.max(1);
        stream::once(async move { self.snapshot(&name).await })
            .flat_map(move |snapshot| {
                let pages: Vec<crate::error::Result<Vec<Document>>> = match snapshot {
                    Ok(docs) => docs.chunks(page_size).map(|c| Ok(c.to_vec())).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(pages)
            })
            .boxed()
    }

    fn bulk_upsert(&self, collection: &str, docs: Vec<Document>) -> BoxFuture<'_, BulkOutcome> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.check_reachable("bulk_upsert")?;
            let mut guard = self.collections.write().await;
            let coll = guard
                .entry(collection)
                .or_insert_with(|| MemoryCollection::from_schema(&Schema::default()));

            let mut outcome = BulkOutcome::default();
            for doc in docs {
                if first_incompatible(&coll.mappings.properties, &doc.fields).is_some() {
                    outcome.failed += 1;
                } else {
                    coll.documents.insert(doc.id, doc.fields);
                    outcome.success += 1;
                }
            }
            Ok(outcome)
        })
    }

    fn search_sample(
        &self,
        name: &str,
        size: usize,
        fields: &[&str],
    ) -> BoxFuture<'_, Vec<Document>> {
        let name = name.to_string();
        let projection: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let seed = self.sample_seed.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            self.check_reachable("search_sample")?;
            let guard = self.collections.read().await;
            let coll = guard
                .get(&name)
                .ok_or_else(|| ReplicationError::NotFound(format!("collection {name}")))?;

            let mut scored: Vec<(u64, &String, &Fields)> = coll
                .documents
                .iter()
                .map(|(id, f)| {
                    let mut hasher = DefaultHasher::new();
                    seed.hash(&mut hasher);
                    id.hash(&mut hasher);
                    (hasher.finish(), id, f)
                })
                .collect();
            scored.sort_unstable_by_key(|(score, _, _)| *score);

            Ok(scored
                .into_iter()
                .take(size)
                .map(|(_, id, f)| Document::new(id.clone(), project(f, &projection)))
                .collect())
        })
    }

    fn get_document(&self, collection: &str, id: &str) -> BoxFuture<'_, Option<Fields>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.check_reachable("get_document")?;
            let guard = self.collections.read().await;
            Ok(guard
                .get(&collection)
                .and_then(|c| c.documents.get(&id))
                .cloned())
        })
    }

    fn put_document(&self, collection: &str, id: &str, fields: Fields) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.check_reachable("put_document")?;
            self.insert_document(&collection, &id, fields).await;
            Ok(())
        })
    }
}
