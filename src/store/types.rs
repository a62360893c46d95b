// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed payloads exchanged with a store.
//!
//! Settings and mappings keep the handful of fields the engine reasons about
//! as typed members and carry everything else through untouched in a
//! flattened `other` map, so a schema round-trips without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A document's field map (its "source").
pub type Fields = Map<String, Value>;

/// One document: opaque id plus fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Answer to the startup `info()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub version: String,
    pub cluster_name: String,
}

/// One entry of `list_collections()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: Option<u64>,
    pub creation_time: Option<DateTime<Utc>>,
    /// Human-readable store size as reported by the cluster ("1.2gb").
    pub size: Option<String>,
}

impl CollectionInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc_count: None,
            creation_time: None,
            size: None,
        }
    }
}

/// Per-document outcome counts of one bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub success: u64,
    pub failed: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Collection-level settings (the `index` section of a cluster's settings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_u32"
    )]
    pub number_of_shards: Option<u32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_u32"
    )]
    pub number_of_replicas: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,

    /// Everything else, passed through verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl IndexSettings {
    /// Partial settings update touching only the refresh interval.
    pub fn refresh_only(interval: impl Into<String>) -> Self {
        Self {
            refresh_interval: Some(interval.into()),
            ..Default::default()
        }
    }

    /// Request body shape: `{"index": {...}}`.
    pub fn to_body(&self) -> Value {
        json!({ "index": self })
    }
}

// Clusters report numeric settings as strings ("1"); accept both.
fn de_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Num(u32),
        Str(String),
    }

    match Option::<StrOrNum>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StrOrNum::Num(n)) => Ok(Some(n)),
        Some(StrOrNum::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mappings
// ═══════════════════════════════════════════════════════════════════════════════

/// Field definitions of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    #[serde(default)]
    pub properties: BTreeMap<String, FieldMapping>,

    /// `dynamic`, `_source`, `_meta`, ...
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// One field definition. Object fields have `properties` and no `type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, FieldMapping>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl FieldMapping {
    pub fn of_type(field_type: impl Into<String>) -> Self {
        Self {
            field_type: Some(field_type.into()),
            ..Default::default()
        }
    }

    /// A stored-only keyword: not indexed, no doc values.
    pub fn stored_keyword() -> Self {
        let mut other = Map::new();
        other.insert("doc_values".into(), Value::Bool(false));
        other.insert("index".into(), Value::Bool(false));
        Self {
            field_type: Some("keyword".into()),
            properties: BTreeMap::new(),
            other,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self.field_type.as_deref(), Some("date" | "date_nanos"))
    }

    pub fn is_object(&self) -> bool {
        !self.properties.is_empty()
            && matches!(self.field_type.as_deref(), None | Some("object" | "nested"))
    }
}

/// Settings plus mappings: everything needed to create a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub settings: IndexSettings,
    #[serde(default)]
    pub mappings: Mappings,
}

impl Schema {
    /// Collection-creation request body.
    pub fn to_create_body(&self) -> Value {
        json!({
            "settings": self.settings.to_body(),
            "mappings": self.mappings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_accepts_string_numbers() {
        let settings: IndexSettings = serde_json::from_value(json!({
            "number_of_shards": "3",
            "number_of_replicas": 1,
            "refresh_interval": "30s",
            "uuid": "abc",
            "version": {"created": "8110099"}
        }))
        .unwrap();

        assert_eq!(settings.number_of_shards, Some(3));
        assert_eq!(settings.number_of_replicas, Some(1));
        assert_eq!(settings.refresh_interval.as_deref(), Some("30s"));
        assert_eq!(settings.other["uuid"], json!("abc"));
        assert!(settings.other.contains_key("version"));
    }

    #[test]
    fn test_settings_rejects_non_numeric_shards() {
        let result: Result<IndexSettings, _> =
            serde_json::from_value(json!({"number_of_shards": "many"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_refresh_only_body() {
        let body = IndexSettings::refresh_only("-1").to_body();
        assert_eq!(body, json!({"index": {"refresh_interval": "-1"}}));
    }

    #[test]
    fn test_mappings_roundtrip_keeps_unknown_keys() {
        let raw = json!({
            "dynamic": "strict",
            "properties": {
                "title": {"type": "text", "analyzer": "english"},
                "meta": {"properties": {"created": {"type": "date"}}}
            }
        });
        let mappings: Mappings = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(mappings.other["dynamic"], json!("strict"));
        assert!(mappings.properties["meta"].is_object());
        assert!(mappings.properties["meta"].properties["created"].is_date());
        assert_eq!(serde_json::to_value(&mappings).unwrap(), raw);
    }

    #[test]
    fn test_stored_keyword_shape() {
        let value = serde_json::to_value(FieldMapping::stored_keyword()).unwrap();
        assert_eq!(value, json!({"type": "keyword", "doc_values": false, "index": false}));
    }

    #[test]
    fn test_create_body_shape() {
        let mut schema = Schema::default();
        schema.settings.number_of_shards = Some(1);
        schema
            .mappings
            .properties
            .insert("n".into(), FieldMapping::of_type("long"));

        let body = schema.to_create_body();
        assert_eq!(body["settings"]["index"]["number_of_shards"], json!(1));
        assert_eq!(body["mappings"]["properties"]["n"]["type"], json!("long"));
    }
}
