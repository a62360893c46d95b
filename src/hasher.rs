// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content fingerprints for documents.
//!
//! A fingerprint is the SHA-256 of a canonical JSON rendering of the
//! document's fields: object keys are sorted at every depth, array order is
//! kept, and no whitespace is emitted. Two field maps with the same keys and
//! values therefore hash identically whatever order they were built in.
//!
//! The fingerprint is computed over the *original* fields, before the
//! fingerprint field itself is attached (see [`crate::loader::Loader::tag`]).

use crate::store::Fields;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 fingerprint of a document's fields.
pub fn fingerprint(fields: &Fields) -> String {
    let mut canonical = String::with_capacity(256);
    write_object(&mut canonical, fields);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Fingerprint `fields` as if `exclude` were not present.
///
/// Used when a document read back from a cluster already carries its
/// fingerprint field.
pub fn fingerprint_without(fields: &Fields, exclude: &str) -> String {
    if !fields.contains_key(exclude) {
        return fingerprint(fields);
    }
    let mut stripped = fields.clone();
    stripped.remove(exclude);
    fingerprint(&stripped)
}

/// Canonical JSON rendering used for hashing.
pub fn canonical_json(fields: &Fields) -> String {
    let mut out = String::new();
    write_object(&mut out, fields);
    out
}

fn write_object(out: &mut String, fields: &Fields) {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort_unstable();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        if let Some(value) = fields.get(key) {
            write_value(out, value);
        }
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::String(s) => write_string(out, s),
        // Null, Bool and Number have a single serde_json rendering.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    // Serializing a &str cannot fail.
    out.push_str(&Value::String(s.to_owned()).to_string());
}
