//! Fuzz target for document fingerprinting.
//!
//! Any JSON object must hash without panicking, and the fingerprint must
//! not depend on the fingerprint field already being present.

#![no_main]

use index_replicator::hasher::{canonical_json, fingerprint, fingerprint_without};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let fp = fingerprint(&fields);
    assert_eq!(fp.len(), 64);
    assert_eq!(fp, fingerprint(&fields.clone()));

    // Canonical form parses back to the same content.
    let reparsed: Value = serde_json::from_str(&canonical_json(&fields)).unwrap();
    assert_eq!(reparsed, Value::Object(fields.clone()));

    let mut tagged = fields.clone();
    tagged.insert("_doc_hash".into(), Value::String(fp));
    let mut untagged = fields;
    untagged.remove("_doc_hash");
    assert_eq!(fingerprint_without(&tagged, "_doc_hash"), fingerprint(&untagged));
});
