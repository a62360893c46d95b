//! Fuzz target for settings cleaning.
//!
//! Arbitrary settings bodies must never panic, and no cluster-generated key
//! may survive cleaning.

#![no_main]

use index_replicator::schema::{clean_settings, NON_PORTABLE_SETTINGS};
use index_replicator::store::IndexSettings;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(settings) = serde_json::from_slice::<IndexSettings>(data) else {
        return;
    };

    let cleaned = clean_settings(&settings);
    for key in cleaned.other.keys() {
        for np in NON_PORTABLE_SETTINGS {
            assert!(key.as_str() != *np, "{key} survived");
            assert!(!key.starts_with(&format!("{np}.")), "{key} survived");
        }
    }
    assert_eq!(cleaned.refresh_interval, settings.refresh_interval);

    // Idempotent.
    assert_eq!(clean_settings(&cleaned).other, cleaned.other);
});
