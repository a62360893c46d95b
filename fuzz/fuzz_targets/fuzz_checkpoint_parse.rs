//! Fuzz target for checkpoint timestamp parsing.
//!
//! Whatever is stored in the checkpoint document, parsing must not panic,
//! and anything that parses must survive a write and re-read.

#![no_main]

use index_replicator::checkpoint::{format_timestamp, parse_timestamp};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|raw: &str| {
    if let Some(at) = parse_timestamp(raw) {
        let stored = format_timestamp(at);
        let reread = parse_timestamp(&stored).expect("formatted checkpoint must parse");
        // Storage keeps microseconds.
        assert_eq!(reread.timestamp(), at.timestamp());
        assert_eq!(reread.timestamp_subsec_micros(), at.timestamp_subsec_micros());
    }
});
