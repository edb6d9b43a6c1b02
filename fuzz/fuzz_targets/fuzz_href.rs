//! Fuzz target for href and manifest URL parsing.
//!
//! Neither helper may panic, and the manifest name is always a suffix
//! without separators.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_engine::model::{entity_href, parse_href_id};
use replica_engine::replicator::file::manifest_name;

fuzz_target!(|data: &str| {
    if let Some(id) = parse_href_id(data) {
        // Anything that parses round-trips through a canonical href
        assert_eq!(parse_href_id(&entity_href("remotes", "file", id)), Some(id));
    }

    let manifest = manifest_name(data);
    assert!(data.ends_with(manifest));
    assert!(!manifest.contains('/'));
});
