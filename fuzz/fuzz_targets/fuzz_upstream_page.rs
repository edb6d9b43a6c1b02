//! Fuzz target for upstream listing payloads.
//!
//! Arbitrary bytes must either fail to decode or yield records whose
//! content classification is consistent.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_engine::model::{ContentSource, UpstreamDistribution};
use replica_engine::upstream::Page;

fuzz_target!(|data: &[u8]| {
    let Ok(page) = serde_json::from_slice::<Page<UpstreamDistribution>>(data) else {
        return;
    };

    for record in &page.results {
        match record.content_source() {
            ContentSource::Repository(href) => assert_eq!(record.repository.as_deref(), Some(href)),
            ContentSource::Publication(href) => assert_eq!(record.publication.as_deref(), Some(href)),
            ContentSource::None => assert!(!record.serves_content()),
        }
    }
});
