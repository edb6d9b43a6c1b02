//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;
use replica_engine::config::TrackerConfig;
use replica_engine::model::{
    drifted_fields, entity_href, merge_fields, parse_href_id, ContentSource, Fields, UpstreamDistribution,
};
use replica_engine::replicator::file::manifest_name;
use serde_json::{json, Value};
use uuid::Uuid;

fn field_map() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map("[a-z]{1,6}", prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9_.]{0,12}".prop_map(Value::String),
        Just(Value::Null),
    ], 0..8)
    .prop_map(|map| map.into_iter().collect())
}

// =============================================================================
// Field Drift Properties
// =============================================================================

proptest! {
    /// Merging the drift makes every tracked field match the desired value
    #[test]
    fn merge_of_drift_converges(current in field_map(), desired in field_map()) {
        let mut merged = current.clone();
        merge_fields(&mut merged, &drifted_fields(&current, &desired));

        for (key, value) in &desired {
            prop_assert_eq!(merged.get(key), Some(value));
        }
        prop_assert!(drifted_fields(&merged, &desired).is_empty());
    }

    /// Untracked fields survive a merge
    #[test]
    fn merge_preserves_untracked(current in field_map(), desired in field_map()) {
        let mut merged = current.clone();
        merge_fields(&mut merged, &drifted_fields(&current, &desired));

        for (key, value) in &current {
            if !desired.contains_key(key) {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
    }

    /// Drift only ever names desired keys
    #[test]
    fn drift_is_subset_of_desired(current in field_map(), desired in field_map()) {
        let drift = drifted_fields(&current, &desired);
        for key in drift.keys() {
            prop_assert!(desired.contains_key(key));
        }
        prop_assert!(drift.len() <= desired.len());
    }

    /// No drift against oneself
    #[test]
    fn no_self_drift(fields in field_map()) {
        prop_assert!(drifted_fields(&fields, &fields).is_empty());
    }
}

// =============================================================================
// Href Properties
// =============================================================================

proptest! {
    /// The id of any generated href parses back
    #[test]
    fn href_id_recoverable(
        collection in "(remotes|repositories|distributions)",
        backend in "[a-z]{1,8}",
        bytes in any::<[u8; 16]>(),
    ) {
        let id = Uuid::from_bytes(bytes);
        let href = entity_href(&collection, &backend, id);
        prop_assert!(href.starts_with("/pulp/api/v3/"));
        prop_assert!(href.ends_with('/'));
        prop_assert_eq!(parse_href_id(&href), Some(id));
    }

    /// Parsing arbitrary text never panics
    #[test]
    fn href_parse_never_panics(href in "[a-z0-9/_-]{0,40}") {
        let _ = parse_href_id(&href);
    }
}

// =============================================================================
// Manifest Name Properties
// =============================================================================

proptest! {
    /// The manifest name is the suffix after the last slash
    #[test]
    fn manifest_name_is_last_segment(
        prefix in "(https?://[a-z]{1,10}(/[a-z0-9]{1,6}){0,3}/)?",
        name in "[A-Za-z0-9_.-]{0,16}",
    ) {
        let url = format!("{}{}", prefix, name);
        let manifest = manifest_name(&url);
        prop_assert!(!manifest.contains('/'));
        prop_assert!(url.ends_with(manifest));
        prop_assert_eq!(manifest, name.as_str());
    }
}

// =============================================================================
// Content Source Properties
// =============================================================================

proptest! {
    /// A repository reference always wins over a publication
    #[test]
    fn repository_wins(
        repository in prop::option::of("/[a-z]{1,8}/"),
        publication in prop::option::of("/[a-z]{1,8}/"),
    ) {
        let record = UpstreamDistribution {
            name: "x".to_string(),
            base_url: "http://u/".to_string(),
            base_path: "x".to_string(),
            repository: repository.clone(),
            publication: publication.clone(),
            pulp_href: None,
        };

        let expected = match (repository.as_deref(), publication.as_deref()) {
            (Some(r), _) => ContentSource::Repository(r),
            (None, Some(p)) => ContentSource::Publication(p),
            (None, None) => ContentSource::None,
        };
        prop_assert_eq!(record.content_source(), expected);
        prop_assert_eq!(record.serves_content(), repository.is_some() || publication.is_some());
    }
}

// =============================================================================
// Poll Backoff Properties
// =============================================================================

proptest! {
    /// Delay never decreases with idle cycles and never exceeds the ceiling
    #[test]
    fn poll_delay_monotonic_and_capped(
        base_ms in 1u64..1000,
        max_ms in 1u64..60_000,
        factor in 1.5f64..4.0,
        cycles in 0u32..100,
    ) {
        let config = TrackerConfig {
            poll_interval: format!("{}ms", base_ms),
            max_poll_interval: format!("{}ms", max_ms),
            backoff_factor: factor,
            max_consecutive_errors: 3,
        };
        let max = config.max_poll_interval_duration();

        let now = config.delay_for_idle_cycles(cycles);
        let next = config.delay_for_idle_cycles(cycles + 1);
        prop_assert!(now <= next);
        prop_assert!(next <= max);
    }

    /// Zero idle cycles means the base interval (capped)
    #[test]
    fn poll_delay_resets(base_ms in 1u64..1000, max_ms in 1u64..60_000) {
        let config = TrackerConfig {
            poll_interval: format!("{}ms", base_ms),
            max_poll_interval: format!("{}ms", max_ms),
            ..TrackerConfig::default()
        };
        prop_assert_eq!(
            config.delay_for_idle_cycles(0),
            config.poll_interval_duration().min(config.max_poll_interval_duration())
        );
    }
}
