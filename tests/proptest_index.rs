//! Property-based tests for key indexing and value rendering.

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kvscope::index::{IndexOptions, PrefixRule, ProgressReporter, ScanLimits, build_index};
use kvscope::{InspectLimits, MemoryEngine, ValueDescriptor, ValueType, display_key, parse_display_key};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

/// Keys drawn from a small alphabet so groups and separators show up often.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-c]{1,3}(/[a-z0-9]{0,4}){0,2}".prop_map(String::into_bytes),
        prop::collection::vec(any::<u8>(), 1..8),
    ]
}

fn index_of(keys: &BTreeSet<Vec<u8>>, options: &IndexOptions) -> kvscope::KeyIndex {
    let engine = MemoryEngine::with_entries(keys.iter().map(|k| (k.clone(), b"v".to_vec())));
    build_index(
        &engine,
        "prop",
        options,
        &ProgressReporter::detached(options.progress_stride),
        &CancellationToken::new(),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn display_key_roundtrip(raw in prop::collection::vec(any::<u8>(), 0..32)) {
        prop_assert_eq!(parse_display_key(&display_key(&raw)), raw);
    }

    #[test]
    fn index_covers_every_key_once(keys in prop::collection::btree_set(key_strategy(), 0..64)) {
        let options = IndexOptions::default();
        let index = index_of(&keys, &options);

        let expected: BTreeSet<String> = keys.iter().map(|k| display_key(k)).collect();
        let indexed: Vec<&str> = index.keys().collect();
        let unique: BTreeSet<String> = indexed.iter().map(|k| k.to_string()).collect();

        prop_assert_eq!(indexed.len(), unique.len());
        prop_assert_eq!(unique, expected);
        prop_assert_eq!(index.total_keys, keys.len() as u64);
        prop_assert!(index.is_complete());

        let rule = PrefixRule::new('/');
        for (prefix, members) in &index.groups {
            prop_assert!(!members.is_empty());
            for key in members {
                prop_assert_eq!(rule.group_of(key), prefix.as_str());
            }
        }
    }

    #[test]
    fn index_is_deterministic(keys in prop::collection::btree_set(key_strategy(), 0..48)) {
        let options = IndexOptions::default();
        prop_assert_eq!(index_of(&keys, &options), index_of(&keys, &options));
    }

    #[test]
    fn scan_limits_bound_the_index(
        keys in prop::collection::btree_set(key_strategy(), 0..64),
        max_total in 1u64..40,
        max_per_prefix in 1usize..10,
    ) {
        let options = IndexOptions {
            limits: ScanLimits {
                max_total_keys: Some(max_total),
                max_keys_per_prefix: Some(max_per_prefix),
            },
            ..IndexOptions::default()
        };
        let index = index_of(&keys, &options);

        prop_assert!(index.total_keys <= max_total);
        prop_assert!(index.groups.values().all(|g| g.len() <= max_per_prefix));
        let skipped = index.truncation.as_ref().map_or(0, |t| t.keys_skipped);
        prop_assert_eq!(index.indexed_keys() as u64 + skipped, index.total_keys);
    }

    #[test]
    fn small_values_render_losslessly(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let d = ValueDescriptor::from_bytes("k", &bytes, &InspectLimits::default());

        prop_assert!(!d.truncated);
        prop_assert_eq!(d.size_bytes, bytes.len() as u64);
        prop_assert_eq!(hex::decode(&d.rendering.hex_form).unwrap(), bytes.clone());
        prop_assert_eq!(BASE64.decode(&d.rendering.base64_form).unwrap(), bytes);
    }

    #[test]
    fn truncated_window_is_a_bounded_prefix(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let limits = InspectLimits { truncate_above: 64, preview_bytes: 16 };
        let d = ValueDescriptor::from_bytes("k", &bytes, &limits);

        prop_assert_eq!(d.truncated, bytes.len() > 64);
        let window = hex::decode(&d.rendering.hex_form).unwrap();
        prop_assert!(bytes.starts_with(&window));
        if d.truncated {
            prop_assert!(window.len() <= 16 && window.len() >= 13);
            prop_assert!(d.truncation_note.is_some());
        } else {
            prop_assert_eq!(window.len(), bytes.len());
        }
        prop_assert_eq!(d.window_bytes, window.len() as u64);
    }

    #[test]
    fn json_string_form_reparses(
        map in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..8),
    ) {
        let compact = serde_json::to_vec(&map).unwrap();
        let d = ValueDescriptor::from_bytes("k", &compact, &InspectLimits::default());

        prop_assert_eq!(d.value_type, ValueType::Json);
        let original: serde_json::Value = serde_json::from_slice(&compact).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&d.rendering.string_form).unwrap();
        prop_assert_eq!(reparsed, original);
    }
}
