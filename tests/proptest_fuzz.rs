//! Property-based tests (fuzzing) for the stream fabric.
//!
//! Uses proptest to generate random keys, patterns, and JSON bodies and
//! verify the core algebra never panics and holds its contracts.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::Value;

use keycast::key;
use keycast::message::ClientEvent;
use keycast::patch::compute;

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate a valid literal key like "room/a1/x"
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,5}(/[a-z0-9]{1,5}){0,3}"
}

/// Generate a valid pattern: like a key, but segments may be `*`
fn pattern_strategy() -> impl Strategy<Value = String> {
    "([a-z0-9]{1,5}|\\*)(/([a-z0-9]{1,5}|\\*)){0,3}"
}

/// Generate arbitrary JSON values, nesting included
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Reference matcher: segment-wise walk, `*` matches one segment
fn model_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let key: Vec<&str> = key.split('/').collect();
    pattern.len() == key.len()
        && pattern
            .iter()
            .zip(&key)
            .all(|(p, k)| !k.is_empty() && (*p == "*" || p == k))
}

// =============================================================================
// Key algebra
// =============================================================================

proptest! {
    #[test]
    fn prop_match_agrees_with_model(pattern in pattern_strategy(), key in key_strategy()) {
        prop_assert_eq!(key::matches(&pattern, &key), model_match(&pattern, &key));
    }

    #[test]
    fn prop_pattern_matches_itself_when_literal(key in key_strategy()) {
        prop_assert!(key::valid(&key));
        prop_assert!(key::matches(&key, &key));
    }

    #[test]
    fn prop_glob_never_crosses_segments(key in key_strategy()) {
        let segments = key.split('/').count();
        if segments > 1 {
            // a single glob can never swallow a multi-segment key
            prop_assert!(!key::matches("*", &key));
        }
    }

    #[test]
    fn prop_parent_drops_exactly_one_segment(key in key_strategy()) {
        let parent = key::parent(&key);
        let segments = key.split('/').count();
        if segments == 1 {
            prop_assert_eq!(parent, "");
        } else {
            prop_assert_eq!(parent.split('/').count(), segments - 1);
            let prefix = format!("{}/", parent);
            prop_assert!(key.starts_with(&prefix));
        }
    }

    #[test]
    fn prop_valid_never_panics_on_garbage(raw in ".{0,40}") {
        let _ = key::valid(&raw);
        let _ = key::pattern_valid(&raw);
        let _ = key::route_valid(&raw);
    }
}

// =============================================================================
// Patch engine
// =============================================================================

proptest! {
    /// Applying the delivered frame onto the previous body always yields
    /// the new body, patch or snapshot.
    #[test]
    fn prop_patch_applies_cleanly(prev in json_strategy(), next in json_strategy()) {
        let prev_bytes = serde_json::to_vec(&prev).unwrap();
        let next_bytes = serde_json::to_vec(&next).unwrap();
        let outcome = compute(&prev_bytes, &next_bytes, false);

        let reconstructed = if outcome.snapshot {
            serde_json::from_slice::<Value>(&outcome.body).unwrap()
        } else {
            let patch: json_patch::Patch = serde_json::from_slice(&outcome.body).unwrap();
            let mut doc = prev.clone();
            json_patch::patch(&mut doc, &patch).unwrap();
            doc
        };
        prop_assert_eq!(reconstructed, next);
    }

    /// Without the force flag a patch is never at least as large as the
    /// snapshot it replaces.
    #[test]
    fn prop_snapshot_economy(prev in json_strategy(), next in json_strategy()) {
        let prev_bytes = serde_json::to_vec(&prev).unwrap();
        let next_bytes = serde_json::to_vec(&next).unwrap();
        let outcome = compute(&prev_bytes, &next_bytes, false);
        if !outcome.snapshot {
            prop_assert!(outcome.body.len() < next_bytes.len());
        }
    }

    /// Garbage previous bodies degrade to snapshots, never panics.
    #[test]
    fn prop_non_json_previous_degrades_to_snapshot(
        prev in prop::collection::vec(any::<u8>(), 0..64),
        next in json_strategy(),
    ) {
        let next_bytes = serde_json::to_vec(&next).unwrap();
        let outcome = compute(&prev, &next_bytes, false);
        if serde_json::from_slice::<Value>(&prev).is_err() {
            prop_assert!(outcome.snapshot);
            prop_assert_eq!(outcome.body, next_bytes);
        }
    }
}

// =============================================================================
// Inbound codec
// =============================================================================

proptest! {
    /// Arbitrary inbound bytes decode or error, never panic, and the
    /// decoded shape round-trips the documented fields.
    #[test]
    fn prop_client_event_decode_total(raw in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = ClientEvent::decode(&raw);
    }

    #[test]
    fn prop_client_event_fields(op in "[a-z]{0,5}", index in "[a-z0-9]{0,5}") {
        let raw = serde_json::json!({"op": op, "index": index});
        let event = ClientEvent::decode(&serde_json::to_vec(&raw).unwrap()).unwrap();
        prop_assert_eq!(event.is_del(), op == "del");
        prop_assert_eq!(event.index.as_deref(), Some(index.as_str()));
    }
}
