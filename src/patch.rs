// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot-vs-patch decision engine.
//!
//! Given the previously broadcast body and the new body, computes an RFC 6902
//! JSON-patch and decides whether to ship it or fall back to a full snapshot:
//!
//! 1. If either body fails to parse as JSON, the new body ships as a snapshot.
//! 2. If the serialized patch is at least as large as the new body and the
//!    force-patch flag is off, the new body ships as a snapshot.
//! 3. Otherwise the patch ships with `snapshot=false`.
//!
//! The engine is pure: it does no I/O and never touches the pool cache.
//! Callers update the cache to the new body in every case.
//!
//! # Example
//!
//! ```
//! use keycast::patch::compute;
//!
//! let out = compute(br#"{}"#, br#"{"a":1}"#, false);
//! // the snapshot is smaller than [{"op":"add","path":"/a","value":1}]
//! assert!(out.snapshot);
//! assert_eq!(out.body, br#"{"a":1}"#);
//! ```

use serde_json::Value;
use tracing::debug;

/// What to put on the wire for one pool broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Either the new body (snapshot) or the serialized patch array.
    pub body: Vec<u8>,
    /// True when `body` is a full value rather than a delta.
    pub snapshot: bool,
}

impl PatchOutcome {
    fn snapshot_of(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            snapshot: true,
        }
    }
}

/// Compute the frame body for the transition `previous → next`.
#[must_use]
pub fn compute(previous: &[u8], next: &[u8], force_patch: bool) -> PatchOutcome {
    let prev_value: Value = match serde_json::from_slice(previous) {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "previous body is not JSON, sending snapshot");
            return PatchOutcome::snapshot_of(next);
        }
    };
    let next_value: Value = match serde_json::from_slice(next) {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "new body is not JSON, sending snapshot");
            return PatchOutcome::snapshot_of(next);
        }
    };

    let patch = json_patch::diff(&prev_value, &next_value);
    let operations = match serde_json::to_vec(&patch) {
        Ok(ops) => ops,
        Err(err) => {
            debug!(error = %err, "patch serialization failed, sending snapshot");
            return PatchOutcome::snapshot_of(next);
        }
    };

    // don't send the operations if they match or exceed the snapshot size
    if !force_patch && operations.len() >= next.len() {
        return PatchOutcome::snapshot_of(next);
    }

    PatchOutcome {
        body: operations,
        snapshot: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(previous: &[u8], outcome: &PatchOutcome) -> Value {
        let mut doc: Value = serde_json::from_slice(previous).unwrap();
        if outcome.snapshot {
            return serde_json::from_slice(&outcome.body).unwrap();
        }
        let patch: json_patch::Patch = serde_json::from_slice(&outcome.body).unwrap();
        json_patch::patch(&mut doc, &patch).unwrap();
        doc
    }

    #[test]
    fn test_small_change_on_large_body_ships_patch() {
        let previous = serde_json::to_vec(&json!({
            "title": "a reasonably long document body",
            "tags": ["one", "two", "three"],
            "count": 1,
        }))
        .unwrap();
        let next = serde_json::to_vec(&json!({
            "title": "a reasonably long document body",
            "tags": ["one", "two", "three"],
            "count": 2,
        }))
        .unwrap();

        let out = compute(&previous, &next, false);
        assert!(!out.snapshot);
        assert!(out.body.len() < next.len());
        assert_eq!(apply(&previous, &out), serde_json::from_slice::<Value>(&next).unwrap());
    }

    #[test]
    fn test_large_patch_falls_back_to_snapshot() {
        // everything changes, the patch can only be bigger than the body
        let out = compute(br#"{}"#, br#"{"a":1}"#, false);
        assert!(out.snapshot);
        assert_eq!(out.body, br#"{"a":1}"#);
    }

    #[test]
    fn test_force_patch_overrides_economy() {
        let out = compute(br#"{}"#, br#"{"a":1}"#, true);
        assert!(!out.snapshot);
        let ops: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(ops, json!([{"op": "add", "path": "/a", "value": 1}]));
    }

    #[test]
    fn test_non_json_previous_ships_snapshot() {
        let out = compute(b"not json", br#"{"a":1}"#, true);
        assert!(out.snapshot);
        assert_eq!(out.body, br#"{"a":1}"#);
    }

    #[test]
    fn test_non_json_next_ships_snapshot() {
        let out = compute(br#"{}"#, b"garbage", true);
        assert!(out.snapshot);
        assert_eq!(out.body, b"garbage");
    }

    #[test]
    fn test_no_change_yields_empty_patch_or_snapshot() {
        let body = br#"{"a":1}"#;
        let out = compute(body, body, true);
        assert!(!out.snapshot);
        assert_eq!(out.body, b"[]");
        assert_eq!(apply(body, &out), json!({"a": 1}));
    }

    #[test]
    fn test_delete_transition() {
        let previous = br#"{"a":1,"b":2}"#;
        let out = compute(previous, br#"{}"#, false);
        let applied = apply(previous, &out);
        assert_eq!(applied, json!({}));
    }

    #[test]
    fn test_patch_never_strictly_larger_than_snapshot() {
        let cases: Vec<(Value, Value)> = vec![
            (json!({}), json!({"a": 1})),
            (json!({"a": 1}), json!({"a": 2})),
            (json!({"a": [1, 2, 3]}), json!({"a": [1, 2, 3, 4]})),
            (json!(null), json!({"deep": {"nested": {"value": true}}})),
        ];
        for (prev, next) in cases {
            let prev = serde_json::to_vec(&prev).unwrap();
            let next = serde_json::to_vec(&next).unwrap();
            let out = compute(&prev, &next, false);
            if !out.snapshot {
                assert!(out.body.len() < next.len());
            }
        }
    }
}
