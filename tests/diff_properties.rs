//! Property-based tests for the snapshot diff.
//!
//! Applying `diff(prev, cur)` onto `prev` must reproduce `cur` for arbitrary
//! snapshot pairs, and diffing a snapshot against itself must yield nothing.
//! Keys are drawn from an alphabet that includes the path separators, so
//! mappings whose keys cannot be addressed by a path are covered too.

use indexmap::IndexMap;
use proptest::prelude::*;
use serde_json::json;
use spark_bridge::{PlainValue, diff, diff_bindings};

// =============================================================================
// Strategies
// =============================================================================

fn leaf() -> impl Strategy<Value = PlainValue> {
    prop_oneof![
        Just(PlainValue::Null),
        any::<bool>().prop_map(PlainValue::Bool),
        (-3i32..3).prop_map(|n| PlainValue::Number(f64::from(n))),
        "[xy]{0,2}".prop_map(PlainValue::String),
    ]
}

fn value() -> impl Strategy<Value = PlainValue> {
    leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(PlainValue::Array),
            prop::collection::vec(
                (key(), prop_oneof![3 => inner, 1 => Just(PlainValue::Undefined)]),
                0..4
            )
            .prop_map(|entries| PlainValue::Object(entries.into_iter().collect())),
        ]
    })
}

/// Mapping keys, including empty ones and ones holding `.`, `[` or `]`.
fn key() -> impl Strategy<Value = String> {
    "[a-d.\\[\\]]{0,2}"
}

/// Snapshots are always mappings at the root.
fn snapshot() -> impl Strategy<Value = PlainValue> {
    prop::collection::vec((key(), value()), 0..4)
        .prop_map(|entries| PlainValue::Object(entries.into_iter().collect()))
}

/// Binding snapshots: top-level names are plain identifiers.
fn bindings() -> impl Strategy<Value = PlainValue> {
    prop::collection::vec(("[a-d]", value()), 0..4)
        .prop_map(|entries| PlainValue::Object(entries.into_iter().collect()))
}

fn apply(prev: &PlainValue, cur: &PlainValue) -> PlainValue {
    let mut target = prev.clone();
    diff(prev, cur).apply_to(&mut target).unwrap();
    target
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_diff_round_trip(prev in snapshot(), cur in snapshot()) {
        prop_assert_eq!(apply(&prev, &cur), cur);
    }

    #[test]
    fn prop_diff_of_equal_snapshots_is_empty(cur in snapshot()) {
        prop_assert!(diff(&cur, &cur).is_empty());
    }

    #[test]
    fn prop_removed_key_escalates_to_root(cur in snapshot(), extra in value()) {
        let PlainValue::Object(map) = &cur else { unreachable!() };
        let mut prev: IndexMap<String, PlainValue> = map.clone();
        prev.insert("removed".to_string(), extra);
        let patch = diff(&PlainValue::Object(prev), &cur);
        prop_assert_eq!(patch.len(), 1);
        prop_assert_eq!(patch.get(""), Some(&cur));
    }

    #[test]
    fn prop_patch_paths_parse(prev in snapshot(), cur in snapshot()) {
        for path in diff(&prev, &cur).paths() {
            prop_assert!(spark_bridge::snapshot::parse_path(path).is_ok());
        }
    }

    #[test]
    fn prop_bindings_diff_never_targets_root(prev in bindings(), cur in bindings()) {
        let patch = diff_bindings(&prev, &cur);
        prop_assert!(patch.get("").is_none());

        let (PlainValue::Object(before), PlainValue::Object(after)) = (&prev, &cur) else {
            unreachable!()
        };
        let mut expected = after.clone();
        for name in before.keys() {
            if !after.contains_key(name) {
                expected.insert(name.clone(), PlainValue::Null);
            }
        }
        let mut target = prev.clone();
        patch.apply_to(&mut target).unwrap();
        prop_assert_eq!(target, PlainValue::Object(expected));
    }
}

// =============================================================================
// Fixed cases
// =============================================================================

#[test]
fn prop_length_change_replaces_whole_list() {
    let prev = PlainValue::from(json!({
        "list": [{ "user": { "name": "Tom" } }, { "user": { "name": "Jeck" } }]
    }));
    let cur = PlainValue::from(json!({
        "list": [{ "user": { "name": "Alice", "age": 10 } }]
    }));
    let patch = diff(&prev, &cur);
    assert_eq!(
        patch.to_json(),
        json!({ "list": [{ "user": { "name": "Alice", "age": 10 } }] })
    );
    assert_eq!(apply(&prev, &cur), cur);
}

#[test]
fn prop_shrunk_array_is_replaced() {
    let prev = PlainValue::from(json!({ "a": [1, 2] }));
    let cur = PlainValue::from(json!({ "a": [1] }));
    assert_eq!(diff(&prev, &cur).to_json(), json!({ "a": [1] }));
}

#[test]
fn prop_dotted_key_replaces_its_mapping() {
    let prev = PlainValue::from(json!({ "m": { "a.b": 1, "c": 2 } }));
    let cur = PlainValue::from(json!({ "m": { "a.b": 1, "c": 3 } }));
    let patch = diff(&prev, &cur);
    assert_eq!(patch.paths().collect::<Vec<_>>(), vec!["m"]);
    assert_eq!(apply(&prev, &cur), cur);
}

#[test]
fn prop_defined_to_undefined_escalates() {
    let mut inner = IndexMap::new();
    inner.insert("b".to_string(), PlainValue::Undefined);
    let mut root = IndexMap::new();
    root.insert("a".to_string(), PlainValue::Object(inner));
    let cur = PlainValue::Object(root);
    let prev = PlainValue::from(json!({ "a": { "b": 1 } }));

    let patch = diff(&prev, &cur);
    assert_eq!(patch.paths().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(apply(&prev, &cur), cur);
}
