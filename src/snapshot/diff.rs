//! Diff engine - reduce two snapshots to the patch the host needs.
//!
//! The host can only assign a whole value at a path. It cannot delete a key
//! or splice a sequence, so any change it cannot express as a sub-path
//! assignment escalates to a full replacement at the nearest path that can.
//! A mapping with a key that is not a path key (empty, or containing `.`,
//! `[` or `]`) is always replaced whole, since no path reaches that key.

use indexmap::IndexMap;

use super::patch::{Patch, is_path_key};
use super::plain::PlainValue;

// ── Public API ────────────────────────────────────────────────────────────

/// Compute the patch that turns `previous` into `current`.
///
/// Total and deterministic. `diff(c, c)` is always empty.
pub fn diff(previous: &PlainValue, current: &PlainValue) -> Patch {
    let mut patch = Patch::new();
    diff_at_path(&mut patch, "", previous, current);
    patch
}

/// Compute the patch for a binding root, as a host receives it.
///
/// The host cannot replace its root, so unlike [`diff`] this never emits the
/// empty path: each top-level binding is diffed on its own, and a binding
/// that disappeared is assigned null. Top-level keys that are not path keys
/// are skipped.
pub fn diff_bindings(previous: &PlainValue, current: &PlainValue) -> Patch {
    let (PlainValue::Object(previous), PlainValue::Object(current)) = (previous, current) else {
        return Patch::full(current);
    };
    let mut patch = Patch::new();
    for (key, cur) in current.iter().filter(|(key, _)| is_path_key(key)) {
        match previous.get(key) {
            None => emit(&mut patch, key, cur),
            Some(prev) => diff_at_path(&mut patch, key, prev, cur),
        }
    }
    for key in previous.keys() {
        if is_path_key(key) && !current.contains_key(key) {
            emit(&mut patch, key, &PlainValue::Null);
        }
    }
    patch
}

// ── Core recursive differ ─────────────────────────────────────────────────

fn diff_at_path(patch: &mut Patch, path: &str, previous: &PlainValue, current: &PlainValue) {
    if previous == current {
        return;
    }
    match (previous, current) {
        (PlainValue::Null, _) | (_, PlainValue::Null) => emit(patch, path, current),
        _ if previous.kind() != current.kind() => emit(patch, path, current),
        (PlainValue::Array(prev), PlainValue::Array(cur)) => diff_seq(patch, path, prev, cur),
        (PlainValue::Object(prev), PlainValue::Object(cur)) => diff_map(patch, path, prev, cur),
        _ => emit(patch, path, current),
    }
}

fn emit(patch: &mut Patch, path: &str, current: &PlainValue) {
    patch.insert(path, current.clone());
}

fn diff_seq(patch: &mut Patch, path: &str, previous: &[PlainValue], current: &[PlainValue]) {
    if previous.len() != current.len() {
        emit(patch, path, &PlainValue::Array(current.to_vec()));
        return;
    }
    for (index, (prev, cur)) in previous.iter().zip(current).enumerate() {
        diff_at_path(patch, &format!("{path}[{index}]"), prev, cur);
    }
}

fn diff_map(
    patch: &mut Patch,
    path: &str,
    previous: &IndexMap<String, PlainValue>,
    current: &IndexMap<String, PlainValue>,
) {
    if is_shape_shrink(previous, current) || !current.keys().all(|key| is_path_key(key)) {
        emit(patch, path, &PlainValue::Object(current.clone()));
        return;
    }
    for (key, cur) in current {
        let member = member_path(path, key);
        match previous.get(key) {
            None => emit(patch, &member, cur),
            Some(prev) => diff_at_path(patch, &member, prev, cur),
        }
    }
}

/// A key is gone, or a key defined before is undefined now.
fn is_shape_shrink(
    previous: &IndexMap<String, PlainValue>,
    current: &IndexMap<String, PlainValue>,
) -> bool {
    if previous.len() > current.len() {
        return true;
    }
    previous.iter().any(|(key, prev)| match current.get(key) {
        None => true,
        Some(cur) => !prev.is_undefined() && cur.is_undefined(),
    })
}

fn member_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
