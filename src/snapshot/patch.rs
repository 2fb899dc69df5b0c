//! Patches - flat path-keyed updates and the host's path-assignment semantics.
//!
//! Path grammar: `key`, `a.b.c`, `a[0].b`, `[0]` (index into a root sequence).
//! The empty path addresses the whole root.

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::plain::PlainValue;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("invalid patch path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
}

fn invalid(path: &str, reason: &str) -> PatchError {
    PatchError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────

/// One step of a patch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Split a patch path into segments. The empty path yields no segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PatchError> {
    let mut segments = Vec::new();
    let mut chars = path.char_indices().peekable();
    // Whether a `.` separator was just consumed (a key must follow).
    let mut after_dot = false;

    while let Some(&(start, c)) = chars.peek() {
        match c {
            '[' => {
                if after_dot {
                    return Err(invalid(path, "expected a key after `.`"));
                }
                chars.next();
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some((_, ']')) => break,
                        Some((_, d)) if d.is_ascii_digit() => digits.push(d),
                        Some((_, other)) => {
                            return Err(invalid(path, &format!("unexpected `{other}` in index")));
                        }
                        None => return Err(invalid(path, "unterminated index")),
                    }
                }
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| invalid(path, "empty or oversized index"))?;
                segments.push(PathSegment::Index(index));
            }
            '.' => {
                if segments.is_empty() || after_dot {
                    return Err(invalid(path, "empty key"));
                }
                chars.next();
                after_dot = true;
                continue;
            }
            ']' => return Err(invalid(path, "unmatched `]`")),
            _ => {
                if !segments.is_empty() && !after_dot {
                    return Err(invalid(path, "missing `.` before key"));
                }
                let mut end = start;
                while let Some(&(i, k)) = chars.peek() {
                    if matches!(k, '.' | '[' | ']') {
                        break;
                    }
                    end = i + k.len_utf8();
                    chars.next();
                }
                segments.push(PathSegment::Key(path[start..end].to_string()));
            }
        }
        after_dot = false;
    }

    if after_dot {
        return Err(invalid(path, "trailing `.`"));
    }
    Ok(segments)
}

/// Whether `key` can be addressed as one path segment.
///
/// Empty keys and keys containing `.`, `[` or `]` would parse as some other
/// path, so they can only be written by replacing their parent.
pub fn is_path_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']'])
}

// ── Patch ─────────────────────────────────────────────────────────────────

/// Insertion-ordered `path -> value` updates for one host write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    entries: IndexMap<String, PlainValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per top-level member of `snapshot`; a non-mapping snapshot
    /// becomes a single root replacement. Top-level keys are expected to be
    /// [path keys](is_path_key).
    pub fn full(snapshot: &PlainValue) -> Self {
        let mut patch = Self::new();
        match snapshot {
            PlainValue::Object(map) => {
                for (key, value) in map {
                    patch.insert(key.clone(), value.clone());
                }
            }
            other => patch.insert(String::new(), other.clone()),
        }
        patch
    }

    pub fn insert(&mut self, path: impl Into<String>, value: PlainValue) {
        self.entries.insert(path.into(), value);
    }

    pub fn get(&self, path: &str) -> Option<&PlainValue> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PlainValue)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> IndexMap<String, PlainValue> {
        self.entries
    }

    /// Apply every entry in order with host path-assignment semantics.
    ///
    /// Missing intermediate containers are created, sequences are extended,
    /// and containers of the wrong kind are replaced.
    pub fn apply_to(&self, target: &mut PlainValue) -> Result<(), PatchError> {
        for (path, value) in &self.entries {
            let segments = parse_path(path)?;
            assign(target, &segments, value.clone());
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, PlainValue)> for Patch {
    fn from_iter<I: IntoIterator<Item = (String, PlainValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Patch {
    type Item = (String, PlainValue);
    type IntoIter = indexmap::map::IntoIter<String, PlainValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, value) in &self.entries {
            map.serialize_entry(path, value)?;
        }
        map.end()
    }
}

fn assign(target: &mut PlainValue, segments: &[PathSegment], value: PlainValue) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    let slot = match first {
        PathSegment::Key(key) => {
            if !matches!(target, PlainValue::Object(_)) {
                *target = PlainValue::object();
            }
            let PlainValue::Object(map) = target else {
                return;
            };
            map.entry(key.clone()).or_default()
        }
        PathSegment::Index(index) => {
            if !matches!(target, PlainValue::Array(_)) {
                *target = PlainValue::Array(Vec::new());
            }
            let PlainValue::Array(items) = target else {
                return;
            };
            if items.len() <= *index {
                items.resize(index + 1, PlainValue::Null);
            }
            &mut items[*index]
        }
    };
    assign(slot, rest, value);
}
