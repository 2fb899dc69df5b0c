//! Snapshot normalizer - live value graph to plain data.
//!
//! Reads go through `Ref::peek` and `Reactive::with_raw`, so normalizing never
//! subscribes the caller to anything.

use indexmap::IndexMap;
use thiserror::Error;

use crate::reactive::{Container, Reactive, Value};

use super::patch::is_path_key;
use super::plain::PlainValue;

/// A bound value contains something the host cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("binding `{binding}` contains unsupported type `{type_name}` at `{path}`")]
pub struct NormalizeError {
    /// Top-level binding name (first path segment).
    pub binding: String,
    /// Full path of the offending value.
    pub path: String,
    pub type_name: String,
}

/// Normalize one value, reporting errors against `path`.
pub fn normalize(value: &Value, path: &str) -> Result<PlainValue, NormalizeError> {
    Normalizer::new(path).value(value, path)
}

/// Normalize every non-callable binding of a binding container.
///
/// Each binding is normalized with its name as the root path, so an error
/// names the binding it came from. The first failure aborts.
pub fn normalize_bindings(container: &Reactive) -> Result<PlainValue, NormalizeError> {
    let mut out = IndexMap::new();
    for (name, result) in normalize_each(container) {
        out.insert(name, result?);
    }
    Ok(PlainValue::Object(out))
}

/// Normalize every non-callable binding independently.
pub fn normalize_each(container: &Reactive) -> Vec<(String, Result<PlainValue, NormalizeError>)> {
    let entries: Vec<(String, Value)> = container.with_raw(|raw| match raw {
        Container::Object(map) => map
            .iter()
            .filter(|(_, value)| !value.is_callable())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Container::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
    });
    entries
        .into_iter()
        .map(|(name, value)| {
            let result = normalize(&value, &name);
            (name, result)
        })
        .collect()
}

/// Path of a member for error messages. Keys that would read as path
/// syntax are quoted.
fn member_path(path: &str, key: &str) -> String {
    if !is_path_key(key) {
        format!("{path}[{key:?}]")
    } else if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

struct Normalizer {
    binding: String,
    /// Reactive containers on the current descent, for cycle detection.
    visiting: Vec<u64>,
}

impl Normalizer {
    fn new(root: &str) -> Self {
        let binding = root
            .split(['.', '['])
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            binding,
            visiting: Vec::new(),
        }
    }

    fn fail(&self, path: &str, type_name: &str) -> NormalizeError {
        NormalizeError {
            binding: self.binding.clone(),
            path: path.to_string(),
            type_name: type_name.to_string(),
        }
    }

    fn value(&mut self, value: &Value, path: &str) -> Result<PlainValue, NormalizeError> {
        match value {
            Value::Undefined => Ok(PlainValue::Undefined),
            Value::Null => Ok(PlainValue::Null),
            Value::Bool(b) => Ok(PlainValue::Bool(*b)),
            Value::Number(n) => {
                if n.is_nan() {
                    Err(self.fail(path, "NaN"))
                } else if n.is_infinite() {
                    Err(self.fail(path, "Infinity"))
                } else {
                    Ok(PlainValue::Number(*n))
                }
            }
            Value::String(s) => Ok(PlainValue::String(s.clone())),
            // Bound as host methods elsewhere; never part of a snapshot.
            Value::Function(_) => Ok(PlainValue::Undefined),
            Value::Opaque(opaque) => Err(self.fail(path, opaque.type_name())),
            Value::Ref(inner) => {
                let mut current = inner.peek();
                while let Value::Ref(next) = current {
                    current = next.peek();
                }
                self.value(&current, path)
            }
            Value::Reactive(proxy) => {
                if self.visiting.contains(&proxy.id()) {
                    return Err(self.fail(path, "cyclic reference"));
                }
                let raw = proxy.with_raw(Container::clone);
                self.visiting.push(proxy.id());
                let result = match &raw {
                    Container::Object(map) => self.mapping(map, path),
                    Container::Array(items) => self.sequence(items, path),
                };
                self.visiting.pop();
                result
            }
            Value::Array(items) => self.sequence(items, path),
            Value::Object(map) => self.mapping(map, path),
        }
    }

    fn sequence(&mut self, items: &[Value], path: &str) -> Result<PlainValue, NormalizeError> {
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if item.is_callable() {
                out.push(PlainValue::Null);
                continue;
            }
            out.push(self.value(item, &index_path(path, index))?);
        }
        Ok(PlainValue::Array(out))
    }

    fn mapping(
        &mut self,
        map: &IndexMap<String, Value>,
        path: &str,
    ) -> Result<PlainValue, NormalizeError> {
        let mut out = IndexMap::with_capacity(map.len());
        for (key, member) in map {
            if member.is_callable() {
                continue;
            }
            out.insert(key.clone(), self.value(member, &member_path(path, key))?);
        }
        Ok(PlainValue::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Callable, Opaque, Ref};
    use serde_json::json;

    fn plain(value: serde_json::Value) -> PlainValue {
        PlainValue::from(value)
    }

    #[test]
    fn test_unwraps_refs_and_proxies() {
        let inner = Ref::new(json!({ "name": "Tom" }));
        let outer = Ref::new(Value::Ref(inner));
        let state = Reactive::new();
        state.set("user", outer);
        state.set("list", json!([1, 2]));

        let snapshot = normalize(&Value::Reactive(state), "").unwrap();
        assert_eq!(
            snapshot,
            plain(json!({ "user": { "name": "Tom" }, "list": [1, 2] }))
        );
    }

    #[test]
    fn test_reports_path_and_type() {
        let state = Reactive::new();
        state.set(
            "list",
            Value::Array(vec![Value::object(), Value::from(Opaque::new("Symbol"))]),
        );
        let err = normalize_bindings(&state).unwrap_err();
        assert_eq!(err.binding, "list");
        assert_eq!(err.path, "list[1]");
        assert_eq!(err.type_name, "Symbol");
    }

    #[test]
    fn test_error_path_quotes_path_like_keys() {
        let mut map = IndexMap::new();
        map.insert("a.b".to_string(), Value::from(Opaque::new("Symbol")));
        let err = normalize(&Value::Object(map), "cfg").unwrap_err();
        assert_eq!(err.path, r#"cfg["a.b"]"#);
        assert_eq!(err.binding, "cfg");
    }

    #[test]
    fn test_non_finite_numbers_fail() {
        let err = normalize(&Value::from(f64::NAN), "n").unwrap_err();
        assert_eq!(err.type_name, "NaN");
        let err = normalize(&Value::from(f64::INFINITY), "a.b").unwrap_err();
        assert_eq!((err.binding.as_str(), err.type_name.as_str()), ("a", "Infinity"));
    }

    #[test]
    fn test_nested_callables_follow_json_rules() {
        let f = Callable::new(|_| Value::Undefined);
        let mut map = IndexMap::new();
        map.insert("run".to_string(), Value::from(f.clone()));
        map.insert("items".to_string(), Value::Array(vec![Value::from(f), Value::from(1)]));
        let snapshot = normalize(&Value::Object(map), "cfg").unwrap();
        assert_eq!(snapshot, plain(json!({ "items": [null, 1] })));
    }

    #[test]
    fn test_cycle_is_reported() {
        let state = Reactive::new();
        state.set("self", state.clone());
        let err = normalize_bindings(&state).unwrap_err();
        assert_eq!(err.type_name, "cyclic reference");
        assert_eq!(err.path, "self.self");
        // Break the cycle so the test does not leak.
        state.remove("self");
    }

    #[test]
    fn test_shared_subtrees_are_not_cycles() {
        let shared = Reactive::new();
        shared.set("x", 1);
        let state = Reactive::new();
        state.set("a", shared.clone());
        state.set("b", shared);
        let snapshot = normalize_bindings(&state).unwrap();
        assert_eq!(snapshot, plain(json!({ "a": { "x": 1 }, "b": { "x": 1 } })));
    }

    #[test]
    fn test_normalize_each_skips_methods() {
        let state = Reactive::new();
        state.set("count", 1);
        state.set("bad", Opaque::new("Map"));
        state.set("inc", Callable::new(|_| Value::Undefined));
        let results = normalize_each(&state);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1, Ok(PlainValue::Number(1.0)));
        assert!(results[1].1.is_err());
    }
}
