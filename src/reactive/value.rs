//! The live value graph bound by setup functions.
//!
//! A [`Value`] is what user code hands to the bridge: plain data, reactive
//! wrappers around data, callables, or leaves the host cannot represent
//! ([`Opaque`]). The snapshot normalizer turns it into plain data.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::object::Reactive;
use super::refs::Ref;
use crate::snapshot::PlainValue;

// =============================================================================
// Value
// =============================================================================

/// A bound value: primitive, container, wrapper, callable or opaque leaf.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Ref(Ref),
    Reactive(Reactive),
    Function(Callable),
    Opaque(Opaque),
}

impl Value {
    /// An empty plain object.
    pub fn object() -> Self {
        Self::Object(IndexMap::new())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Self::Reactive(r) => Some(r),
            _ => None,
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
            Self::Ref(_) => "Ref",
            Self::Reactive(_) => "Reactive",
            Self::Function(_) => "Function",
            Self::Opaque(opaque) => opaque.type_name(),
        }
    }

    /// Change detection used by watchers.
    ///
    /// Wrappers, callables and opaque leaves compare by identity; plain data
    /// compares structurally; `NaN` equals `NaN`.
    pub fn same_value(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Array(x), Value::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(a, b)| Value::same_value(a, b))
            }
            (Value::Object(x), Value::Object(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .all(|(k, a)| y.get(k).is_some_and(|b| Value::same_value(a, b)))
            }
            (Value::Ref(x), Value::Ref(y)) => x.ptr_eq(y),
            (Value::Reactive(x), Value::Reactive(y)) => x.ptr_eq(y),
            (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
            (Value::Opaque(x), Value::Opaque(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::same_value(self, other)
    }
}

/// Wrap plain containers into reactive ones, recursively.
///
/// Anything that is not a plain object or array is returned unchanged.
pub fn to_reactive(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Reactive(Reactive::from_object(map)),
        Value::Array(items) => Value::Reactive(Reactive::from_vec(items)),
        other => other,
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Self::Object(value)
    }
}

impl From<Ref> for Value {
    fn from(value: Ref) -> Self {
        Self::Ref(value)
    }
}

impl From<Reactive> for Value {
    fn from(value: Reactive) -> Self {
        Self::Reactive(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Self::Function(value)
    }
}

impl From<Opaque> for Value {
    fn from(value: Opaque) -> Self {
        Self::Opaque(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<PlainValue> for Value {
    fn from(value: PlainValue) -> Self {
        match value {
            PlainValue::Undefined => Self::Undefined,
            PlainValue::Null => Self::Null,
            PlainValue::Bool(b) => Self::Bool(b),
            PlainValue::Number(n) => Self::Number(n),
            PlainValue::String(s) => Self::String(s),
            PlainValue::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
            PlainValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

// =============================================================================
// Callable
// =============================================================================

/// A function value. Bound directly onto the host instance, never diffed.
#[derive(Clone)]
pub struct Callable(Rc<dyn Fn(&[Value]) -> Value>);

impl Callable {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable")
    }
}

// =============================================================================
// Opaque
// =============================================================================

/// A leaf the host cannot represent (symbol, class instance, map, set, ...).
#[derive(Clone)]
pub struct Opaque(Rc<str>);

impl Opaque {
    pub fn new(type_name: &str) -> Self {
        Self(Rc::from(type_name))
    }

    pub fn type_name(&self) -> &str {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_value_primitives() {
        assert!(Value::same_value(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(!Value::same_value(&Value::Number(1.0), &Value::from("1")));
        assert!(!Value::same_value(&Value::Null, &Value::Undefined));
    }

    #[test]
    fn test_same_value_identity_for_wrappers() {
        let a = Ref::new(1);
        let b = Ref::new(1);
        assert!(Value::same_value(&Value::from(a.clone()), &Value::from(a)));
        assert!(!Value::same_value(&Value::from(b.clone()), &Value::from(Ref::new(1))));

        let f = Callable::new(|_| Value::Undefined);
        assert_eq!(Value::from(f.clone()), Value::from(f));
        assert_ne!(Value::from(Opaque::new("Symbol")), Value::from(Opaque::new("Symbol")));
    }

    #[test]
    fn test_same_value_plain_is_structural() {
        let a = Value::from(json!({ "list": [1, 2], "name": "Tom" }));
        let b = Value::from(json!({ "list": [1, 2], "name": "Tom" }));
        let c = Value::from(json!({ "list": [1], "name": "Tom" }));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_to_reactive_wraps_containers_only() {
        assert!(matches!(to_reactive(Value::object()), Value::Reactive(_)));
        assert!(matches!(to_reactive(Value::Array(vec![])), Value::Reactive(_)));
        assert_eq!(to_reactive(Value::from(3)), Value::Number(3.0));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::from(Opaque::new("Symbol")).type_name(), "Symbol");
        assert_eq!(Value::from(Ref::new(0)).type_name(), "Ref");
    }
}
