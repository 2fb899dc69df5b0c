//! Read-only property view handed to setup.
//!
//! Declared properties live in a shallow reactive container, so setup code
//! (getters, watchers) re-runs when the host updates one. Reading an
//! undeclared name returns `None` and warns, depending on configuration.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::warn;
use crate::reactive::{Reactive, Value};
use crate::snapshot::PlainValue;

struct PropsInner {
    values: Reactive,
    declared: Vec<String>,
    warn_undeclared: bool,
    instance: String,
}

/// Property view of one instance. Clones share the same view.
#[derive(Clone)]
pub struct Props(Rc<PropsInner>);

impl Props {
    /// Build the view from the host's property bag. Declared names the host
    /// did not supply read as undefined; undeclared names are dropped.
    pub(crate) fn new(
        declared: &[String],
        mut supplied: IndexMap<String, PlainValue>,
        warn_undeclared: bool,
        instance: &str,
    ) -> Self {
        let values = declared
            .iter()
            .map(|name| {
                let value = supplied.shift_remove(name).map(Value::from).unwrap_or_default();
                (name.clone(), value)
            })
            .collect();
        Self(Rc::new(PropsInner {
            values: Reactive::shallow(values),
            declared: declared.to_vec(),
            warn_undeclared,
            instance: instance.to_string(),
        }))
    }

    /// Read a declared property, tracking it.
    pub fn get(&self, name: &str) -> Option<Value> {
        if self.is_declared(name) {
            return Some(self.0.values.get(name));
        }
        if self.0.warn_undeclared {
            warn(
                &format!("property `{name}` was read but is not declared"),
                Some(&self.0.instance),
            );
        }
        None
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.0.declared.iter().any(|declared| declared == name)
    }

    pub fn names(&self) -> &[String] {
        &self.0.declared
    }

    pub fn len(&self) -> usize {
        self.0.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.declared.is_empty()
    }

    /// Update a declared property. Returns false for undeclared names.
    pub(crate) fn set(&self, name: &str, value: Value) -> bool {
        if !self.is_declared(name) {
            return false;
        }
        self.0.values.set(name, value);
        true
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.0.values.subscriber_count()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("declared", &self.0.declared)
            .finish()
    }
}
