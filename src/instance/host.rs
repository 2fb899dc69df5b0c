//! The host side of a binding: the runtime instance that receives patches.
//!
//! A host only knows how to apply path-keyed patches and expose methods. The
//! [`MemoryHost`] keeps the host's copy of the data in memory, which is what
//! tests and headless embedders use.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;

use crate::error::BridgeError;
use crate::reactive::{Callable, Value};
use crate::snapshot::{Patch, PlainValue};

/// Fired once the host has applied a patch.
pub type AckCallback = Box<dyn FnOnce()>;

/// A runtime instance the bridge writes to.
pub trait Host {
    /// Name used in logs and error reports (page route, component path).
    fn label(&self) -> &str;

    /// The property bag at attach time.
    fn properties(&self) -> IndexMap<String, PlainValue>;

    /// Apply `patch` to the host's data. `on_applied` fires once the host
    /// confirms the update; dropping it unfired also counts as confirmed.
    fn apply_patch(&self, patch: Patch, on_applied: Option<AckCallback>) -> Result<(), BridgeError>;

    /// Expose a callable as an instance method.
    fn bind_method(&self, name: &str, method: Callable);
}

// =============================================================================
// MemoryHost
// =============================================================================

/// In-memory host. Applies patches with path semantics and records them.
pub struct MemoryHost {
    label: String,
    properties: IndexMap<String, PlainValue>,
    data: RefCell<PlainValue>,
    patches: RefCell<Vec<Patch>>,
    methods: RefCell<IndexMap<String, Callable>>,
    manual_ack: bool,
    pending_acks: RefCell<VecDeque<AckCallback>>,
}

impl MemoryHost {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: IndexMap::new(),
            data: RefCell::new(PlainValue::object()),
            patches: RefCell::new(Vec::new()),
            methods: RefCell::new(IndexMap::new()),
            manual_ack: false,
            pending_acks: RefCell::new(VecDeque::new()),
        }
    }

    /// Properties handed to the instance at attach time.
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        if let PlainValue::Object(map) = PlainValue::from(properties) {
            self.properties = map;
        }
        self
    }

    /// Hold acknowledgements until [`acknowledge`](Self::acknowledge) is called.
    pub fn manual_ack(mut self) -> Self {
        self.manual_ack = true;
        self
    }

    /// The host's copy of the data.
    pub fn data(&self) -> PlainValue {
        self.data.borrow().clone()
    }

    pub fn patches(&self) -> Vec<Patch> {
        self.patches.borrow().clone()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.borrow().len()
    }

    pub fn last_patch(&self) -> Option<Patch> {
        self.patches.borrow().last().cloned()
    }

    /// Fire every held acknowledgement. Returns how many fired.
    pub fn acknowledge(&self) -> usize {
        let acks: Vec<AckCallback> = self.pending_acks.borrow_mut().drain(..).collect();
        let count = acks.len();
        for ack in acks {
            ack();
        }
        count
    }

    pub fn pending_acks(&self) -> usize {
        self.pending_acks.borrow().len()
    }

    /// Invoke a bound method. `None` if nothing is bound under `name`.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        let method = self.methods.borrow().get(name).cloned()?;
        Some(method.call(args))
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.borrow().contains_key(name)
    }
}

impl Host for MemoryHost {
    fn label(&self) -> &str {
        &self.label
    }

    fn properties(&self) -> IndexMap<String, PlainValue> {
        self.properties.clone()
    }

    fn apply_patch(&self, patch: Patch, on_applied: Option<AckCallback>) -> Result<(), BridgeError> {
        // Apply to a copy so a bad path leaves the data untouched.
        let mut next = self.data.borrow().clone();
        patch.apply_to(&mut next)?;
        *self.data.borrow_mut() = next;
        tracing::trace!(host = %self.label, entries = patch.len(), "patch applied");
        self.patches.borrow_mut().push(patch);

        if let Some(ack) = on_applied {
            if self.manual_ack {
                self.pending_acks.borrow_mut().push_back(ack);
            } else {
                ack();
            }
        }
        Ok(())
    }

    fn bind_method(&self, name: &str, method: Callable) {
        self.methods.borrow_mut().insert(name.to_string(), method);
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("label", &self.label)
            .field("patches", &self.patch_count())
            .field("pending_acks", &self.pending_acks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use serde_json::json;

    #[test]
    fn test_apply_patch_updates_data() {
        let host = MemoryHost::new("pages/index");
        let patch: Patch = [
            ("user.name".to_string(), PlainValue::from(json!("Tom"))),
            ("list[1]".to_string(), PlainValue::from(json!(2))),
        ]
        .into_iter()
        .collect();
        host.apply_patch(patch, None).unwrap();

        assert_eq!(
            host.data(),
            PlainValue::from(json!({ "user": { "name": "Tom" }, "list": [null, 2] }))
        );
        assert_eq!(host.patch_count(), 1);
    }

    #[test]
    fn test_bad_path_leaves_data_untouched() {
        let host = MemoryHost::new("c");
        let mut patch = Patch::new();
        patch.insert("a", PlainValue::from(json!(1)));
        patch.insert("b[x]", PlainValue::from(json!(2)));
        assert!(host.apply_patch(patch, None).is_err());
        assert_eq!(host.data(), PlainValue::object());
        assert_eq!(host.patch_count(), 0);
    }

    #[test]
    fn test_manual_ack_queues_callbacks() {
        let host = MemoryHost::new("c").manual_ack();
        let fired = Rc::new(Cell::new(0));
        for _ in 0..2 {
            let fired = fired.clone();
            host.apply_patch(Patch::new(), Some(Box::new(move || fired.set(fired.get() + 1))))
                .unwrap();
        }
        assert_eq!(fired.get(), 0);
        assert_eq!(host.pending_acks(), 2);
        assert_eq!(host.acknowledge(), 2);
        assert_eq!(fired.get(), 2);
        assert_eq!(host.acknowledge(), 0);
    }

    #[test]
    fn test_immediate_ack() {
        let host = MemoryHost::new("c");
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        host.apply_patch(Patch::new(), Some(Box::new(move || flag.set(true))))
            .unwrap();
        assert!(fired.get());
    }

    #[test]
    fn test_methods() {
        let host = MemoryHost::new("c").with_properties(json!({ "title": "hi" }));
        host.bind_method("double", Callable::new(|args| {
            Value::from(args.first().and_then(Value::as_f64).unwrap_or_default() * 2.0)
        }));
        assert!(host.has_method("double"));
        assert_eq!(host.call("double", &[Value::from(4)]), Some(Value::from(8)));
        assert_eq!(host.call("missing", &[]), None);
        assert_eq!(host.properties().get("title"), Some(&PlainValue::from(json!("hi"))));
    }
}
