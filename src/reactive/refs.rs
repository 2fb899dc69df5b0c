//! Ref - a tracked single-value cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::tracking::{Dep, next_id};
use super::value::{Value, to_reactive};

struct RefInner {
    id: u64,
    value: RefCell<Value>,
    dep: Dep,
    shallow: bool,
}

/// A reactive single-value wrapper.
///
/// Deep refs wrap assigned plain containers into [`Reactive`](super::Reactive)
/// ones so nested mutation is tracked too. Shallow refs store values as given
/// and only notify when the whole value is replaced.
#[derive(Clone)]
pub struct Ref(Rc<RefInner>);

impl Ref {
    /// Create a deep ref.
    pub fn new(value: impl Into<Value>) -> Self {
        Self::build(to_reactive(value.into()), false)
    }

    /// Create a shallow ref.
    pub fn shallow(value: impl Into<Value>) -> Self {
        Self::build(value.into(), true)
    }

    fn build(value: Value, shallow: bool) -> Self {
        Self(Rc::new(RefInner {
            id: next_id(),
            value: RefCell::new(value),
            dep: Dep::new(),
            shallow,
        }))
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> Value {
        self.0.dep.track();
        self.0.value.borrow().clone()
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Replace the value; subscribers are notified only if it changed.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let value = if self.0.shallow { value } else { to_reactive(value) };
        let changed = !Value::same_value(&self.0.value.borrow(), &value);
        if !changed {
            return;
        }
        *self.0.value.borrow_mut() = value;
        self.0.dep.trigger();
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.peek());
        self.set(next);
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        self.0.dep.trigger();
    }

    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.subscriber_count()
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref#{}", self.0.id)
    }
}
