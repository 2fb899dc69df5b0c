//! Reactive containers - tracked mappings and sequences.
//!
//! A mapping tracks each key separately plus one iteration slot that fires
//! when keys are added or removed. A sequence tracks as a whole: any read
//! subscribes to the iteration slot and any write triggers it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::tracking::{Dep, next_id};
use super::value::{Value, to_reactive};

/// Raw storage of a reactive container.
#[derive(Clone, Debug)]
pub enum Container {
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
}

struct ReactiveInner {
    id: u64,
    data: RefCell<Container>,
    key_deps: RefCell<HashMap<String, Dep>>,
    iterate: Dep,
    shallow: bool,
}

/// A tracked mapping or sequence.
#[derive(Clone)]
pub struct Reactive(Rc<ReactiveInner>);

impl Reactive {
    /// An empty deep mapping.
    pub fn new() -> Self {
        Self::from_object(IndexMap::new())
    }

    /// Wrap a mapping; nested plain containers become reactive too.
    pub fn from_object(map: IndexMap<String, Value>) -> Self {
        let map = map.into_iter().map(|(k, v)| (k, to_reactive(v))).collect();
        Self::build(Container::Object(map), false)
    }

    /// Wrap a sequence; nested plain containers become reactive too.
    pub fn from_vec(items: Vec<Value>) -> Self {
        let items = items.into_iter().map(to_reactive).collect();
        Self::build(Container::Array(items), false)
    }

    /// A mapping that tracks its own keys but stores values as given.
    pub fn shallow(map: IndexMap<String, Value>) -> Self {
        Self::build(Container::Object(map), true)
    }

    fn build(data: Container, shallow: bool) -> Self {
        Self(Rc::new(ReactiveInner {
            id: next_id(),
            data: RefCell::new(data),
            key_deps: RefCell::new(HashMap::new()),
            iterate: Dep::new(),
            shallow,
        }))
    }

    fn key_dep(&self, key: &str) -> Dep {
        self.0
            .key_deps
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(Dep::new)
            .clone()
    }

    fn existing_key_dep(&self, key: &str) -> Option<Dep> {
        self.0.key_deps.borrow().get(key).cloned()
    }

    fn convert(&self, value: Value) -> Value {
        if self.0.shallow { value } else { to_reactive(value) }
    }

    // =========================================================================
    // Mapping access
    // =========================================================================

    /// Read a key, tracking it. A stored ref is unwrapped (its value read
    /// through `Ref::get`). Missing keys read as undefined.
    pub fn get(&self, key: &str) -> Value {
        let stored = match &*self.0.data.borrow() {
            Container::Object(map) => map.get(key).cloned(),
            Container::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        };
        if self.is_array() {
            self.0.iterate.track();
        } else {
            self.key_dep(key).track();
        }
        match stored {
            Some(Value::Ref(inner)) if !self.0.shallow => inner.get(),
            Some(value) => value,
            None => Value::Undefined,
        }
    }

    /// Whether the key is present, tracking it.
    pub fn has(&self, key: &str) -> bool {
        match &*self.0.data.borrow() {
            Container::Object(map) => {
                self.key_dep(key).track();
                map.contains_key(key)
            }
            Container::Array(items) => {
                self.0.iterate.track();
                key.parse::<usize>().is_ok_and(|i| i < items.len())
            }
        }
    }

    /// Write a key. Subscribers fire only when the stored value changes.
    ///
    /// Writing a non-ref into a key that holds a ref writes through the ref.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if self.is_array() {
            if let Ok(index) = key.parse::<usize>() {
                self.set_index(index, value);
            }
            return;
        }
        let value = self.convert(value.into());

        let existing = match &*self.0.data.borrow() {
            Container::Object(map) => map.get(key).cloned(),
            Container::Array(_) => None,
        };
        if let Some(Value::Ref(inner)) = &existing {
            if !self.0.shallow && !matches!(value, Value::Ref(_)) {
                inner.set(value);
                return;
            }
        }

        let added = existing.is_none();
        if let Some(old) = &existing {
            if Value::same_value(old, &value) {
                return;
            }
        }
        if let Container::Object(map) = &mut *self.0.data.borrow_mut() {
            map.insert(key.to_string(), value);
        }

        if let Some(dep) = self.existing_key_dep(key) {
            dep.trigger();
        }
        if added {
            self.0.iterate.trigger();
        }
    }

    /// Remove a key. Returns the removed value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = match &mut *self.0.data.borrow_mut() {
            Container::Object(map) => map.shift_remove(key),
            Container::Array(_) => None,
        };
        if removed.is_some() {
            if let Some(dep) = self.existing_key_dep(key) {
                dep.trigger();
            }
            self.0.iterate.trigger();
        }
        removed
    }

    /// Keys in insertion order (indices for a sequence), tracking iteration.
    pub fn keys(&self) -> Vec<String> {
        self.0.iterate.track();
        match &*self.0.data.borrow() {
            Container::Object(map) => map.keys().cloned().collect(),
            Container::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    // =========================================================================
    // Sequence access
    // =========================================================================

    /// Read an element, tracking the sequence.
    pub fn at(&self, index: usize) -> Value {
        self.0.iterate.track();
        match &*self.0.data.borrow() {
            Container::Array(items) => items.get(index).cloned().unwrap_or_default(),
            Container::Object(map) => map.get(&index.to_string()).cloned().unwrap_or_default(),
        }
    }

    /// Write an element. Writing past the end pads with undefined.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) {
        let value = self.convert(value.into());
        let changed = {
            let mut data = self.0.data.borrow_mut();
            let Container::Array(items) = &mut *data else {
                return;
            };
            if items.get(index).is_some_and(|old| Value::same_value(old, &value)) {
                false
            } else {
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                true
            }
        };
        if changed {
            self.0.iterate.trigger();
        }
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = self.convert(value.into());
        self.mutate_array(|items| {
            items.push(value);
        });
    }

    pub fn pop(&self) -> Option<Value> {
        let mut popped = None;
        self.mutate_array(|items| popped = items.pop());
        popped
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = self.convert(value.into());
        self.mutate_array(|items| {
            let index = index.min(items.len());
            items.insert(index, value);
        });
    }

    pub fn remove_at(&self, index: usize) -> Option<Value> {
        let mut removed = None;
        self.mutate_array(|items| {
            if index < items.len() {
                removed = Some(items.remove(index));
            }
        });
        removed
    }

    pub fn truncate(&self, len: usize) {
        self.mutate_array(|items| items.truncate(len));
    }

    /// Length-changing sequence edit; triggers when the length moved.
    fn mutate_array(&self, f: impl FnOnce(&mut Vec<Value>)) {
        let changed = {
            let mut data = self.0.data.borrow_mut();
            let Container::Array(items) = &mut *data else {
                return;
            };
            let before = items.len();
            f(items);
            before != items.len()
        };
        if changed {
            self.0.iterate.trigger();
        }
    }

    /// Entry count, tracking iteration.
    pub fn len(&self) -> usize {
        self.0.iterate.track();
        match &*self.0.data.borrow() {
            Container::Object(map) => map.len(),
            Container::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Raw access
    // =========================================================================

    /// Borrow the raw storage without tracking.
    pub fn with_raw<R>(&self, f: impl FnOnce(&Container) -> R) -> R {
        f(&self.0.data.borrow())
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.0.data.borrow(), Container::Array(_))
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

    /// Distinct effects subscribed to any slot of this container.
    pub fn subscriber_count(&self) -> usize {
        let key_deps = self.0.key_deps.borrow();
        key_deps
            .values()
            .map(Dep::subscriber_count)
            .chain(std::iter::once(self.0.iterate.subscriber_count()))
            .sum()
    }
}

impl Default for Reactive {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_array() { "array" } else { "object" };
        write!(f, "Reactive#{}({kind})", self.0.id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ReactiveEffect, Ref};
    use serde_json::json;
    use std::cell::Cell;

    fn track(f: impl Fn() -> Value + 'static) -> Rc<Cell<usize>> {
        let runs = Rc::new(Cell::new(0));
        let runs_in = runs.clone();
        ReactiveEffect::new(
            move || {
                runs_in.set(runs_in.get() + 1);
                f()
            },
            None,
        )
        .run();
        runs
    }

    #[test]
    fn test_key_tracking_is_per_key() {
        let state = Reactive::new();
        state.set("a", 1);
        state.set("b", 1);

        let reader = state.clone();
        let runs = track(move || reader.get("a"));

        state.set("b", 2);
        assert_eq!(runs.get(), 1);
        state.set("a", 2);
        assert_eq!(runs.get(), 2);
        state.set("a", 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_adding_key_triggers_iteration() {
        let state = Reactive::new();
        let reader = state.clone();
        let runs = track(move || Value::from(reader.keys().len()));

        state.set("a", 1);
        assert_eq!(runs.get(), 2);
        state.set("a", 5);
        assert_eq!(runs.get(), 2);
        state.remove("a");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_nested_containers_become_reactive() {
        let state = Reactive::new();
        state.set("user", json!({ "name": "Tom" }));
        let Value::Reactive(user) = state.get("user") else {
            panic!("expected nested reactive");
        };
        let reader = user.clone();
        let runs = track(move || reader.get("name"));
        user.set("name", "Jeck");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_ref_members_are_unwrapped_and_written_through() {
        let count = Ref::new(1);
        let state = Reactive::new();
        state.set("count", count.clone());

        assert_eq!(state.get("count"), Value::from(1));
        state.set("count", 5);
        assert_eq!(count.peek(), Value::from(5));
    }

    #[test]
    fn test_array_mutations_trigger_iteration() {
        let list = Reactive::from_vec(vec![Value::from(1)]);
        let reader = list.clone();
        let runs = track(move || reader.at(0));

        list.push(2);
        assert_eq!(runs.get(), 2);
        list.set_index(0, 1);
        assert_eq!(runs.get(), 2);
        list.set_index(3, 4);
        assert!(list.with_raw(|raw| matches!(raw, Container::Array(items) if items.len() == 4)));
        assert_eq!(runs.get(), 3);
        assert_eq!(list.pop(), Some(Value::from(4)));
        list.truncate(1);
        assert_eq!(list.remove_at(0), Some(Value::from(1)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_shallow_keeps_plain_members() {
        let props = Reactive::shallow(IndexMap::new());
        props.set("user", json!({ "name": "Tom" }));
        assert!(matches!(props.get("user"), Value::Object(_)));
        assert!(props.is_shallow());
    }

    #[test]
    fn test_subscriber_count_drops_on_stop() {
        let state = Reactive::new();
        state.set("a", 1);
        let reader = state.clone();
        let effect = ReactiveEffect::new(move || reader.get("a"), None);
        effect.run();
        assert_eq!(state.subscriber_count(), 1);
        effect.stop();
        assert_eq!(state.subscriber_count(), 0);
    }
}
