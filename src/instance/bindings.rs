//! The binding set a setup function returns.

use indexmap::IndexMap;

use crate::reactive::{Callable, Value};

/// Named values and methods, in declaration order.
///
/// ```ignore
/// Ok(Bindings::new()
///     .with("count", count.clone())
///     .method("increment", move |_| { count.update(|n| ...); Value::Undefined }))
/// ```
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value. Rebinding a name replaces it in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    /// Bind a method. Methods go to the host instance, never into snapshots.
    pub fn method(
        self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Value + 'static,
    ) -> Self {
        self.with(name, Callable::new(f))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

impl IntoIterator for Bindings {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
