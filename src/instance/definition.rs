//! What a page or component is made of: its kind, declared properties and
//! setup function.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::bindings::Bindings;
use super::context::SetupContext;
use super::props::Props;
use crate::error::BridgeError;

/// Host instance flavour. Pages fire more lifetimes than components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceKind {
    Page,
    Component,
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page => f.write_str("Page"),
            Self::Component => f.write_str("Component"),
        }
    }
}

/// User setup: reads properties, registers hooks, returns the binding set.
pub type SetupFn = Rc<dyn Fn(&Props, &SetupContext) -> Result<Bindings, BridgeError>>;

/// A page or component definition. Cheap to clone; instances share it.
#[derive(Clone)]
pub struct Definition {
    name: String,
    kind: InstanceKind,
    properties: Vec<String>,
    setup: SetupFn,
}

impl Definition {
    pub fn page(
        name: impl Into<String>,
        setup: impl Fn(&Props, &SetupContext) -> Result<Bindings, BridgeError> + 'static,
    ) -> Self {
        Self::new(name, InstanceKind::Page, setup)
    }

    pub fn component(
        name: impl Into<String>,
        setup: impl Fn(&Props, &SetupContext) -> Result<Bindings, BridgeError> + 'static,
    ) -> Self {
        Self::new(name, InstanceKind::Component, setup)
    }

    fn new(
        name: impl Into<String>,
        kind: InstanceKind,
        setup: impl Fn(&Props, &SetupContext) -> Result<Bindings, BridgeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: Vec::new(),
            setup: Rc::new(setup),
        }
    }

    /// Declare the property names setup may read.
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    pub fn declared(&self) -> &[String] {
        &self.properties
    }

    pub(crate) fn setup(&self) -> SetupFn {
        self.setup.clone()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .finish()
    }
}
