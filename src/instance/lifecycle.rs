//! Binding lifecycle - wires a reactive scope to one host instance.
//!
//! # States
//!
//! ```text
//! Created -> Attached -> (Active <-> Flushing) -> Detached
//! ```
//!
//! - **Created**: scope and hook registry allocated
//! - **Attached**: setup runs inside the scope; methods go to the host, the
//!   rest into one reactive container; the first snapshot is pushed in full
//! - **Active**: a deep watcher over the container queues a flush on change
//! - **Flushing**: normalize, diff, push a non-empty patch, advance baseline
//! - **Detached**: detached hooks run, the scope stops, late flushes are
//!   skipped
//!
//! A flush that fails to normalize is reported and abandoned; the baseline
//! stays at what was last pushed.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::context::SetupContext;
use super::definition::{Definition, InstanceKind};
use super::hooks::{HookRegistry, Lifetime};
use super::host::Host;
use super::props::Props;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ErrorKind, handle_error, warn};
use crate::reactive::{EffectScope, Reactive, Value};
use crate::renderer::PatchRenderer;
use crate::scheduler::Scheduler;
use crate::snapshot::{PlainValue, is_path_key, normalize_bindings, normalize_each};
use crate::watch::{WatchHandle, WatchOptions, watch_on};

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Attached,
    Active,
    Flushing,
    Detached,
}

struct InstanceInner {
    definition: Definition,
    label: String,
    host: Rc<dyn Host>,
    config: BridgeConfig,
    scheduler: Scheduler,
    scope: EffectScope,
    hooks: Rc<HookRegistry>,
    state: Cell<LifecycleState>,
    unmounted: Cell<bool>,
    props: RefCell<Option<Props>>,
    bindings: RefCell<Option<Reactive>>,
    renderer: RefCell<PatchRenderer>,
    watcher: RefCell<Option<WatchHandle>>,
}

/// One page or component bound to a host instance. Clones share the instance.
#[derive(Clone)]
pub struct Instance(Rc<InstanceInner>);

impl Instance {
    /// Create an instance on the thread's scheduler with default settings.
    pub fn new(definition: Definition, host: Rc<dyn Host>) -> Self {
        Self::build(definition, host, BridgeConfig::default(), Scheduler::current())
    }

    /// Create an instance with its own scheduler built from `config`.
    pub fn with_config(definition: Definition, host: Rc<dyn Host>, config: BridgeConfig) -> Self {
        let scheduler = Scheduler::with_config(&config);
        Self::build(definition, host, config, scheduler)
    }

    fn build(
        definition: Definition,
        host: Rc<dyn Host>,
        config: BridgeConfig,
        scheduler: Scheduler,
    ) -> Self {
        let label = host.label().to_string();
        let renderer = PatchRenderer::new(host.clone(), scheduler.clone());
        tracing::trace!(instance = %label, definition = definition.name(), "instance created");
        Self(Rc::new(InstanceInner {
            definition,
            label,
            host,
            config,
            scheduler,
            scope: EffectScope::new(),
            hooks: Rc::new(HookRegistry::new()),
            state: Cell::new(LifecycleState::Created),
            unmounted: Cell::new(false),
            props: RefCell::new(None),
            bindings: RefCell::new(None),
            renderer: RefCell::new(renderer),
            watcher: RefCell::new(None),
        }))
    }

    // =========================================================================
    // Attach
    // =========================================================================

    /// Run setup and start syncing its bindings to the host.
    pub fn attach(&self) -> Result<(), BridgeError> {
        let inner = &self.0;
        match inner.state.get() {
            LifecycleState::Created => {}
            LifecycleState::Detached => {
                return Err(inner.misuse("attach", "called on a detached instance"));
            }
            _ => return Err(inner.misuse("attach", "called on an instance that is already attached")),
        }

        let props = Props::new(
            inner.definition.declared(),
            inner.host.properties(),
            inner.config.warn_undeclared_props,
            &inner.label,
        );
        *inner.props.borrow_mut() = Some(props.clone());
        inner.state.set(LifecycleState::Attached);

        let context = SetupContext::new(
            inner.definition.kind(),
            &inner.label,
            inner.hooks.clone(),
            inner.scheduler.clone(),
        );
        let setup = inner.definition.setup();
        let (setup_props, setup_context) = (props.clone(), context.clone());
        let outcome = inner.scope.run(move || setup(&setup_props, &setup_context));
        context.close();

        let bindings = match outcome {
            Some(Ok(bindings)) => bindings,
            Some(Err(error)) => {
                handle_error(&error, ErrorKind::SetupFunction, Some(&inner.label));
                return Err(error);
            }
            None => return Err(inner.misuse("attach", "the instance scope is no longer active")),
        };

        let container = Reactive::new();
        let mut methods = 0;
        for (name, value) in bindings {
            if !is_path_key(&name) {
                warn(
                    &format!("binding {name:?} is not a valid host path key and is not synced"),
                    Some(&inner.label),
                );
                continue;
            }
            match value {
                Value::Function(method) => {
                    inner.host.bind_method(&name, method);
                    methods += 1;
                }
                value => container.set(&name, value),
            }
        }
        *inner.bindings.borrow_mut() = Some(container.clone());

        inner.first_push(&container)?;

        let weak = Rc::downgrade(&self.0);
        let options = WatchOptions::default()
            .deep()
            .flush(inner.config.default_flush)
            .instance(inner.label.clone());
        let scheduler = inner.scheduler.clone();
        let handle = inner.scope.run(move || {
            watch_on(
                &scheduler,
                container,
                move |_, _, _| flush_weak(&weak),
                options,
            )
        });
        *inner.watcher.borrow_mut() = handle;
        inner.state.set(LifecycleState::Active);

        tracing::debug!(
            instance = %inner.label,
            kind = %inner.definition.kind(),
            methods,
            "instance attached"
        );
        Ok(())
    }

    // =========================================================================
    // Detach
    // =========================================================================

    /// Run detached hooks, stop every watcher and mark the instance
    /// unmounted. Idempotent.
    pub fn detach(&self) {
        self.0.teardown(&[]);
    }

    /// Fire a host lifetime. Returns the last hook's value.
    ///
    /// `Lifetime::Detached` tears the instance down.
    pub fn trigger(&self, lifetime: Lifetime, args: &[Value]) -> Value {
        let inner = &self.0;
        if lifetime == Lifetime::Detached {
            return inner.teardown(args);
        }
        if inner.state.get() == LifecycleState::Detached {
            tracing::debug!(instance = %inner.label, lifetime = %lifetime, "lifetime after detach ignored");
            return Value::Undefined;
        }
        inner.hooks.run(lifetime, args, &inner.label)
    }

    // =========================================================================
    // Host input
    // =========================================================================

    /// Host-side property update. Only declared properties are updated.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> bool {
        let inner = &self.0;
        let Some(props) = inner.props.borrow().clone() else {
            warn(&format!("property `{name}` set before attach; ignored"), Some(&inner.label));
            return false;
        };
        if props.set(name, value.into()) {
            return true;
        }
        warn(&format!("property `{name}` is not declared; update ignored"), Some(&inner.label));
        false
    }

    /// Push the current snapshot in full, regardless of the baseline.
    ///
    /// For hosts that lost their copy of the data.
    pub fn resync(&self) -> Result<(), BridgeError> {
        let inner = &self.0;
        if inner.state.get() != LifecycleState::Active {
            return Err(inner.misuse("resync", "called on an instance that is not active"));
        }
        let Some(container) = inner.bindings.borrow().clone() else {
            return Ok(());
        };
        let snapshot = normalize_bindings(&container)?;
        inner.renderer.borrow_mut().render_full(&snapshot)
    }

    /// Run `f` once pending host updates were applied.
    pub fn next_tick(&self, f: impl FnOnce() + 'static) {
        self.0.scheduler.next_tick(f);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> LifecycleState {
        self.0.state.get()
    }

    pub fn is_unmounted(&self) -> bool {
        self.0.unmounted.get()
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn kind(&self) -> InstanceKind {
        self.0.definition.kind()
    }

    /// The snapshot the host was last brought up to date with.
    pub fn snapshot(&self) -> Option<PlainValue> {
        self.0.renderer.borrow().previous().cloned()
    }

    /// The reactive container holding the non-callable bindings.
    pub fn bindings(&self) -> Option<Reactive> {
        self.0.bindings.borrow().clone()
    }

    pub fn props(&self) -> Option<Props> {
        self.0.props.borrow().clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }

    /// Hooks registered for `lifetime`.
    pub fn hook_count(&self, lifetime: Lifetime) -> usize {
        self.0.hooks.count(lifetime)
    }

    /// Patches pushed to the host so far.
    pub fn push_count(&self) -> usize {
        self.0.renderer.borrow().push_count()
    }
}

impl InstanceInner {
    fn misuse(&self, operation: &str, reason: &str) -> BridgeError {
        let error = BridgeError::misuse(operation, reason);
        handle_error(&error, ErrorKind::LifecycleHook, Some(&self.label));
        error
    }

    /// Full push of every binding that normalizes. Failing bindings are
    /// reported and stay out of the baseline.
    fn first_push(&self, container: &Reactive) -> Result<(), BridgeError> {
        let mut baseline = IndexMap::new();
        for (name, result) in normalize_each(container) {
            match result {
                Ok(value) => {
                    baseline.insert(name, value);
                }
                Err(error) => {
                    handle_error(&BridgeError::from(error), ErrorKind::RenderFunction, Some(&self.label));
                }
            }
        }
        let pushed = self.renderer.borrow_mut().render(&PlainValue::Object(baseline));
        if let Err(error) = &pushed {
            handle_error(error, ErrorKind::RenderFunction, Some(&self.label));
        }
        pushed.map(|_| ())
    }

    /// Body of the binding watcher.
    fn flush(&self) -> Result<(), BridgeError> {
        if self.unmounted.get() {
            tracing::trace!(instance = %self.label, "stale flush skipped");
            return Ok(());
        }
        let Some(container) = self.bindings.borrow().clone() else {
            return Ok(());
        };
        let Ok(mut renderer) = self.renderer.try_borrow_mut() else {
            tracing::warn!(instance = %self.label, "re-entrant flush skipped");
            return Ok(());
        };

        self.state.set(LifecycleState::Flushing);
        let result = normalize_bindings(&container)
            .map_err(BridgeError::from)
            .and_then(|snapshot| renderer.render(&snapshot));
        drop(renderer);
        self.state.set(LifecycleState::Active);

        match result {
            Ok(pushed) => {
                tracing::trace!(instance = %self.label, pushed, "flush done");
            }
            Err(error) => handle_error(&error, ErrorKind::RenderFunction, Some(&self.label)),
        }
        Ok(())
    }

    fn teardown(&self, args: &[Value]) -> Value {
        if self.state.get() == LifecycleState::Detached {
            return Value::Undefined;
        }
        let value = self.hooks.run(Lifetime::Detached, args, &self.label);
        self.unmounted.set(true);
        self.scope.stop();
        self.watcher.borrow_mut().take();
        self.hooks.clear();
        self.state.set(LifecycleState::Detached);
        tracing::debug!(instance = %self.label, "instance detached");
        value
    }
}

fn flush_weak(inner: &Weak<InstanceInner>) -> Result<(), BridgeError> {
    match inner.upgrade() {
        Some(inner) => inner.flush(),
        None => Ok(()),
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("label", &self.0.label)
            .field("kind", &self.0.definition.kind())
            .field("state", &self.0.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorReport, set_error_handler, take_error_handler};
    use crate::instance::{Bindings, MemoryHost};
    use crate::reactive::{Opaque, Ref};
    use crate::scheduler::tick;
    use crate::snapshot::NormalizeError;
    use crate::watch::{WatchSource, watch};
    use serde_json::json;

    fn plain(value: serde_json::Value) -> PlainValue {
        PlainValue::from(value)
    }

    fn collect_reports() -> Rc<RefCell<Vec<ErrorReport>>> {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        set_error_handler(move |report| sink.borrow_mut().push(report.clone()));
        reports
    }

    #[test]
    fn test_attach_pushes_first_snapshot_and_binds_methods() {
        let host = Rc::new(MemoryHost::new("pages/index"));
        let count = Ref::new(1);
        let count_in = count.clone();
        let definition = Definition::page("index", move |_, _| {
            let counter = count_in.clone();
            Ok(Bindings::new()
                .with("count", count_in.clone())
                .with("user", json!({ "name": "Tom" }))
                .method("increment", move |_| {
                    counter.update(|n| Value::from(n.as_f64().unwrap_or_default() + 1.0));
                    Value::Undefined
                }))
        });
        let instance = Instance::new(definition, host.clone());
        assert_eq!(instance.state(), LifecycleState::Created);

        instance.attach().unwrap();
        assert_eq!(instance.state(), LifecycleState::Active);
        assert_eq!(host.data(), plain(json!({ "count": 1, "user": { "name": "Tom" } })));
        assert!(host.has_method("increment"));

        host.call("increment", &[]);
        tick();
        assert_eq!(host.last_patch().unwrap().to_json(), json!({ "count": 2 }));
        assert_eq!(instance.snapshot(), Some(plain(json!({ "count": 2, "user": { "name": "Tom" } }))));
        assert_eq!(instance.push_count(), 2);
        instance.detach();
    }

    #[test]
    fn test_attach_twice_is_misuse() {
        let reports = collect_reports();
        let host = Rc::new(MemoryHost::new("c"));
        let instance = Instance::new(Definition::component("c", |_, _| Ok(Bindings::new())), host);
        instance.attach().unwrap();

        let err = instance.attach().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "`attach` called on an instance that is already attached");
        assert_eq!(reports.borrow().len(), 1);
        take_error_handler();
    }

    #[test]
    fn test_setup_error_is_reported_and_returned() {
        let reports = collect_reports();
        let host = Rc::new(MemoryHost::new("c"));
        let instance = Instance::new(
            Definition::component("c", |_, _| Err(BridgeError::callback("setup failed"))),
            host.clone(),
        );
        assert_eq!(instance.attach(), Err(BridgeError::callback("setup failed")));
        assert_eq!(reports.borrow()[0].kind, ErrorKind::SetupFunction);
        assert_eq!(host.patch_count(), 0);
        take_error_handler();
    }

    #[test]
    fn test_bad_binding_left_out_of_first_push() {
        let reports = collect_reports();
        let host = Rc::new(MemoryHost::new("pages/index"));
        let definition = Definition::page("index", |_, _| {
            Ok(Bindings::new()
                .with("ok", 1)
                .with("handle", Opaque::new("Symbol")))
        });
        let instance = Instance::new(definition, host.clone());
        instance.attach().unwrap();

        assert_eq!(host.data(), plain(json!({ "ok": 1 })));
        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::RenderFunction);
        assert_eq!(
            reports[0].error,
            BridgeError::Normalize(NormalizeError {
                binding: "handle".into(),
                path: "handle".into(),
                type_name: "Symbol".into(),
            })
        );
        drop(reports);
        take_error_handler();
    }

    #[test]
    fn test_hooks_and_trigger() {
        let host = Rc::new(MemoryHost::new("pages/detail"));
        let shown = Rc::new(Cell::new(0));
        let shown_in = shown.clone();
        let definition = Definition::page("detail", move |_, ctx| {
            let shown = shown_in.clone();
            ctx.on_show(move || shown.set(shown.get() + 1))?;
            ctx.on(Lifetime::ShareAppMessage, |_| Ok(Value::from("share")))?;
            Ok(Bindings::new())
        });
        let instance = Instance::new(definition, host);
        instance.attach().unwrap();

        instance.trigger(Lifetime::Show, &[]);
        instance.trigger(Lifetime::Show, &[]);
        assert_eq!(shown.get(), 2);
        assert_eq!(instance.trigger(Lifetime::ShareAppMessage, &[]), Value::from("share"));

        instance.trigger(Lifetime::Detached, &[]);
        assert!(instance.is_unmounted());
        instance.trigger(Lifetime::Show, &[]);
        assert_eq!(shown.get(), 2);
    }

    #[test]
    fn test_property_updates_reach_setup_watchers() {
        let host = Rc::new(MemoryHost::new("components/title").with_properties(json!({ "title": "a" })));
        let definition = Definition::component("title", |props, _| {
            let label = Ref::new(props.get("title").unwrap_or_default());
            let (props, target) = (props.clone(), label.clone());
            watch(
                WatchSource::getter(move || props.get("title").unwrap_or_default()),
                move |new, _, _| {
                    target.set(new.clone());
                    Ok(())
                },
                WatchOptions::default(),
            );
            Ok(Bindings::new().with("label", label))
        })
        .properties(["title"]);
        let instance = Instance::new(definition, host.clone());
        instance.attach().unwrap();
        assert_eq!(host.data(), plain(json!({ "label": "a" })));

        assert!(instance.set_property("title", "b"));
        assert!(!instance.set_property("other", "x"));
        tick();
        assert_eq!(host.data(), plain(json!({ "label": "b" })));
        instance.detach();
    }

    #[test]
    fn test_resync_pushes_full_snapshot() {
        let host = Rc::new(MemoryHost::new("c"));
        let instance = Instance::new(
            Definition::component("c", |_, _| Ok(Bindings::new().with("a", 1).with("b", 2))),
            host.clone(),
        );
        assert!(instance.resync().is_err());
        instance.attach().unwrap();
        instance.resync().unwrap();
        assert_eq!(host.patch_count(), 2);
        assert_eq!(host.last_patch().unwrap().len(), 2);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let host = Rc::new(MemoryHost::new("c"));
        let detached = Rc::new(Cell::new(0));
        let detached_in = detached.clone();
        let instance = Instance::new(
            Definition::component("c", move |_, ctx| {
                let detached = detached_in.clone();
                ctx.on_detached(move || detached.set(detached.get() + 1))?;
                Ok(Bindings::new())
            }),
            host,
        );
        instance.attach().unwrap();
        instance.detach();
        instance.detach();
        assert_eq!(detached.get(), 1);
        assert_eq!(instance.state(), LifecycleState::Detached);
        assert!(instance.attach().is_err());
    }
}
