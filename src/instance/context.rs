//! The explicit context setup runs with.
//!
//! Hooks are registered through the context instead of through a global
//! "current instance". The context closes when setup returns; registering
//! afterwards is lifecycle misuse.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::definition::InstanceKind;
use super::hooks::{HookRegistry, Lifetime};
use crate::error::{BridgeError, ErrorKind, handle_error};
use crate::reactive::Value;
use crate::scheduler::Scheduler;

struct ContextInner {
    kind: InstanceKind,
    label: String,
    hooks: Rc<HookRegistry>,
    scheduler: Scheduler,
    open: Cell<bool>,
}

/// Setup context of one instance. Clones share the same context.
#[derive(Clone)]
pub struct SetupContext(Rc<ContextInner>);

impl SetupContext {
    pub(crate) fn new(
        kind: InstanceKind,
        label: &str,
        hooks: Rc<HookRegistry>,
        scheduler: Scheduler,
    ) -> Self {
        Self(Rc::new(ContextInner {
            kind,
            label: label.to_string(),
            hooks,
            scheduler,
            open: Cell::new(true),
        }))
    }

    pub(crate) fn close(&self) {
        self.0.open.set(false);
    }

    pub fn kind(&self) -> InstanceKind {
        self.0.kind
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Still inside setup.
    pub fn is_open(&self) -> bool {
        self.0.open.get()
    }

    /// Register `hook` for `lifetime`.
    pub fn on(
        &self,
        lifetime: Lifetime,
        hook: impl Fn(&[Value]) -> Result<Value, BridgeError> + 'static,
    ) -> Result<(), BridgeError> {
        if !self.is_open() {
            return Err(self.misuse(
                lifetime,
                "called outside of setup; there is no active instance".to_string(),
            ));
        }
        if !lifetime.available_on(self.0.kind) {
            return Err(self.misuse(lifetime, format!("is not available on a {}", self.0.kind)));
        }
        self.0.hooks.register(lifetime, Rc::new(hook));
        Ok(())
    }

    fn misuse(&self, lifetime: Lifetime, reason: String) -> BridgeError {
        let error = BridgeError::misuse(lifetime.hook_name(), reason);
        handle_error(&error, ErrorKind::LifecycleHook, Some(&self.0.label));
        error
    }

    pub fn on_ready(&self, hook: impl Fn() + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Ready, unit(hook))
    }

    pub fn on_show(&self, hook: impl Fn() + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Show, unit(hook))
    }

    pub fn on_hide(&self, hook: impl Fn() + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Hide, unit(hook))
    }

    pub fn on_detached(&self, hook: impl Fn() + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Detached, unit(hook))
    }

    /// Page only. Receives the page query.
    pub fn on_load(&self, hook: impl Fn(&[Value]) + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Load, move |args| {
            hook(args);
            Ok(Value::Undefined)
        })
    }

    /// Page only.
    pub fn on_unload(&self, hook: impl Fn() + 'static) -> Result<(), BridgeError> {
        self.on(Lifetime::Unload, unit(hook))
    }

    /// Run `f` once the pending host updates were applied.
    pub fn next_tick(&self, f: impl FnOnce() + 'static) {
        self.0.scheduler.next_tick(f);
    }
}

fn unit(hook: impl Fn() + 'static) -> impl Fn(&[Value]) -> Result<Value, BridgeError> + 'static {
    move |_| {
        hook();
        Ok(Value::Undefined)
    }
}

impl fmt::Debug for SetupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupContext")
            .field("kind", &self.0.kind)
            .field("label", &self.0.label)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{set_error_handler, take_error_handler};
    use std::cell::RefCell;

    fn context(kind: InstanceKind) -> (Rc<HookRegistry>, SetupContext) {
        let hooks = Rc::new(HookRegistry::new());
        let ctx = SetupContext::new(kind, "pages/index", hooks.clone(), Scheduler::new());
        (hooks, ctx)
    }

    #[test]
    fn test_registers_while_open() {
        let (hooks, ctx) = context(InstanceKind::Page);
        ctx.on_ready(|| {}).unwrap();
        ctx.on_load(|_| {}).unwrap();
        ctx.on(Lifetime::ShareAppMessage, |_| Ok(Value::from("title"))).unwrap();
        assert_eq!(hooks.count(Lifetime::Ready), 1);
        assert_eq!(hooks.count(Lifetime::Load), 1);
        assert_eq!(hooks.run(Lifetime::ShareAppMessage, &[], "p"), Value::from("title"));
    }

    #[test]
    fn test_misuse_after_close_and_on_wrong_kind() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        set_error_handler(move |report| sink.borrow_mut().push(report.clone()));

        let (hooks, ctx) = context(InstanceKind::Component);
        let err = ctx.on_unload(|| {}).unwrap_err();
        assert_eq!(
            err,
            BridgeError::misuse("onUnload", "is not available on a Component")
        );

        ctx.close();
        let err = ctx.on_show(|| {}).unwrap_err();
        assert!(err.to_string().starts_with("`onShow` called outside of setup"));
        assert_eq!(hooks.count(Lifetime::Show), 0);

        let reports = reports.borrow();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.kind == ErrorKind::LifecycleHook));
        assert_eq!(reports[1].instance.as_deref(), Some("pages/index"));
        drop(reports);
        take_error_handler();
    }
}
