//! Effect scopes - ownership groups for effects.
//!
//! # Pattern
//!
//! 1. Create an [`EffectScope`] per owner (one per host instance)
//! 2. Run setup logic inside `scope.run()`; it runs inside a spark-signals
//!    `effect_scope`, and every [`ReactiveEffect`] created there is also
//!    recorded on the scope
//! 3. Register extra teardown with [`on_scope_dispose`]
//! 4. `scope.stop()` stops every owned effect, then the spark scope
//!
//! Stopping is terminal: a stopped scope refuses to run again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::ReactiveEffect;
use super::tracking::next_id;

thread_local! {
    /// Scopes entered via `run()`, innermost last.
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

/// Handle on the spark-signals scope behind an [`EffectScope`].
struct SparkScope {
    run: Box<dyn Fn(Box<dyn FnOnce()>)>,
    stop: Box<dyn Fn()>,
}

impl SparkScope {
    fn new() -> Self {
        let scope = Rc::new(spark_signals::effect_scope(false));
        let run_scope = scope.clone();
        Self {
            run: Box::new(move |f| {
                let _ = run_scope.run(f);
            }),
            stop: Box::new(move || {
                scope.stop();
            }),
        }
    }
}

struct ScopeInner {
    id: u64,
    active: Cell<bool>,
    spark: SparkScope,
    effects: RefCell<Vec<ReactiveEffect>>,
    children: RefCell<Vec<EffectScope>>,
}

/// Ownership boundary for a group of reactive subscriptions.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

/// Non-owning reference to a scope.
#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<EffectScope> {
        self.0.upgrade().map(EffectScope)
    }
}

/// Create a scope nested in the currently active one.
pub fn effect_scope() -> EffectScope {
    EffectScope::new()
}

impl EffectScope {
    /// Create a scope. The active scope, if any, adopts it as a child and
    /// stops it along with itself.
    pub fn new() -> Self {
        let scope = Self(Rc::new(ScopeInner {
            id: next_id(),
            active: Cell::new(true),
            spark: SparkScope::new(),
            effects: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
        }));
        if let Some(parent) = current_scope() {
            parent.0.children.borrow_mut().push(scope.clone());
        }
        scope
    }

    /// Run `f` with this scope active. Returns `None` if the scope was stopped.
    pub fn run<R: 'static>(&self, f: impl FnOnce() -> R + 'static) -> Option<R> {
        if !self.is_active() {
            tracing::warn!(scope = self.0.id, "cannot run an inactive effect scope");
            return None;
        }
        let result: Rc<RefCell<Option<R>>> = Rc::new(RefCell::new(None));
        let slot = result.clone();
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let _off = ScopeGuard(self.clone());
        (self.0.spark.run)(Box::new(move || {
            *slot.borrow_mut() = Some(f());
        }));
        result.borrow_mut().take()
    }

    fn off(&self) {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().rposition(|scope| scope.ptr_eq(self)) {
                stack.remove(position);
            }
        });
    }

    /// Stop every owned effect, run dispose callbacks, stop child scopes.
    ///
    /// Idempotent; a stopped scope stays stopped.
    pub fn stop(&self) {
        if !self.0.active.replace(false) {
            return;
        }
        let effects = std::mem::take(&mut *self.0.effects.borrow_mut());
        for effect in effects {
            effect.stop();
        }
        (self.0.spark.stop)();
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children {
            child.stop();
        }
        tracing::trace!(scope = self.0.id, "effect scope stopped");
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Number of effects currently owned.
    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.0))
    }

    /// Drop ownership of a stopped effect.
    pub(crate) fn forget(&self, effect: &ReactiveEffect) {
        self.0
            .effects
            .borrow_mut()
            .retain(|owned| !owned.ptr_eq(effect));
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.0.id)
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .finish()
    }
}

struct ScopeGuard(EffectScope);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.off();
    }
}

/// The innermost active scope.
pub fn current_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Register `f` to run when the active scope stops.
///
/// Returns `false` (and warns) when no scope is active.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) -> bool {
    match current_scope() {
        Some(scope) if scope.is_active() => {
            spark_signals::on_scope_dispose(f);
            true
        }
        _ => {
            tracing::warn!("on_scope_dispose() called when there is no active effect scope");
            false
        }
    }
}

pub(crate) fn record_effect(effect: &ReactiveEffect) {
    if let Some(scope) = current_scope() {
        if scope.is_active() {
            scope.0.effects.borrow_mut().push(effect.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
