//! Reactive effects - the run/stop half of the reactive capability.
//!
//! A [`ReactiveEffect`] is a spark-signals `effect` whose body runs a getter
//! while collecting the [`Dep`]s it reads. When one of them changes, the body
//! either re-runs the getter or, if the effect was created with a scheduler
//! hook, keeps its subscriptions and hands control to the hook. Watchers use
//! the hook to route re-runs into the job scheduler; the job then calls
//! [`run`](ReactiveEffect::run), which pokes the effect's private run signal
//! so spark re-executes the body and the getter collects afresh.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use spark_signals::{Signal, effect, flush_sync, signal};

use super::scope;
use super::tracking::{BodyGuard, CollectGuard, Dep, in_effect_body, next_id, untracked};
use super::value::Value;

/// Hook called on trigger instead of re-running the effect.
pub type EffectScheduler = Rc<dyn Fn()>;

type Getter = Box<dyn FnMut() -> Value>;

pub(crate) struct EffectInner {
    pub(crate) id: u64,
    getter: RefCell<Option<Getter>>,
    scheduler: RefCell<Option<EffectScheduler>>,
    /// Slots read on the last collection, with the version seen at its end.
    deps: RefCell<Vec<(Dep, u64)>>,
    pub(crate) active: Cell<bool>,
    pub(crate) running: Cell<bool>,
    /// The next body execution collects instead of consulting the hook.
    armed: Cell<bool>,
    in_body: Cell<bool>,
    run_signal: Signal<u64>,
    pokes: Cell<u64>,
    runs: Cell<u64>,
    last: RefCell<Value>,
    stop_spark: RefCell<Option<Box<dyn FnOnce()>>>,
    on_stop: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl EffectInner {
    pub(crate) fn add_dep(&self, dep: Dep) {
        let mut deps = self.deps.borrow_mut();
        if !deps.iter().any(|(known, _)| known.id() == dep.id()) {
            deps.push((dep, 0));
        }
    }

    fn cleanup_deps(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for (dep, _) in deps {
            dep.unsubscribe(self.id);
        }
    }

    fn seal_deps(&self) {
        for (dep, seen) in self.deps.borrow_mut().iter_mut() {
            *seen = dep.version();
        }
    }

    /// Whether a slot read last time moved since that collection ended.
    fn is_dirty(&self) -> bool {
        self.deps
            .borrow()
            .iter()
            .any(|(dep, seen)| dep.version() != *seen)
    }

    fn retain_deps(&self) {
        let deps: Vec<Dep> = self.deps.borrow().iter().map(|(dep, _)| dep.clone()).collect();
        for dep in deps {
            dep.retain();
        }
    }

    /// Body of the spark effect.
    fn body(self: &Rc<Self>) {
        let _ = self.run_signal.get();
        if !self.active.get() || self.running.get() {
            return;
        }
        let _body = BodyGuard::enter();

        if self.armed.replace(false) {
            self.collect();
            return;
        }
        // Writes made during the last collection are not changes.
        if !self.is_dirty() {
            self.retain_deps();
            return;
        }

        let scheduler = self.scheduler.borrow().clone();
        match scheduler {
            Some(scheduler) => {
                self.retain_deps();
                self.seal_deps();
                self.in_body.set(true);
                untracked(|| scheduler());
                self.in_body.set(false);
            }
            None => self.collect(),
        }
    }

    /// Run the getter with this effect collecting.
    fn collect(self: &Rc<Self>) {
        self.cleanup_deps();
        let value = {
            let _collect = CollectGuard::enter(self.clone());
            self.call_getter()
        };
        self.seal_deps();
        *self.last.borrow_mut() = value;
        self.runs.set(self.runs.get() + 1);

        // Stopped from inside its own getter: release the closure now.
        if !self.active.get() {
            self.cleanup_deps();
            if let Ok(mut getter) = self.getter.try_borrow_mut() {
                getter.take();
            }
        }
    }

    fn call_getter(&self) -> Value {
        // A getter that is already executing cannot be re-entered.
        let Ok(mut slot) = self.getter.try_borrow_mut() else {
            return Value::Undefined;
        };
        match slot.as_mut() {
            Some(getter) => getter(),
            None => Value::Undefined,
        }
    }

    fn stop(&self) {
        if !self.active.replace(false) {
            return;
        }
        self.cleanup_deps();
        let stop_spark = self.stop_spark.borrow_mut().take();
        if let Some(stop) = stop_spark {
            stop();
        }

        let callbacks = std::mem::take(&mut *self.on_stop.borrow_mut());
        for callback in callbacks {
            callback();
        }

        // Dropping the closures breaks effect <-> owner reference cycles.
        self.scheduler.borrow_mut().take();
        if let Ok(mut getter) = self.getter.try_borrow_mut() {
            getter.take();
        }
    }
}

/// A tracked computation running on a spark-signals effect.
#[derive(Clone)]
pub struct ReactiveEffect(pub(crate) Rc<EffectInner>);

impl ReactiveEffect {
    /// Create an effect owned by the currently active scope, if any.
    ///
    /// The getter does not run until [`run`](Self::run) is called.
    pub fn new(getter: impl FnMut() -> Value + 'static, scheduler: Option<EffectScheduler>) -> Self {
        let effect = Self(Rc::new(EffectInner {
            id: next_id(),
            getter: RefCell::new(Some(Box::new(getter))),
            scheduler: RefCell::new(scheduler),
            deps: RefCell::new(Vec::new()),
            active: Cell::new(true),
            running: Cell::new(false),
            armed: Cell::new(false),
            in_body: Cell::new(false),
            run_signal: signal(0),
            pokes: Cell::new(0),
            runs: Cell::new(0),
            last: RefCell::new(Value::Undefined),
            stop_spark: RefCell::new(None),
            on_stop: RefCell::new(Vec::new()),
        }));
        scope::record_effect(&effect);
        effect
    }

    /// Run the getter, re-collecting dependencies.
    ///
    /// A stopped effect still evaluates its getter (if it has one left) but
    /// tracks nothing.
    pub fn run(&self) -> Value {
        let inner = &self.0;
        if !inner.active.get() {
            return untracked(|| inner.call_getter());
        }

        // Called from our own hook: the body is live, collect in place.
        if inner.in_body.get() {
            inner.collect();
            return inner.last.borrow().clone();
        }

        inner.armed.set(true);
        if inner.stop_spark.borrow().is_none() {
            let weak: Weak<EffectInner> = Rc::downgrade(inner);
            let stop = effect(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.body();
                }
            });
            if inner.active.get() {
                *inner.stop_spark.borrow_mut() = Some(Box::new(stop));
            } else {
                // Stopped during its first run.
                stop();
            }
        } else {
            let next = inner.pokes.get() + 1;
            inner.pokes.set(next);
            inner.run_signal.set(next);
        }
        if inner.armed.get() && !in_effect_body() {
            flush_sync();
        }

        // Spark deferred the body (we are inside another effect). Produce the
        // value now; the pending body still collects when it runs.
        if inner.armed.get() {
            return untracked(|| inner.call_getter());
        }
        inner.last.borrow().clone()
    }

    /// Detach from every dependency. Terminal and idempotent.
    pub fn stop(&self) {
        self.0.stop();
    }

    /// Register a callback for when the effect stops.
    pub fn on_stop(&self, callback: impl FnOnce() + 'static) {
        if self.0.active.get() {
            self.0.on_stop.borrow_mut().push(Box::new(callback));
        } else {
            callback();
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn is_running(&self) -> bool {
        self.0.running.get()
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Completed getter runs.
    pub fn run_count(&self) -> u64 {
        self.0.runs.get()
    }

    /// Number of sources this effect is currently subscribed to.
    pub fn dep_count(&self) -> usize {
        self.0.deps.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.0.id)
            .field("active", &self.0.active.get())
            .field("deps", &self.dep_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
