//! Watchers - reactive effects whose re-runs go through the job scheduler.
//!
//! # Pattern
//!
//! ```ignore
//! let count = Ref::new(0);
//! let handle = watch(count.clone(), |new, old, _| {
//!     tracing::info!(?new, ?old, "count changed");
//!     Ok(())
//! }, WatchOptions::default());
//!
//! count.set(1);   // queued on the pre queue
//! tick();         // callback runs once
//! handle.stop();
//! ```
//!
//! # Invariants
//!
//! 1. Mutations between two flushes run the callback at most once.
//! 2. A stopped watcher never runs again; its pending job is cancelled.
//! 3. Cleanups registered through [`OnCleanup`] run before the next callback
//!    and when the watcher stops.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, ErrorKind, handle_error};
use crate::reactive::{ReactiveEffect, Reactive, Ref, Value, WeakScope, current_scope};
use crate::scheduler::{FlushMode, Job, Scheduler};

// =============================================================================
// Sources & options
// =============================================================================

/// Something that can be watched.
#[derive(Clone)]
pub enum WatchSource {
    Ref(Ref),
    Reactive(Reactive),
    Getter(Rc<dyn Fn() -> Value>),
    Multi(Vec<WatchSource>),
    /// Rejected at registration; carries the offending type name.
    Invalid(String),
}

impl WatchSource {
    pub fn getter(f: impl Fn() -> Value + 'static) -> Self {
        Self::Getter(Rc::new(f))
    }

    /// Classify a value: refs, reactive containers, callables, and arrays of
    /// these are watchable; anything else is `Invalid`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Ref(r) => Self::Ref(r.clone()),
            Value::Reactive(r) => Self::Reactive(r.clone()),
            Value::Function(f) => {
                let f = f.clone();
                Self::getter(move || f.call(&[]))
            }
            Value::Array(items) => Self::Multi(items.iter().map(Self::from_value).collect()),
            other => Self::Invalid(other.type_name().to_string()),
        }
    }

    /// Type name of the first invalid part, if any.
    fn invalid_type(&self) -> Option<&str> {
        match self {
            Self::Invalid(type_name) => Some(type_name),
            Self::Multi(sources) => sources.iter().find_map(Self::invalid_type),
            _ => None,
        }
    }

    fn forces_trigger(&self) -> bool {
        match self {
            Self::Ref(r) => r.is_shallow(),
            Self::Multi(sources) => sources
                .iter()
                .any(|s| matches!(s, Self::Reactive(_)) || s.forces_trigger()),
            _ => false,
        }
    }

    /// Read the source, tracking whatever it touches.
    fn read(&self) -> Value {
        match self {
            Self::Ref(r) => r.get(),
            Self::Reactive(r) => traverse(&Value::Reactive(r.clone())),
            Self::Getter(f) => f(),
            Self::Multi(sources) => Value::Array(sources.iter().map(Self::read).collect()),
            Self::Invalid(_) => Value::Undefined,
        }
    }
}

impl From<Ref> for WatchSource {
    fn from(value: Ref) -> Self {
        Self::Ref(value)
    }
}

impl From<Reactive> for WatchSource {
    fn from(value: Reactive) -> Self {
        Self::Reactive(value)
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(value: Vec<WatchSource>) -> Self {
        Self::Multi(value)
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ref(r) => write!(f, "WatchSource::Ref({r:?})"),
            Self::Reactive(r) => write!(f, "WatchSource::Reactive({r:?})"),
            Self::Getter(_) => f.write_str("WatchSource::Getter"),
            Self::Multi(sources) => f.debug_tuple("WatchSource::Multi").field(sources).finish(),
            Self::Invalid(type_name) => write!(f, "WatchSource::Invalid({type_name})"),
        }
    }
}

/// How a watcher runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Run the callback once right away.
    pub immediate: bool,
    /// Track everything reachable from the source.
    pub deep: bool,
    pub flush: FlushMode,
    /// Host instance errors are attributed to.
    #[serde(skip)]
    pub instance: Option<String>,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }

    pub fn instance(mut self, label: impl Into<String>) -> Self {
        self.instance = Some(label.into());
        self
    }
}

// =============================================================================
// Cleanup registration
// =============================================================================

/// Collects cleanup callbacks registered from a watcher body.
#[derive(Default)]
pub struct OnCleanup {
    cleanups: Vec<Box<dyn FnOnce()>>,
}

impl OnCleanup {
    /// Run `f` before the next callback and when the watcher stops.
    pub fn register(&mut self, f: impl FnOnce() + 'static) {
        self.cleanups.push(Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty()
    }

    fn absorb(&mut self, other: OnCleanup) {
        self.cleanups.extend(other.cleanups);
    }

    fn run_all(self, instance: Option<&str>) {
        for cleanup in self.cleanups {
            if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                let error = BridgeError::JobPanicked {
                    job: "cleanup".to_string(),
                    message: "watcher cleanup panicked".to_string(),
                };
                handle_error(&error, ErrorKind::WatchCleanup, instance);
            }
        }
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.cleanups.len())
            .finish()
    }
}

// =============================================================================
// Watcher state
// =============================================================================

type WatchCallback = Box<dyn FnMut(&Value, &Value, &mut OnCleanup) -> Result<(), BridgeError>>;
type EffectBody = Box<dyn FnMut(&mut OnCleanup) -> Result<(), BridgeError>>;

struct WatchInner {
    effect: RefCell<Option<ReactiveEffect>>,
    job: RefCell<Option<Job>>,
    /// `None` for watch effects; the effect itself is the body.
    callback: RefCell<Option<WatchCallback>>,
    old: RefCell<Value>,
    cleanup: RefCell<OnCleanup>,
    /// Error raised by a watch-effect body during its last run.
    body_error: RefCell<Option<BridgeError>>,
    deep: bool,
    force_trigger: bool,
    first_run: Cell<bool>,
    instance: Option<String>,
}

impl WatchInner {
    fn new(options: &WatchOptions, force_trigger: bool) -> Rc<Self> {
        Rc::new(Self {
            effect: RefCell::new(None),
            job: RefCell::new(None),
            callback: RefCell::new(None),
            old: RefCell::new(Value::Undefined),
            cleanup: RefCell::new(OnCleanup::default()),
            body_error: RefCell::new(None),
            deep: options.deep,
            force_trigger,
            first_run: Cell::new(options.immediate),
            instance: options.instance.clone(),
        })
    }

    fn effect(&self) -> Option<ReactiveEffect> {
        self.effect.borrow().clone()
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanup.borrow_mut());
        cleanups.run_all(self.instance.as_deref());
    }

    /// Job body of a watcher with a callback.
    fn run_callback(&self) -> Result<(), BridgeError> {
        let Some(effect) = self.effect() else {
            return Ok(());
        };
        if !effect.is_active() {
            return Ok(());
        }

        let new = effect.run();
        let first = self.first_run.replace(false);
        let changed = !Value::same_value(&new, &self.old.borrow());
        if !(first || self.deep || self.force_trigger || changed) {
            return Ok(());
        }

        self.run_cleanups();
        let old = self.old.replace(new.clone());
        let mut on_cleanup = OnCleanup::default();
        let result = {
            let Ok(mut slot) = self.callback.try_borrow_mut() else {
                return Ok(());
            };
            match slot.as_mut() {
                Some(callback) => callback(&new, &old, &mut on_cleanup),
                None => Ok(()),
            }
        };

        if effect.is_active() {
            self.cleanup.borrow_mut().absorb(on_cleanup);
        } else {
            // Stopped from inside the callback.
            self.callback.borrow_mut().take();
            on_cleanup.run_all(self.instance.as_deref());
        }
        result
    }

    /// Job body of a watch effect.
    fn run_effect(&self) -> Result<(), BridgeError> {
        let Some(effect) = self.effect() else {
            return Ok(());
        };
        if !effect.is_active() {
            return Ok(());
        }
        self.run_cleanups();
        effect.run();
        match self.body_error.borrow_mut().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn on_effect_stop(&self, scheduler: &Scheduler) {
        if let Some(job) = self.job.borrow().clone() {
            scheduler.invalidate_job(&job);
            job.dispose();
        }
        if let Ok(mut callback) = self.callback.try_borrow_mut() {
            callback.take();
        }
        self.run_cleanups();
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Controls one watcher. Dropping the handle does not stop the watcher; its
/// owning scope (or an explicit [`stop`](Self::stop)) does.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Rc<WatchInner>,
    scope: Option<WeakScope>,
}

impl WatchHandle {
    fn inert(options: &WatchOptions) -> Self {
        Self {
            inner: WatchInner::new(options, false),
            scope: None,
        }
    }

    /// Stop the watcher, cancel its pending job and detach it from its
    /// owning scope. Idempotent.
    pub fn stop(&self) {
        let Some(effect) = self.inner.effect() else {
            return;
        };
        effect.stop();
        if let Some(scope) = self.scope.as_ref().and_then(WeakScope::upgrade) {
            scope.forget(&effect);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect().is_some_and(|effect| effect.is_active())
    }

    /// The scheduler job driving this watcher.
    pub fn job(&self) -> Option<Job> {
        self.inner.job.borrow().clone()
    }

    /// The underlying effect.
    pub fn effect(&self) -> Option<ReactiveEffect> {
        self.inner.effect()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Watch `source` on the thread's scheduler.
pub fn watch(
    source: impl Into<WatchSource>,
    callback: impl FnMut(&Value, &Value, &mut OnCleanup) -> Result<(), BridgeError> + 'static,
    options: WatchOptions,
) -> WatchHandle {
    watch_on(&Scheduler::current(), source, callback, options)
}

/// Watch `source`, queueing re-runs on `scheduler`.
pub fn watch_on(
    scheduler: &Scheduler,
    source: impl Into<WatchSource>,
    callback: impl FnMut(&Value, &Value, &mut OnCleanup) -> Result<(), BridgeError> + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let source = source.into();
    if let Some(type_name) = source.invalid_type() {
        report_invalid(type_name, &options);
        return WatchHandle::inert(&options);
    }

    // Reactive sources are always deep.
    let deep = options.deep || matches!(source, WatchSource::Reactive(_));
    let options = WatchOptions { deep, ..options };
    let inner = WatchInner::new(&options, source.forces_trigger());
    *inner.callback.borrow_mut() = Some(Box::new(callback));

    let getter = move || {
        let value = source.read();
        if deep { traverse(&value) } else { value }
    };
    let handle = register(scheduler, inner, getter, &options, "watch");
    let inner = &handle.inner;

    if options.immediate {
        if let Some(job) = handle.job() {
            scheduler.queue(&job, FlushMode::Sync);
        }
    } else if let Some(effect) = inner.effect() {
        let initial = catch_unwind(AssertUnwindSafe(|| effect.run()));
        match initial {
            Ok(value) => *inner.old.borrow_mut() = value,
            Err(_) => {
                let error = BridgeError::JobPanicked {
                    job: "watch".to_string(),
                    message: "watch getter panicked".to_string(),
                };
                handle_error(&error, ErrorKind::WatchGetter, inner.instance.as_deref());
            }
        }
    }
    handle
}

/// Run `body` now, and again whenever what it read changes (pre flush).
pub fn watch_effect(
    body: impl FnMut(&mut OnCleanup) -> Result<(), BridgeError> + 'static,
) -> WatchHandle {
    watch_effect_on(&Scheduler::current(), body, WatchOptions::default())
}

/// [`watch_effect`] flushed after host updates.
pub fn watch_post_effect(
    body: impl FnMut(&mut OnCleanup) -> Result<(), BridgeError> + 'static,
) -> WatchHandle {
    let options = WatchOptions::default().flush(FlushMode::Post);
    watch_effect_on(&Scheduler::current(), body, options)
}

/// [`watch_effect`] re-run synchronously on every change.
pub fn watch_sync_effect(
    body: impl FnMut(&mut OnCleanup) -> Result<(), BridgeError> + 'static,
) -> WatchHandle {
    let options = WatchOptions::default().flush(FlushMode::Sync);
    watch_effect_on(&Scheduler::current(), body, options)
}

/// Watch effect on an explicit scheduler. `immediate` and `deep` are ignored.
pub fn watch_effect_on(
    scheduler: &Scheduler,
    body: impl FnMut(&mut OnCleanup) -> Result<(), BridgeError> + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let inner = WatchInner::new(&options, false);
    let mut body: EffectBody = Box::new(body);
    let weak = Rc::downgrade(&inner);
    let getter = move || {
        let Some(inner) = weak.upgrade() else {
            return Value::Undefined;
        };
        let mut on_cleanup = OnCleanup::default();
        let result = body(&mut on_cleanup);
        inner.cleanup.borrow_mut().absorb(on_cleanup);
        if let Err(error) = result {
            *inner.body_error.borrow_mut() = Some(error);
        }
        Value::Undefined
    };
    let handle = register(scheduler, inner, getter, &options, "watch_effect");

    if let Some(job) = handle.job() {
        match options.flush {
            FlushMode::Post => scheduler.queue(&job, FlushMode::Post),
            FlushMode::Pre | FlushMode::Sync => scheduler.queue(&job, FlushMode::Sync),
        }
    }
    handle
}

/// Wire effect, job and stop hook together.
fn register(
    scheduler: &Scheduler,
    inner: Rc<WatchInner>,
    getter: impl FnMut() -> Value + 'static,
    options: &WatchOptions,
    label: &str,
) -> WatchHandle {
    let is_effect = inner.callback.borrow().is_none();
    let weak: Weak<WatchInner> = Rc::downgrade(&inner);
    let mut job = Job::new(label, ErrorKind::WatchCallback, move || match weak.upgrade() {
        Some(inner) if is_effect => inner.run_effect(),
        Some(inner) => inner.run_callback(),
        None => Ok(()),
    });
    // Watch callbacks may mutate their own source.
    if !is_effect {
        job = job.allow_recurse();
    }
    if let Some(instance) = &options.instance {
        job = job.with_instance(instance.clone());
    }
    *inner.job.borrow_mut() = Some(job.clone());

    let flush = options.flush;
    let trigger_scheduler = scheduler.clone();
    let owner = inner.clone();
    let effect = ReactiveEffect::new(
        getter,
        Some(Rc::new(move || {
            // Keeps the watcher state alive for as long as the effect can fire.
            let _owner = &owner;
            trigger_scheduler.queue(&job, flush);
        })),
    );

    let stop_scheduler = scheduler.clone();
    let weak = Rc::downgrade(&inner);
    effect.on_stop(move || {
        if let Some(inner) = weak.upgrade() {
            inner.on_effect_stop(&stop_scheduler);
        }
    });
    *inner.effect.borrow_mut() = Some(effect);

    WatchHandle {
        inner,
        scope: current_scope().map(|scope| scope.downgrade()),
    }
}

fn report_invalid(type_name: &str, options: &WatchOptions) {
    tracing::warn!(source_type = type_name, "invalid watch source");
    let error = BridgeError::InvalidWatchSource {
        source_type: type_name.to_string(),
    };
    handle_error(&error, ErrorKind::WatchGetter, options.instance.as_deref());
}

// =============================================================================
// Deep traversal
// =============================================================================

/// Deep-read everything reachable from `value`, tracking each read.
pub fn traverse(value: &Value) -> Value {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
    value.clone()
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Ref(r) => {
            if seen.insert(r.id()) {
                traverse_inner(&r.get(), seen);
            }
        }
        Value::Reactive(r) => {
            if !seen.insert(r.id()) {
                return;
            }
            if r.is_array() {
                for index in 0..r.len() {
                    traverse_inner(&r.at(index), seen);
                }
            } else {
                for key in r.keys() {
                    traverse_inner(&r.get(&key), seen);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| traverse_inner(item, seen)),
        Value::Object(map) => map.values().for_each(|member| traverse_inner(member, seen)),
        _ => {}
    }
}
