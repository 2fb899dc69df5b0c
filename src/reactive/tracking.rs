//! Dependency tracking - the track/trigger half of the reactive capability.
//!
//! A [`Dep`] is one trackable source slot (a ref's value, one key of a
//! reactive object, the iteration order of a container). Each slot is a
//! spark-signals `Signal<u64>` holding a version: reading a slot reads the
//! signal, so whatever spark effect is running subscribes to it, and writing
//! a slot bumps the version.
//!
//! Alongside spark's own subscriptions, every slot keeps a ledger of the
//! [`ReactiveEffect`](super::ReactiveEffect)s that read it during their last
//! run. The ledger backs `subscriber_count` and the "did anything I read
//! actually change" check effects make before re-running.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use spark_signals::{Signal, flush_sync, signal};

use super::effect::EffectInner;

// =============================================================================
// State
// =============================================================================

thread_local! {
    /// Effects currently collecting dependencies, innermost last.
    static EFFECT_STACK: RefCell<Vec<Rc<EffectInner>>> = const { RefCell::new(Vec::new()) };

    /// Saved tracking switches for pause/reset pairs.
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };

    /// Whether reads are currently recorded.
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };

    /// Depth of effect bodies on the stack.
    static BODY_DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Counter for effect, dep and container identities.
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

pub(crate) fn next_id() -> u64 {
    NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

// =============================================================================
// Dep
// =============================================================================

/// A trackable slot: a versioned signal plus the ledger of effects reading it.
#[derive(Clone)]
pub(crate) struct Dep(Rc<DepInner>);

struct DepInner {
    id: u64,
    version: Cell<u64>,
    signal: Signal<u64>,
    readers: RefCell<IndexMap<u64, Weak<EffectInner>>>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self(Rc::new(DepInner {
            id: next_id(),
            version: Cell::new(0),
            signal: signal(0),
            readers: RefCell::new(IndexMap::new()),
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id
    }

    pub(crate) fn version(&self) -> u64 {
        self.0.version.get()
    }

    /// Subscribe the running effect, if any.
    pub(crate) fn track(&self) {
        if !SHOULD_TRACK.with(Cell::get) {
            return;
        }
        let _ = self.0.signal.get();

        let Some(effect) = EFFECT_STACK.with(|stack| stack.borrow().last().cloned()) else {
            return;
        };
        if !effect.active.get() {
            return;
        }
        self.0
            .readers
            .borrow_mut()
            .entry(effect.id)
            .or_insert_with(|| Rc::downgrade(&effect));
        effect.add_dep(self.clone());
    }

    /// Re-read the signal so the running spark effect keeps this slot.
    pub(crate) fn retain(&self) {
        let _ = self.0.signal.get();
    }

    /// Bump the version; spark re-runs every effect that read the slot.
    pub(crate) fn trigger(&self) {
        let version = self.0.version.get() + 1;
        self.0.version.set(version);
        self.0.signal.set(version);
        if !in_effect_body() {
            flush_sync();
        }
    }

    pub(crate) fn unsubscribe(&self, effect_id: u64) {
        self.0.readers.borrow_mut().shift_remove(&effect_id);
    }

    /// Number of live effects that read this slot on their last run.
    pub(crate) fn subscriber_count(&self) -> usize {
        self.0
            .readers
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|effect| effect.active.get())
            .count()
    }
}

// =============================================================================
// Effect stack
// =============================================================================

/// Marks an effect as collecting for the lifetime of the guard.
///
/// Popping happens in `Drop` so a panicking getter cannot leave a stale
/// effect on the stack.
pub(crate) struct CollectGuard {
    effect: Rc<EffectInner>,
}

impl CollectGuard {
    pub(crate) fn enter(effect: Rc<EffectInner>) -> Self {
        effect.running.set(true);
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect.clone()));
        TRACK_STACK.with(|saved| saved.borrow_mut().push(SHOULD_TRACK.with(Cell::get)));
        SHOULD_TRACK.with(|track| track.set(true));
        Self { effect }
    }
}

impl Drop for CollectGuard {
    fn drop(&mut self) {
        EFFECT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        reset_tracking();
        self.effect.running.set(false);
    }
}

/// Held while a spark effect body of ours executes.
pub(crate) struct BodyGuard;

impl BodyGuard {
    pub(crate) fn enter() -> Self {
        BODY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        BODY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub(crate) fn in_effect_body() -> bool {
    BODY_DEPTH.with(Cell::get) > 0
}

// =============================================================================
// Tracking switch
// =============================================================================

/// Stop recording reads until the matching [`reset_tracking`].
pub fn pause_tracking() {
    TRACK_STACK.with(|saved| saved.borrow_mut().push(SHOULD_TRACK.with(Cell::get)));
    SHOULD_TRACK.with(|track| track.set(false));
}

/// Restore the tracking switch saved by the last pause.
pub fn reset_tracking() {
    let previous = TRACK_STACK.with(|saved| saved.borrow_mut().pop());
    SHOULD_TRACK.with(|track| track.set(previous.unwrap_or(true)));
}

struct ResetOnDrop;

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Run `f` without recording any reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    pause_tracking();
    let _reset = ResetOnDrop;
    f()
}

/// Whether a read right now would subscribe an effect.
pub fn is_tracking() -> bool {
    SHOULD_TRACK.with(Cell::get) && EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ReactiveEffect, Value};
    use spark_signals::effect;

    #[test]
    fn test_track_outside_effect_is_noop() {
        let dep = Dep::new();
        dep.track();
        assert_eq!(dep.subscriber_count(), 0);
        assert!(!is_tracking());
    }

    #[test]
    fn test_track_and_trigger() {
        let dep = Dep::new();
        let runs = Rc::new(Cell::new(0));

        let dep_in = dep.clone();
        let runs_in = runs.clone();
        let effect = ReactiveEffect::new(
            move || {
                runs_in.set(runs_in.get() + 1);
                dep_in.track();
                Value::Undefined
            },
            None,
        );
        effect.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(dep.subscriber_count(), 1);

        dep.trigger();
        assert_eq!(runs.get(), 2);
        assert_eq!(dep.version(), 1);

        effect.stop();
        assert_eq!(dep.subscriber_count(), 0);
        dep.trigger();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_plain_spark_effect_sees_triggers() {
        let dep = Dep::new();
        let runs = Rc::new(Cell::new(0));
        let (dep_in, runs_in) = (dep.clone(), runs.clone());
        let stop = effect(move || {
            dep_in.track();
            runs_in.set(runs_in.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        dep.trigger();
        assert_eq!(runs.get(), 2);
        // Not one of ours, so not in the ledger.
        assert_eq!(dep.subscriber_count(), 0);
        stop();
    }

    #[test]
    fn test_untracked_reads() {
        let dep = Dep::new();
        let dep_in = dep.clone();
        let effect = ReactiveEffect::new(
            move || {
                untracked(|| dep_in.track());
                Value::Undefined
            },
            None,
        );
        effect.run();
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn test_pause_and_reset_nest() {
        pause_tracking();
        pause_tracking();
        reset_tracking();
        assert!(!SHOULD_TRACK.with(Cell::get));
        reset_tracking();
        assert!(SHOULD_TRACK.with(Cell::get));
    }
}
