//! Reactive collaborator.
//!
//! A thin value-graph adapter over spark-signals:
//!
//! - [`Ref`] and [`Reactive`] - tracked sources; every trackable slot is a
//!   versioned `spark_signals::Signal`
//! - [`ReactiveEffect`] - a spark `effect` with an optional scheduler hook
//! - [`EffectScope`] - wraps a spark `effect_scope` and stops every effect
//!   it owns
//!
//! Everything is single-threaded, like spark-signals itself.
//!
//! # Example
//!
//! ```
//! use spark_bridge::reactive::{ReactiveEffect, Ref};
//!
//! let count = Ref::new(1);
//! let reader = count.clone();
//! let effect = ReactiveEffect::new(move || reader.get(), None);
//! effect.run();
//! assert_eq!(count.subscriber_count(), 1);
//! effect.stop();
//! assert_eq!(count.subscriber_count(), 0);
//! ```

mod effect;
mod object;
mod refs;
mod scope;
mod tracking;
mod value;

pub use effect::{EffectScheduler, ReactiveEffect};
pub use object::{Container, Reactive};
pub use refs::Ref;
pub use scope::{EffectScope, current_scope, effect_scope, on_scope_dispose};
pub use tracking::{is_tracking, pause_tracking, reset_tracking, untracked};
pub use value::{Callable, Opaque, Value, to_reactive};

pub(crate) use scope::WeakScope;

/// Wrap a plain mapping into a deep reactive container.
pub fn reactive(map: indexmap::IndexMap<String, Value>) -> Reactive {
    Reactive::from_object(map)
}
