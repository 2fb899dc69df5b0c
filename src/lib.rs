//! # spark-bridge
//!
//! Reactive-to-host synchronization engine.
//!
//! Binds fine-grained reactive state to a host UI runtime whose only write
//! primitive is "apply these path-keyed patches". Mutations are batched by a
//! job scheduler, reduced to minimal patches by a structural diff, and pushed
//! once per flush.
//!
//! ## Architecture
//!
//! ```text
//! setup -> Bindings -> Reactive container -> deep watcher -> Scheduler (pre/post/sync)
//!       -> normalize -> diff(previous, current) -> Host::apply_patch
//! ```
//!
//! ## Modules
//!
//! - [`reactive`] - Refs, reactive containers, effects and effect scopes
//! - [`scheduler`] - Microtask queue and the pre/post/sync job queues
//! - [`watch`] - Watchers and watch effects on top of the scheduler
//! - [`snapshot`] - Plain snapshots, normalization, patches and the diff
//! - [`renderer`] - Retained-snapshot renderer onto a host
//! - [`instance`] - Pages, components and the binding lifecycle
//! - [`config`] / [`error`] - Tunables and the error taxonomy

pub mod config;
pub mod error;
pub mod instance;
pub mod reactive;
pub mod renderer;
pub mod scheduler;
pub mod snapshot;
pub mod watch;

// Re-export commonly used items
pub use config::{BridgeConfig, RECURSION_LIMIT};

pub use error::{
    BridgeError, ErrorHandler, ErrorKind, ErrorReport, call_with_error_handling, handle_error,
    set_error_handler, take_error_handler,
};

pub use instance::{
    Bindings, Definition, Host, Instance, InstanceKind, LifecycleState, Lifetime, MemoryHost,
    Props, SetupContext,
};

pub use reactive::{
    Callable, EffectScope, Opaque, Reactive, ReactiveEffect, Ref, Value, effect_scope, reactive,
};

pub use renderer::PatchRenderer;

pub use scheduler::{FlushMode, HostAck, Job, Scheduler, queue_microtask, tick};

pub use snapshot::{NormalizeError, Patch, PatchError, PlainValue, diff, diff_bindings, normalize};

pub use watch::{
    OnCleanup, WatchHandle, WatchOptions, WatchSource, watch, watch_effect, watch_post_effect,
    watch_sync_effect,
};
