//! Watch API - scheduled reactive callbacks and effects.

#[allow(clippy::module_inception)]
mod watch;

pub use watch::{
    OnCleanup, WatchHandle, WatchOptions, WatchSource, traverse, watch, watch_effect,
    watch_effect_on, watch_on, watch_post_effect, watch_sync_effect,
};
