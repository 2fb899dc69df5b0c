//! Scheduler - microtask primitive plus the pre/post/sync job queues.

mod microtask;
#[allow(clippy::module_inception)]
mod scheduler;

pub use microtask::{has_pending_microtasks, queue_microtask, tick};
pub use scheduler::{FlushMode, HostAck, Job, JobFlags, JobId, Scheduler};
