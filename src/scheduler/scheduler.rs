//! Job scheduler - deduplicated, ordered, batched execution of reactive jobs.
//!
//! # Queues
//!
//! - **Sync** - runs at the point of call
//! - **Pre** - deduplicated set flushed on the next microtask
//! - **Post** - flushed after every pre pass, and only once the host has
//!   acknowledged every outstanding patch ([`HostAck`])
//!
//! Within a pass jobs run in enqueue order. Jobs queued while a pass runs go
//! into the next pass of the same flush.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::microtask::queue_microtask;
use crate::config::{BridgeConfig, RECURSION_LIMIT};
use crate::error::{BridgeError, ErrorKind, handle_error};

// =============================================================================
// Types
// =============================================================================

/// When a queued job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Batched, before the host update (default).
    #[default]
    Pre,
    /// Batched, after the host acknowledged pending patches.
    Post,
    /// Immediately, at the point of call.
    Sync,
}

bitflags! {
    /// Job state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct JobFlags: u8 {
        const QUEUED = 1 << 0;
        /// May re-queue itself while running.
        const ALLOW_RECURSE = 1 << 1;
        const RUNNING = 1 << 2;
        /// Never runs again.
        const DISPOSED = 1 << 3;
    }
}

/// Stable identity of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

thread_local! {
    static NEXT_JOB_ID: Cell<u64> = const { Cell::new(1) };
    static CURRENT: Scheduler = Scheduler::new();
}

type JobFn = Box<dyn FnMut() -> Result<(), BridgeError>>;

struct JobInner {
    id: JobId,
    label: String,
    kind: ErrorKind,
    instance: RefCell<Option<String>>,
    flags: Cell<JobFlags>,
    run: RefCell<Option<JobFn>>,
}

/// A zero-argument callback with a stable identity.
///
/// Cloning shares the identity; queueing a clone of a pending job is a no-op.
#[derive(Clone)]
pub struct Job(Rc<JobInner>);

impl Job {
    /// Create a job. Errors it returns are reported with `kind`.
    pub fn new(
        label: impl Into<String>,
        kind: ErrorKind,
        run: impl FnMut() -> Result<(), BridgeError> + 'static,
    ) -> Self {
        let id = NEXT_JOB_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            JobId(id)
        });
        Self(Rc::new(JobInner {
            id,
            label: label.into(),
            kind,
            instance: RefCell::new(None),
            flags: Cell::new(JobFlags::empty()),
            run: RefCell::new(Some(Box::new(run))),
        }))
    }

    /// Let the job re-queue itself while running.
    pub fn allow_recurse(self) -> Self {
        self.set_flag(JobFlags::ALLOW_RECURSE, true);
        self
    }

    /// Attribute reported errors to a host instance.
    pub fn with_instance(self, label: impl Into<String>) -> Self {
        *self.0.instance.borrow_mut() = Some(label.into());
        self
    }

    pub fn id(&self) -> JobId {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn instance(&self) -> Option<String> {
        self.0.instance.borrow().clone()
    }

    pub fn flags(&self) -> JobFlags {
        self.0.flags.get()
    }

    pub fn is_queued(&self) -> bool {
        self.flags().contains(JobFlags::QUEUED)
    }

    pub fn is_disposed(&self) -> bool {
        self.flags().contains(JobFlags::DISPOSED)
    }

    /// Mark the job dead and drop its closure.
    pub fn dispose(&self) {
        self.set_flag(JobFlags::DISPOSED, true);
        self.set_flag(JobFlags::QUEUED, false);
        if let Ok(mut run) = self.0.run.try_borrow_mut() {
            run.take();
        }
    }

    fn set_flag(&self, flag: JobFlags, on: bool) {
        let mut flags = self.0.flags.get();
        flags.set(flag, on);
        self.0.flags.set(flags);
    }

    fn call(&self) -> Result<(), BridgeError> {
        let Ok(mut slot) = self.0.run.try_borrow_mut() else {
            return Ok(());
        };
        match slot.as_mut() {
            Some(run) => run(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .field("flags", &self.flags())
            .finish()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct SchedulerInner {
    recursion_limit: usize,
    pre: RefCell<IndexMap<JobId, Job>>,
    post: RefCell<IndexMap<JobId, Job>>,
    /// A flush microtask is queued and has not started yet.
    flush_pending: Cell<bool>,
    flushing: Cell<bool>,
    /// Host patches pushed but not yet acknowledged.
    held_acks: Cell<usize>,
}

/// Handle to a job scheduler. Clones share the same queues.
#[derive(Clone)]
pub struct Scheduler(Rc<SchedulerInner>);

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_limit(RECURSION_LIMIT)
    }

    pub fn with_config(config: &BridgeConfig) -> Self {
        Self::with_limit(config.recursion_limit.max(1))
    }

    fn with_limit(recursion_limit: usize) -> Self {
        Self(Rc::new(SchedulerInner {
            recursion_limit,
            pre: RefCell::new(IndexMap::new()),
            post: RefCell::new(IndexMap::new()),
            flush_pending: Cell::new(false),
            flushing: Cell::new(false),
            held_acks: Cell::new(0),
        }))
    }

    /// The scheduler shared by everything on this thread.
    pub fn current() -> Self {
        CURRENT.with(Scheduler::clone)
    }

    pub fn recursion_limit(&self) -> usize {
        self.0.recursion_limit
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Queue `job` with the given timing.
    pub fn queue(&self, job: &Job, mode: FlushMode) {
        if job.is_disposed() {
            return;
        }
        match mode {
            FlushMode::Sync => self.run_sync(job),
            FlushMode::Pre => self.enqueue(&self.0.pre, job),
            FlushMode::Post => self.enqueue(&self.0.post, job),
        }
    }

    /// Queue on the pre queue.
    pub fn queue_job(&self, job: &Job) {
        self.queue(job, FlushMode::Pre);
    }

    /// Queue on the post queue.
    pub fn queue_post_flush_cb(&self, job: &Job) {
        self.queue(job, FlushMode::Post);
    }

    fn run_sync(&self, job: &Job) {
        if job.flags().contains(JobFlags::RUNNING) {
            // Re-entrant sync trigger; defer instead of recursing.
            if job.flags().contains(JobFlags::ALLOW_RECURSE) {
                self.enqueue(&self.0.pre, job);
            }
            return;
        }
        self.run_job(job);
    }

    fn enqueue(&self, queue: &RefCell<IndexMap<JobId, Job>>, job: &Job) {
        let flags = job.flags();
        if flags.contains(JobFlags::QUEUED) {
            return;
        }
        if flags.contains(JobFlags::RUNNING) && !flags.contains(JobFlags::ALLOW_RECURSE) {
            tracing::trace!(job = %job.id(), label = job.label(), "ignored self re-queue");
            return;
        }
        job.set_flag(JobFlags::QUEUED, true);
        queue.borrow_mut().insert(job.id(), job.clone());
        tracing::trace!(job = %job.id(), label = job.label(), "job queued");
        self.queue_flush();
    }

    fn queue_flush(&self) {
        if self.0.flushing.get() || self.0.flush_pending.get() {
            return;
        }
        self.0.flush_pending.set(true);
        let scheduler = self.clone();
        queue_microtask(move || scheduler.flush_jobs());
    }

    /// Remove a job from whichever queue holds it. Safe if it is not queued.
    pub fn invalidate_job(&self, job: &Job) {
        job.set_flag(JobFlags::QUEUED, false);
        self.0.pre.borrow_mut().shift_remove(&job.id());
        self.0.post.borrow_mut().shift_remove(&job.id());
    }

    /// Run `f` after the current flush and after the host acknowledged every
    /// pending patch.
    pub fn next_tick(&self, f: impl FnOnce() + 'static) {
        let mut f = Some(f);
        let job = Job::new("next_tick", ErrorKind::SchedulerFlush, move || {
            if let Some(f) = f.take() {
                f();
            }
            Ok(())
        });
        self.queue(&job, FlushMode::Post);
    }

    // =========================================================================
    // Host acknowledgement
    // =========================================================================

    /// Hold the post queue until the returned ack is released or dropped.
    pub fn hold_post_flush(&self) -> HostAck {
        self.0.held_acks.set(self.0.held_acks.get() + 1);
        HostAck {
            scheduler: self.clone(),
            released: Cell::new(false),
        }
    }

    fn release_ack(&self) {
        let held = self.0.held_acks.get().saturating_sub(1);
        self.0.held_acks.set(held);
        if held == 0 && !self.0.post.borrow().is_empty() {
            self.queue_flush();
        }
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Drain the queues: pre passes until empty, then post (unless held),
    /// repeating while either queue refills.
    pub fn flush_jobs(&self) {
        if self.0.flushing.get() {
            return;
        }
        self.0.flush_pending.set(false);
        self.0.flushing.set(true);
        tracing::trace!(pre = self.pending_pre(), post = self.pending_post(), "flush start");

        let mut runs: HashMap<JobId, usize> = HashMap::new();
        let mut dropped: HashSet<JobId> = HashSet::new();

        loop {
            loop {
                let pass = std::mem::take(&mut *self.0.pre.borrow_mut());
                if pass.is_empty() {
                    break;
                }
                self.run_pass(pass, &mut runs, &mut dropped);
            }

            if self.0.held_acks.get() > 0 || self.0.post.borrow().is_empty() {
                break;
            }
            let pass = std::mem::take(&mut *self.0.post.borrow_mut());
            self.run_pass(pass, &mut runs, &mut dropped);

            if self.0.pre.borrow().is_empty() && self.0.post.borrow().is_empty() {
                break;
            }
        }

        self.0.flushing.set(false);
        tracing::trace!(pre = self.pending_pre(), post = self.pending_post(), "flush end");
    }

    fn run_pass(
        &self,
        pass: IndexMap<JobId, Job>,
        runs: &mut HashMap<JobId, usize>,
        dropped: &mut HashSet<JobId>,
    ) {
        for (id, job) in pass {
            // Cleared by `invalidate_job` after the pass was taken.
            if !job.is_queued() {
                continue;
            }
            job.set_flag(JobFlags::QUEUED, false);
            if job.is_disposed() || dropped.contains(&id) {
                continue;
            }

            let count = runs.entry(id).or_insert(0);
            *count += 1;
            if *count > self.0.recursion_limit {
                dropped.insert(id);
                let error = BridgeError::RecursionLimit {
                    job: job.label().to_string(),
                    limit: self.0.recursion_limit,
                };
                handle_error(&error, ErrorKind::SchedulerFlush, job.instance().as_deref());
                continue;
            }

            self.run_job(&job);
        }
    }

    /// Run one job, containing its error or panic.
    fn run_job(&self, job: &Job) {
        job.set_flag(JobFlags::RUNNING, true);
        tracing::trace!(job = %job.id(), label = job.label(), "job run");
        let outcome = catch_unwind(AssertUnwindSafe(|| job.call()));
        job.set_flag(JobFlags::RUNNING, false);

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(payload) => BridgeError::JobPanicked {
                job: job.label().to_string(),
                message: panic_message(payload.as_ref()),
            },
        };
        handle_error(&error, job.kind(), job.instance().as_deref());
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn pending_pre(&self) -> usize {
        self.0.pre.borrow().len()
    }

    pub fn pending_post(&self) -> usize {
        self.0.post.borrow().len()
    }

    /// A flush is queued or running, or jobs are waiting.
    pub fn is_flush_pending(&self) -> bool {
        self.0.flush_pending.get()
            || self.0.flushing.get()
            || self.pending_pre() > 0
            || self.pending_post() > 0
    }

    pub fn is_flushing(&self) -> bool {
        self.0.flushing.get()
    }

    /// Host acknowledgements still outstanding.
    pub fn held_acks(&self) -> usize {
        self.0.held_acks.get()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pre", &self.pending_pre())
            .field("post", &self.pending_post())
            .field("held_acks", &self.held_acks())
            .field("flushing", &self.is_flushing())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// HostAck
// =============================================================================

/// Outstanding host acknowledgement. Releasing (or dropping) it lets the
/// post queue run.
pub struct HostAck {
    scheduler: Scheduler,
    released: Cell<bool>,
}

impl HostAck {
    /// Idempotent.
    pub fn release(&self) {
        if !self.released.replace(true) {
            self.scheduler.release_ack();
        }
    }
}

impl Drop for HostAck {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for HostAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAck")
            .field("released", &self.released.get())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
