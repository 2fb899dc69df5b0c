//! Differential renderer for host snapshots.
//!
//! The PatchRenderer compares the current snapshot to the previous one and
//! only pushes the paths that changed. The host never sees a write for a
//! mutation that netted out to nothing.
//!
//! # Algorithm
//!
//! 1. No previous snapshot: push every top-level binding (full render)
//! 2. Otherwise diff each top-level binding against its previous value; the
//!    root itself is never replaced, and a binding that disappeared is
//!    assigned null
//! 3. Empty patch: no host call
//! 4. Push the patch, holding the post queue until the host acknowledges it
//! 5. Store current as previous for the next comparison
//!
//! A failed push leaves the previous snapshot untouched, so the next render
//! diffs against what the host actually has.

use std::rc::Rc;

use crate::error::BridgeError;
use crate::instance::Host;
use crate::scheduler::Scheduler;
use crate::snapshot::{Patch, PlainValue, diff_bindings};

/// Differential renderer for one binding set.
///
/// Keeps track of the previous snapshot to enable diff-based pushes.
pub struct PatchRenderer {
    host: Rc<dyn Host>,
    scheduler: Scheduler,
    previous: Option<PlainValue>,
    pushes: usize,
}

impl PatchRenderer {
    /// Create a renderer writing to `host`.
    pub fn new(host: Rc<dyn Host>, scheduler: Scheduler) -> Self {
        Self {
            host,
            scheduler,
            previous: None,
            pushes: 0,
        }
    }

    /// Render a snapshot, pushing only changed paths.
    ///
    /// Returns true if a patch was pushed.
    pub fn render(&mut self, current: &PlainValue) -> Result<bool, BridgeError> {
        let patch = match &self.previous {
            Some(previous) => diff_bindings(previous, current),
            None => Patch::full(current),
        };

        let pushed = !patch.is_empty();
        if pushed {
            self.push(patch)?;
        }

        // Store for next comparison
        self.previous = Some(current.clone());
        Ok(pushed)
    }

    /// Force a full push (no diffing).
    ///
    /// Use this for the first push of a binding set.
    pub fn render_full(&mut self, current: &PlainValue) -> Result<(), BridgeError> {
        self.push(Patch::full(current))?;
        self.previous = Some(current.clone());
        Ok(())
    }

    fn push(&mut self, patch: Patch) -> Result<(), BridgeError> {
        tracing::debug!(host = self.host.label(), entries = patch.len(), "push patch");
        let ack = self.scheduler.hold_post_flush();
        // A host that drops the callback releases the hold with it.
        self.host
            .apply_patch(patch, Some(Box::new(move || ack.release())))?;
        self.pushes += 1;
        Ok(())
    }

    /// Invalidate the previous snapshot.
    ///
    /// Next render will be a full push.
    pub fn invalidate(&mut self) {
        self.previous = None;
    }

    /// Check if we have a previous snapshot to diff against.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// The last snapshot pushed to the host.
    pub fn previous(&self) -> Option<&PlainValue> {
        self.previous.as_ref()
    }

    /// Number of patches pushed so far.
    pub fn push_count(&self) -> usize {
        self.pushes
    }
}
