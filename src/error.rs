//! Error taxonomy and the error-reporting collaborator.
//!
//! Every failure the engine can surface is a [`BridgeError`]. Where it
//! surfaced is recorded separately as an [`ErrorKind`], so the same error
//! (say, a normalization failure) can be reported from the first push or from
//! a later flush.
//!
//! Reporting goes through a per-thread handler. Hosts install one with
//! [`set_error_handler`]; without it, errors are logged via `tracing`.
//!
//! # Propagation
//!
//! - Job-level errors are caught at the job boundary by the scheduler,
//!   reported here, and the flush continues.
//! - Lifecycle misuse and scheduler-internal errors are reported here *and*
//!   returned to the call site.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::snapshot::{NormalizeError, PatchError};

// =============================================================================
// Types
// =============================================================================

/// Everything the bridge can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A bound value contains a host-incompatible type.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// A watch registration was given something that cannot be watched.
    #[error(
        "invalid watch source: {source_type}; a watch source can only be a getter, \
         a ref, a reactive object, or an array of these"
    )]
    InvalidWatchSource { source_type: String },

    /// A lifecycle operation was used outside of its valid context.
    #[error("`{operation}` {reason}")]
    LifecycleMisuse { operation: String, reason: String },

    /// A job re-queued itself more often than allowed in a single flush.
    #[error("maximum recursive updates exceeded in job `{job}` (limit {limit})")]
    RecursionLimit { job: String, limit: usize },

    /// A patch path could not be interpreted.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// A job panicked; the panic was contained at the job boundary.
    #[error("job `{job}` panicked: {message}")]
    JobPanicked { job: String, message: String },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure raised by user code (setup, watcher callbacks, hooks).
    #[error("{0}")]
    Callback(String),
}

impl BridgeError {
    /// Error raised by user code.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }

    pub(crate) fn misuse(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LifecycleMisuse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Framework-internal failures that must never be swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RecursionLimit { .. } | Self::LifecycleMisuse { .. }
        )
    }
}

/// Where an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SetupFunction,
    RenderFunction,
    WatchGetter,
    WatchCallback,
    WatchCleanup,
    LifecycleHook,
    SchedulerFlush,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetupFunction => "setup function",
            Self::RenderFunction => "render function",
            Self::WatchGetter => "watcher getter",
            Self::WatchCallback => "watcher callback",
            Self::WatchCleanup => "watcher cleanup function",
            Self::LifecycleHook => "lifecycle hook",
            Self::SchedulerFlush => "scheduler flush",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported error, as handed to the installed handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub error: BridgeError,
    pub kind: ErrorKind,
    /// Label of the host instance the error belongs to, if any.
    pub instance: Option<String>,
}

/// Top-level error reporting collaborator.
pub type ErrorHandler = Rc<dyn Fn(&ErrorReport)>;

// =============================================================================
// State
// =============================================================================

thread_local! {
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install the error handler for this thread, returning the previous one.
pub fn set_error_handler(handler: impl Fn(&ErrorReport) + 'static) -> Option<ErrorHandler> {
    ERROR_HANDLER.with(|slot| slot.borrow_mut().replace(Rc::new(handler)))
}

/// Remove the error handler for this thread.
pub fn take_error_handler() -> Option<ErrorHandler> {
    ERROR_HANDLER.with(|slot| slot.borrow_mut().take())
}

// =============================================================================
// Reporting
// =============================================================================

/// Report an error to the installed handler, or log it.
pub fn handle_error(error: &BridgeError, kind: ErrorKind, instance: Option<&str>) {
    // Clone the handler out so it may install another handler while running.
    let handler = ERROR_HANDLER.with(|slot| slot.borrow().clone());
    match handler {
        Some(handler) => handler(&ErrorReport {
            error: error.clone(),
            kind,
            instance: instance.map(str::to_string),
        }),
        None => {
            tracing::error!(
                kind = %kind,
                instance = instance.unwrap_or("-"),
                fatal = error.is_fatal(),
                "unhandled error: {error}"
            );
        }
    }
}

/// Run `f`, reporting its error instead of returning it.
pub fn call_with_error_handling<R>(
    kind: ErrorKind,
    instance: Option<&str>,
    f: impl FnOnce() -> Result<R, BridgeError>,
) -> Option<R> {
    match f() {
        Ok(value) => Some(value),
        Err(err) => {
            handle_error(&err, kind, instance);
            None
        }
    }
}

/// Emit a framework warning.
pub(crate) fn warn(message: &str, instance: Option<&str>) {
    tracing::warn!(instance = instance.unwrap_or("-"), "{message}");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_receives_report() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        set_error_handler(move |report| sink.borrow_mut().push(report.clone()));

        handle_error(
            &BridgeError::callback("boom"),
            ErrorKind::WatchCallback,
            Some("pages/index"),
        );

        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::WatchCallback);
        assert_eq!(reports[0].instance.as_deref(), Some("pages/index"));
        assert_eq!(reports[0].error.to_string(), "boom");
        drop(reports);
        take_error_handler();
    }

    #[test]
    fn test_call_with_error_handling() {
        let count = Rc::new(std::cell::Cell::new(0));
        let counter = count.clone();
        set_error_handler(move |_| counter.set(counter.get() + 1));

        assert_eq!(call_with_error_handling(ErrorKind::LifecycleHook, None, || Ok(3)), Some(3));
        let failed: Option<()> = call_with_error_handling(ErrorKind::LifecycleHook, None, || {
            Err(BridgeError::callback("nope"))
        });
        assert!(failed.is_none());
        assert_eq!(count.get(), 1);
        take_error_handler();
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::misuse("onShow", "called outside setup").is_fatal());
        assert!(BridgeError::RecursionLimit { job: "j".into(), limit: 100 }.is_fatal());
        assert!(!BridgeError::callback("x").is_fatal());
        assert_eq!(
            BridgeError::misuse("onShow", "called outside setup").to_string(),
            "`onShow` called outside setup"
        );
    }
}
