//! Error types and error handling strategy for taskforge.
//!
//! Errors are explicit and typed, and classified by [`ErrorKind`] so callers
//! can branch on the class of failure without string matching:
//!
//! - Submission errors (`BadArgument`, `PoolClosed`) are returned at the call
//!   site and never reach a worker thread.
//! - Completion errors (`Cancelled`, `ExecutionFailure`, `Timeout`,
//!   `Interrupted`) surface through [`TaskFuture::get`](crate::TaskFuture::get)
//!   and its timed variant.
//! - Payload panics are caught on the worker, converted to
//!   `ExecutionFailure`, and never unwind the worker loop.

use std::borrow::Cow;
use std::sync::Arc;

/// Classification of an [`Error`] for branch-based handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An argument was invalid (zero period, inconsistent pool sizes, ...).
    BadArgument,
    /// Submission was rejected because the scheduler is shut down.
    PoolClosed,
    /// The task was cancelled before a value was produced.
    Cancelled,
    /// The task payload panicked; the payload message is preserved.
    ExecutionFailure,
    /// A timed wait expired before the task reached a terminal state.
    Timeout,
    /// A blocking wait was cut short by scheduler shutdown.
    Interrupted,
}

/// The crate-wide error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    BadArgument(Cow<'static, str>),
    /// The scheduler no longer accepts submissions.
    #[error("scheduler is shut down")]
    PoolClosed,
    /// The task was cancelled.
    #[error("task was cancelled")]
    Cancelled,
    /// The task payload panicked.
    #[error("task failed: {0}")]
    ExecutionFailure(Arc<str>),
    /// A timed wait expired with the task still incomplete.
    #[error("timed out waiting for task completion")]
    Timeout,
    /// A blocking wait was interrupted by shutdown.
    #[error("wait interrupted by scheduler shutdown")]
    Interrupted,
}

impl Error {
    /// Builds a `BadArgument` error with the given detail message.
    pub fn bad_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        Error::BadArgument(detail.into())
    }

    /// Builds an `ExecutionFailure` from a captured panic payload.
    pub(crate) fn execution_failure(message: impl Into<Arc<str>>) -> Self {
        Error::ExecutionFailure(message.into())
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadArgument(_) => ErrorKind::BadArgument,
            Error::PoolClosed => ErrorKind::PoolClosed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
            Error::Timeout => ErrorKind::Timeout,
            Error::Interrupted => ErrorKind::Interrupted,
        }
    }
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_owned()
    }
}
