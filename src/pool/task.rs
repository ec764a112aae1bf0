//! Type-erased task runners.
//!
//! The delay queues store `Arc<dyn TaskRunner>` so one queue can hold tasks
//! whose futures produce different value types. Each runner owns its payload
//! and a reference to the typed [`FutureCore`] it publishes into; the worker
//! only ever sees the erased trait.
//!
//! Payloads are a closed set: a one-shot closure producing a value (an
//! action is just a closure producing `()`), or a recurring `FnMut` action
//! re-posted by its own runner after every successful run.

use crate::error::{panic_message, Error};
use crate::future::{CancelRegistry, FutureCore, TaskOutcome};
use crate::pool::PoolShared;
use crate::priority::Priority;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// A queued unit of work, erased over its future's value type.
pub(crate) trait TaskRunner: Send + Sync {
    /// Executes the payload and publishes the outcome.
    ///
    /// Must be a no-op (other than bookkeeping) when the task was cancelled
    /// before dispatch; the payload must not run in that case.
    fn run(self: Arc<Self>);

    /// Cancels the task if it is still pending. Used when pending queues
    /// are drained on immediate shutdown.
    fn abandon(&self);

    /// Raises the cooperative interrupt flag on the task's future.
    fn interrupt(&self);

    /// Identity of the backing future, for removal scans.
    fn future_token(&self) -> u64;

    /// Records the queue position of the pending entry on the future so
    /// cancellation can unqueue it.
    fn bind(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64);
}

/// One-shot payload producing a `T`.
pub(crate) struct OneShotTask<T> {
    payload: Mutex<Option<Box<dyn FnOnce() -> T + Send>>>,
    core: Arc<FutureCore<T>>,
}

impl<T: Send + 'static> OneShotTask<T> {
    pub(crate) fn new(
        payload: Box<dyn FnOnce() -> T + Send>,
        core: Arc<FutureCore<T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(Some(payload)),
            core,
        })
    }
}

impl<T: Send + 'static> TaskRunner for OneShotTask<T> {
    fn run(self: Arc<Self>) {
        // A cancelled task must never observe its payload running.
        if !self.core.try_start() {
            trace!(token = self.core.token(), "skipping cancelled task");
            return;
        }
        let Some(payload) = self.payload.lock().take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(payload)) {
            Ok(value) => {
                self.core.complete(TaskOutcome::Done(value));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                trace!(token = self.core.token(), %message, "task payload panicked");
                self.core
                    .complete(TaskOutcome::Failed(Error::execution_failure(message)));
            }
        }
    }

    fn abandon(&self) {
        self.core.cancel(false);
    }

    fn interrupt(&self) {
        self.core.set_interrupted();
    }

    fn future_token(&self) -> u64 {
        self.core.token()
    }

    fn bind(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64) {
        self.core.bind_slot(registry, priority, seq);
    }
}

/// Re-queue cadence of a recurring action.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Recurrence {
    /// Next eligibility is `completion time + delay`.
    FixedDelay { delay_ms: u64 },
    /// Next eligibility is `previous eligibility + period` (drift-free); an
    /// overrunning run makes the following ticks fire back-to-back until
    /// the cadence catches up, never coalescing.
    FixedRate { period_ms: u64 },
}

/// Self-reposting recurring action.
///
/// The future stays pending across runs and only reaches a terminal state
/// through cancellation or a panicking run. Re-posting stops as soon as the
/// future leaves the pending state, the interrupt flag is raised, or the
/// pool stops accepting work.
pub(crate) struct RecurringTask {
    action: Mutex<Option<Box<dyn FnMut() + Send>>>,
    core: Arc<FutureCore<()>>,
    pool: Weak<PoolShared>,
    priority: Priority,
    recurrence: Recurrence,
    /// Eligibility time of the current run; the fixed-rate cadence anchor.
    current_tick: AtomicU64,
}

impl RecurringTask {
    pub(crate) fn new(
        action: Box<dyn FnMut() + Send>,
        core: Arc<FutureCore<()>>,
        pool: Weak<PoolShared>,
        priority: Priority,
        recurrence: Recurrence,
        first_tick: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            action: Mutex::new(Some(action)),
            core,
            pool,
            priority,
            recurrence,
            current_tick: AtomicU64::new(first_tick),
        })
    }

    fn stop(&self) {
        self.core.cancel(false);
    }
}

impl TaskRunner for RecurringTask {
    fn run(self: Arc<Self>) {
        if !self.core.is_pending() {
            return;
        }
        let Some(mut action) = self.action.lock().take() else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| action())) {
            // A panicking run cancels the recurrence and fails the future.
            let message = panic_message(panic.as_ref());
            trace!(token = self.core.token(), %message, "recurring action panicked");
            self.core
                .complete(TaskOutcome::Failed(Error::execution_failure(message)));
            return;
        }
        if !self.core.is_pending() {
            return;
        }
        if self.core.is_interrupted() {
            self.stop();
            return;
        }

        let Some(pool) = self.pool.upgrade() else {
            self.stop();
            return;
        };
        let next_tick = match self.recurrence {
            Recurrence::FixedDelay { delay_ms } => {
                pool.clock().now_millis().saturating_add(delay_ms)
            }
            Recurrence::FixedRate { period_ms } => {
                let next = self
                    .current_tick
                    .load(Ordering::Acquire)
                    .saturating_add(period_ms);
                self.current_tick.store(next, Ordering::Release);
                next
            }
        };
        *self.action.lock() = Some(action);

        let runner: Arc<dyn TaskRunner> = Arc::clone(&self) as Arc<dyn TaskRunner>;
        if pool.submit_runner(runner, self.priority, next_tick).is_err() {
            // The pool stopped accepting work between runs.
            self.stop();
        }
    }

    fn abandon(&self) {
        self.stop();
    }

    fn interrupt(&self) {
        self.core.set_interrupted();
    }

    fn future_token(&self) -> u64 {
        self.core.token()
    }

    fn bind(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64) {
        self.core.bind_slot(registry, priority, seq);
    }
}
