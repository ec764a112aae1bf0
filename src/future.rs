//! Completion handles for submitted tasks.
//!
//! Every submission returns a [`TaskFuture`] backed by a shared
//! [`FutureCore`]: one small mutex guarding the phase tag and the pending
//! callback list, a condvar for blocking waiters, and a write-once outcome
//! cell. The publishing discipline is fixed:
//!
//! 1. the outcome is written and the phase flipped to terminal under the
//!    lock (release/acquire publication through the mutex),
//! 2. waiters are signalled,
//! 3. callbacks run, strictly outside the lock.
//!
//! Callbacks fire exactly once per registration. A callback registered
//! after completion runs synchronously on the registering thread; a panic
//! inside a callback is caught and logged, never affecting completion or
//! other callbacks.
//!
//! # Cancellation
//!
//! `cancel(false)` succeeds only while the task is still pending: the state
//! flips to cancelled and the entry is removed from its delay queue through
//! the recorded queue slot. `cancel(true)` additionally covers the running
//! phase: the interrupt flag is raised for the payload to observe, the
//! future reports cancelled immediately, and a value produced by the
//! still-running closure is discarded. Terminal states never move.

use crate::clock::{wait_slice, Clock};
use crate::error::{panic_message, Error};
use crate::priority::Priority;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::debug;

/// Source of unique tokens identifying futures across type erasure.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Terminal result of a task, as seen by completion callbacks.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The payload ran to completion and produced a value.
    Done(T),
    /// The payload panicked; the panic message is preserved in the error.
    Failed(Error),
    /// The task was cancelled before producing a value.
    Cancelled,
}

/// Something that can unqueue a still-pending task by identity.
///
/// Implemented by the scheduler so a future can remove its own entry on
/// cancellation without a strong reference cycle.
pub(crate) trait CancelRegistry: Send + Sync {
    fn remove_pending(&self, priority: Priority, seq: u64) -> bool;
}

/// Where a pending task currently sits, for cancellation removal.
pub(crate) struct QueueSlot {
    pub registry: Weak<dyn CancelRegistry>,
    pub priority: Priority,
    pub seq: u64,
}

enum Phase {
    Pending,
    Running,
    Terminal,
}

pub(crate) type Callback<T> = Box<dyn FnOnce(&TaskOutcome<T>) + Send>;

struct Inner<T> {
    phase: Phase,
    callbacks: SmallVec<[Callback<T>; 2]>,
}

/// Shared completion state between the submitter's handles and the
/// scheduler's task entry.
pub(crate) struct FutureCore<T> {
    lock: Mutex<Inner<T>>,
    done: Arc<Condvar>,
    outcome: OnceLock<TaskOutcome<T>>,
    interrupted: AtomicBool,
    token: u64,
    slot: Mutex<Option<QueueSlot>>,
    clock: Arc<dyn Clock>,
}

impl<T> FutureCore<T> {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        let done = Arc::new(Condvar::new());
        clock.register_sleeper(&done);
        Arc::new(Self {
            lock: Mutex::new(Inner {
                phase: Phase::Pending,
                callbacks: SmallVec::new(),
            }),
            done,
            outcome: OnceLock::new(),
            interrupted: AtomicBool::new(false),
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            slot: Mutex::new(None),
            clock,
        })
    }

    /// Stable identity of this future across type erasure.
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Records (or re-records, for recurring tasks) the queue position of
    /// the pending entry so cancellation can remove it.
    pub(crate) fn bind_slot(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64) {
        *self.slot.lock() = Some(QueueSlot {
            registry,
            priority,
            seq,
        });
    }

    /// Returns the recorded queue slot, if any, without clearing it.
    pub(crate) fn slot_info(&self) -> Option<(Weak<dyn CancelRegistry>, Priority, u64)> {
        self.slot
            .lock()
            .as_ref()
            .map(|s| (s.registry.clone(), s.priority, s.seq))
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.lock.lock().phase, Phase::Pending)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.lock.lock().phase, Phase::Terminal)
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Attempts the `pending -> running` transition.
    ///
    /// Returns false when the task was cancelled (or somehow completed)
    /// first, in which case the payload must not run.
    pub(crate) fn try_start(&self) -> bool {
        let mut inner = self.lock.lock();
        match inner.phase {
            Phase::Pending => {
                inner.phase = Phase::Running;
                true
            }
            Phase::Running | Phase::Terminal => false,
        }
    }

    /// Publishes the terminal outcome.
    ///
    /// Returns false (and drops `outcome`) when a terminal state was already
    /// published, e.g. when a result arrives after an interrupting cancel.
    pub(crate) fn complete(&self, outcome: TaskOutcome<T>) -> bool {
        let callbacks = {
            let mut inner = self.lock.lock();
            if matches!(inner.phase, Phase::Terminal) {
                return false;
            }
            // The cell is written before the phase flips so any thread that
            // observes `Terminal` also observes the outcome.
            if self.outcome.set(outcome).is_err() {
                return false;
            }
            inner.phase = Phase::Terminal;
            std::mem::take(&mut inner.callbacks)
        };
        self.done.notify_all();
        let outcome = self.outcome_ref();
        for callback in callbacks {
            run_callback(callback, outcome);
        }
        true
    }

    /// Cancels the task.
    ///
    /// See the module docs for the exact state interactions. Returns whether
    /// this call performed the cancellation.
    pub(crate) fn cancel(&self, interrupt_running: bool) -> bool {
        let callbacks = {
            let mut inner = self.lock.lock();
            let cancellable = match inner.phase {
                Phase::Pending => true,
                Phase::Running => {
                    if !interrupt_running {
                        return false;
                    }
                    self.interrupted.store(true, Ordering::Release);
                    true
                }
                Phase::Terminal => false,
            };
            if !cancellable {
                return false;
            }
            if self.outcome.set(TaskOutcome::Cancelled).is_err() {
                return false;
            }
            inner.phase = Phase::Terminal;
            std::mem::take(&mut inner.callbacks)
        };

        // Unqueue the pending entry, if it is still queued somewhere.
        if let Some((registry, priority, seq)) = self.slot_info() {
            if let Some(registry) = registry.upgrade() {
                registry.remove_pending(priority, seq);
            }
        }

        self.done.notify_all();
        let outcome = self.outcome_ref();
        for callback in callbacks {
            run_callback(callback, outcome);
        }
        true
    }

    /// Blocks until the future is terminal or the timeout expires.
    ///
    /// `None` waits indefinitely. `Some(Duration::ZERO)` is a single
    /// non-blocking probe. Returns whether the future is terminal.
    pub(crate) fn wait_terminal(&self, timeout: Option<Duration>) -> bool {
        let mut inner = self.lock.lock();
        let deadline = timeout.map(|t| {
            self.clock
                .now_millis()
                .saturating_add(u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
        });
        loop {
            if matches!(inner.phase, Phase::Terminal) {
                return true;
            }
            match deadline {
                None => {
                    self.done.wait(&mut inner);
                }
                Some(deadline) => {
                    let now = self.clock.now_millis();
                    if now >= deadline {
                        return false;
                    }
                    let slice = wait_slice(self.clock.as_ref(), deadline - now);
                    self.done.wait_for(&mut inner, slice);
                }
            }
        }
    }

    /// Registers a completion callback, firing it immediately when the
    /// future is already terminal.
    pub(crate) fn on_complete(&self, callback: Callback<T>) {
        {
            let mut inner = self.lock.lock();
            if !matches!(inner.phase, Phase::Terminal) {
                inner.callbacks.push(callback);
                return;
            }
        }
        run_callback(callback, self.outcome_ref());
    }

    /// The published outcome. Only valid once the phase is terminal.
    fn outcome_ref(&self) -> &TaskOutcome<T> {
        self.outcome
            .get()
            .expect("outcome is written before the terminal phase is published")
    }
}

fn run_callback<T>(callback: Callback<T>, outcome: &TaskOutcome<T>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
        debug!(
            message = %panic_message(payload.as_ref()),
            "completion callback panicked; ignoring"
        );
    }
}

/// Completion handle for a submitted task.
///
/// Cheap to clone; every clone observes the same completion. The handle
/// outlives the internal task record: once the task completes, the value
/// (or error) stays readable for as long as any handle exists.
pub struct TaskFuture<T> {
    core: Arc<FutureCore<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("done", &self.core.is_terminal())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> TaskFuture<T> {
    pub(crate) fn from_core(core: Arc<FutureCore<T>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<FutureCore<T>> {
        &self.core
    }

    /// Blocks until the task completes and returns its value.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the task was cancelled, `ExecutionFailure` when the
    /// payload panicked.
    pub fn get(&self) -> Result<T, Error>
    where
        T: Clone,
    {
        self.core.wait_terminal(None);
        self.resolve()
    }

    /// Like [`get`](Self::get) but fails with `Timeout` when the task is
    /// still incomplete after `timeout`.
    ///
    /// A zero timeout is a single non-blocking probe. The wait never alters
    /// the task's state.
    ///
    /// # Errors
    ///
    /// `Timeout`, `Cancelled`, or `ExecutionFailure`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error>
    where
        T: Clone,
    {
        if !self.core.wait_terminal(Some(timeout)) {
            return Err(Error::Timeout);
        }
        self.resolve()
    }

    fn resolve(&self) -> Result<T, Error>
    where
        T: Clone,
    {
        match self.core.outcome_ref() {
            TaskOutcome::Done(value) => Ok(value.clone()),
            TaskOutcome::Failed(error) => Err(error.clone()),
            TaskOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Cancels the task.
    ///
    /// A pending task is removed from its queue and will never run. A
    /// running task is cancelled only when `interrupt_running` is true: the
    /// interrupt flag becomes observable through
    /// [`is_interrupted`](Self::is_interrupted), the future reports
    /// cancelled, and the in-flight closure's eventual result is discarded.
    ///
    /// Returns true when this call performed the cancellation; false when
    /// the task was already terminal (repeated cancels return true at most
    /// once).
    pub fn cancel(&self, interrupt_running: bool) -> bool {
        self.core.cancel(interrupt_running)
    }

    /// Whether the task reached any terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.core.is_terminal()
    }

    /// Whether the task terminated by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_terminal()
            && matches!(self.core.outcome.get(), Some(TaskOutcome::Cancelled))
    }

    /// Whether an interrupting cancel was delivered.
    ///
    /// Payloads that want to honor interruption can capture a clone of
    /// their own future and poll this flag.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.core.is_interrupted()
    }

    /// Blocks until the task is terminal, without touching the value.
    ///
    /// Returns whether the task completed within the timeout (`None` waits
    /// indefinitely and always returns true).
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.core.wait_terminal(timeout)
    }

    /// Registers a callback fired exactly once with the terminal outcome.
    ///
    /// If the future is already terminal the callback runs synchronously on
    /// the calling thread; otherwise it runs on the worker that completes
    /// the task. Callback panics are caught and logged at debug level.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&TaskOutcome<T>) + Send + 'static,
    {
        self.core.on_complete(Box::new(callback));
    }
}
