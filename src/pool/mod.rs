//! The priority scheduler: an elastic worker pool over three delay queues.
//!
//! One [`DelayQueue`] per [`Priority`] holds pending tasks ordered by
//! `(ready_at, seq)`. Workers pick the next eligible entry under the
//! dispatch policy:
//!
//! 1. A ready `High` task, while the consecutive-high streak is below
//!    [`PoolConfig::high_streak_limit`].
//! 2. Otherwise a ready `Low` task (resetting the streak).
//! 3. When the streak limit skipped a ready `High` task and no `Low` task
//!    was ready, the `High` task runs anyway and the streak restarts at 1,
//!    so exhausting the limit never idles the worker.
//! 4. A ready `Starvable` task only when neither `High` nor `Low` has
//!    ready work; this class may be deferred indefinitely.
//! 5. Otherwise the worker parks until the earliest pending eligibility
//!    across the three queues, or until a submission unparks it.
//!
//! The streak bound makes `High`/`Low` mutually starvation-fair: a ready
//! `Low` task waits at most `high_streak_limit` dispatches per worker.
//!
//! # Pool lifecycle
//!
//! `Running -> ShuttingDown -> Terminated`. [`shutdown`] stops intake and
//! drains; [`shutdown_now`] additionally empties the queues, cancels the
//! drained tasks' futures, interrupts running tasks, and returns the
//! drained entries. Workers are started lazily on submission (up to
//! `core_pool_size`, or `max_pool_size` when every live worker is busy)
//! and non-core workers retire after `keep_alive` idle time.
//!
//! [`shutdown`]: PriorityScheduler::shutdown
//! [`shutdown_now`]: PriorityScheduler::shutdown_now

pub(crate) mod queue;
pub(crate) mod task;
pub(crate) mod worker;

use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::error::Error;
use crate::future::{CancelRegistry, FutureCore, TaskFuture};
use crate::priority::Priority;
use parking_lot::{Condvar, Mutex};
use queue::{DelayQueue, QueueEntry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use task::{OneShotTask, Recurrence, RecurringTask, TaskRunner};
use tracing::{debug, warn};
use worker::WorkerSlot;

/// A task that was still pending when [`PriorityScheduler::shutdown_now`]
/// drained the queues. Its future has been cancelled.
#[derive(Debug)]
pub struct DrainedTask {
    priority: Priority,
    seq: u64,
}

impl DrainedTask {
    /// The priority the task was queued under.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The task's global submission sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Running,
    ShuttingDown,
    Terminated,
}

struct Lifecycle {
    state: PoolState,
    live_workers: usize,
    next_worker_id: usize,
}

/// State shared between the scheduler handle, its workers, and the futures
/// of pending tasks (which hold it weakly for cancellation removal).
pub(crate) struct PoolShared {
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    queues: [DelayQueue; 3],
    next_seq: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    /// Signalled when the pool reaches `Terminated`.
    terminated: Arc<Condvar>,
    registry: Mutex<Vec<Arc<WorkerSlot>>>,
    next_wake: AtomicUsize,
    /// Set by `shutdown_now`; workers observe it and stop without draining.
    hard_stop: AtomicBool,
    /// Weak self-reference handed to futures for cancellation removal.
    self_registry: OnceLock<Weak<dyn CancelRegistry>>,
    /// Weak self-reference used to hand worker threads a strong handle.
    self_weak: OnceLock<Weak<PoolShared>>,
}

impl PoolShared {
    fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let terminated = Arc::new(Condvar::new());
        clock.register_sleeper(&terminated);
        let queues = [
            DelayQueue::new(Arc::clone(&clock)),
            DelayQueue::new(Arc::clone(&clock)),
            DelayQueue::new(Arc::clone(&clock)),
        ];
        let shared = Arc::new(Self {
            clock,
            config,
            queues,
            next_seq: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: PoolState::Running,
                live_workers: 0,
                next_worker_id: 0,
            }),
            terminated,
            registry: Mutex::new(Vec::new()),
            next_wake: AtomicUsize::new(0),
            hard_stop: AtomicBool::new(false),
            self_registry: OnceLock::new(),
            self_weak: OnceLock::new(),
        });
        let weak = Arc::downgrade(&(Arc::clone(&shared) as Arc<dyn CancelRegistry>));
        shared
            .self_registry
            .set(weak)
            .unwrap_or_else(|_| unreachable!("self registry initialized once"));
        shared
            .self_weak
            .set(Arc::downgrade(&shared))
            .unwrap_or_else(|_| unreachable!("self reference initialized once"));
        shared
    }

    /// Strong self-handle; valid whenever a `&self` exists.
    fn self_arc(&self) -> Arc<PoolShared> {
        self.self_weak
            .get()
            .expect("self reference initialized at construction")
            .upgrade()
            .expect("pool outlives its borrows")
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn hard_stopped(&self) -> bool {
        self.hard_stop.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        !matches!(self.lifecycle.lock().state, PoolState::Running)
    }

    pub(crate) fn queued_task_count(&self) -> usize {
        self.queues.iter().map(DelayQueue::len).sum()
    }

    pub(crate) fn wait_slice(&self, remaining_ms: u64) -> Duration {
        crate::clock::wait_slice(self.clock.as_ref(), remaining_ms)
    }

    fn registry_weak(&self) -> Weak<dyn CancelRegistry> {
        self.self_registry
            .get()
            .expect("self registry initialized at construction")
            .clone()
    }

    /// Queues a runner, starting or waking a worker as needed.
    ///
    /// This is the single intake path: user submissions and recurring
    /// re-posts both land here, and both are rejected once the pool has
    /// left the running state.
    pub(crate) fn submit_runner(
        &self,
        runner: Arc<dyn TaskRunner>,
        priority: Priority,
        ready_at: u64,
    ) -> Result<u64, Error> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != PoolState::Running {
            return Err(Error::PoolClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        runner.bind(self.registry_weak(), priority, seq);
        self.queues[priority.index()].offer(QueueEntry {
            ready_at,
            seq,
            runner,
        });
        self.ensure_worker_capacity(&mut lifecycle);
        drop(lifecycle);
        self.wake_one();
        Ok(seq)
    }

    /// Starts a worker when the pool is under its core size, or when every
    /// live worker is busy and the pool may still grow.
    fn ensure_worker_capacity(&self, lifecycle: &mut Lifecycle) {
        let grow = lifecycle.live_workers < self.config.core_pool_size
            || (self.idle_worker_count() == 0
                && lifecycle.live_workers < self.config.max_pool_size);
        if grow {
            self.spawn_worker_locked(lifecycle);
        }
    }

    fn idle_worker_count(&self) -> usize {
        self.registry
            .lock()
            .iter()
            .filter(|slot| slot.idle.load(Ordering::Acquire))
            .count()
    }

    fn spawn_worker_locked(&self, lifecycle: &mut Lifecycle) {
        let id = lifecycle.next_worker_id;
        lifecycle.next_worker_id += 1;
        let slot = WorkerSlot::new(id);
        self.clock.register_sleeper(slot.parker.condvar());

        let shared = self.self_arc();
        let thread_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name(format!("taskforge-worker-{id}"))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    worker::run_worker(&shared, &thread_slot)
                }));
                match result {
                    // Retirement already did the lifecycle bookkeeping.
                    Ok(true) => {}
                    Ok(false) => shared.worker_exited(&thread_slot, false),
                    Err(_) => shared.worker_exited(&thread_slot, true),
                }
            });
        match spawned {
            Ok(_) => {
                lifecycle.live_workers += 1;
                self.registry.lock().push(slot);
            }
            Err(error) => {
                warn!(worker_id = id, %error, "failed to spawn worker thread");
            }
        }
    }

    fn deregister(&self, id: usize) {
        self.registry.lock().retain(|slot| slot.id != id);
    }

    /// Retires an idle worker beyond the core size. Returns whether the
    /// calling worker should exit; on true, all bookkeeping is done.
    pub(crate) fn try_retire(&self, slot: &Arc<WorkerSlot>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == PoolState::Running
            && lifecycle.live_workers > self.config.core_pool_size
        {
            lifecycle.live_workers -= 1;
            self.deregister(slot.id);
            true
        } else {
            false
        }
    }

    fn worker_exited(&self, slot: &Arc<WorkerSlot>, panicked: bool) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.live_workers -= 1;
        self.deregister(slot.id);
        if panicked {
            warn!(worker_id = slot.id, "worker died unexpectedly");
        }
        match lifecycle.state {
            PoolState::Running => {
                if panicked {
                    // The pool as a whole survives a broken worker.
                    self.spawn_worker_locked(&mut lifecycle);
                }
            }
            PoolState::ShuttingDown => {
                if panicked && !self.hard_stopped() && self.queued_task_count() > 0 {
                    // Keep draining the remaining queued work.
                    self.spawn_worker_locked(&mut lifecycle);
                } else if lifecycle.live_workers == 0 {
                    lifecycle.state = PoolState::Terminated;
                    self.terminated.notify_all();
                }
            }
            PoolState::Terminated => {}
        }
    }

    /// Selects the next eligible entry under the dispatch policy.
    pub(crate) fn next_entry(&self, high_streak: &mut u32) -> Option<QueueEntry> {
        let now = self.clock.now_millis();
        let limit = self.config.high_streak_limit;
        let high = &self.queues[Priority::High.index()];
        let low = &self.queues[Priority::Low.index()];
        let starvable = &self.queues[Priority::Starvable.index()];

        if *high_streak < limit {
            if let Some(entry) = high.try_take(now) {
                *high_streak += 1;
                return Some(entry);
            }
        }
        if let Some(entry) = low.try_take(now) {
            *high_streak = 0;
            return Some(entry);
        }
        if *high_streak >= limit {
            // The streak limit skipped a ready high task but nothing lower
            // was ready; run it rather than idle, restarting the streak.
            if let Some(entry) = high.try_take(now) {
                *high_streak = 1;
                return Some(entry);
            }
        }
        let high_ready = high.peek_ready_at().is_some_and(|at| at <= now);
        let low_ready = low.peek_ready_at().is_some_and(|at| at <= now);
        if !high_ready && !low_ready {
            if let Some(entry) = starvable.try_take(now) {
                *high_streak = 0;
                return Some(entry);
            }
        }
        None
    }

    /// Earliest pending eligibility across the three queues.
    pub(crate) fn earliest_ready_at(&self) -> Option<u64> {
        self.queues
            .iter()
            .filter_map(DelayQueue::peek_ready_at)
            .min()
    }

    /// Wakes one worker, preferring a parked one.
    ///
    /// The scan start rotates so consecutive wakeups land on different
    /// idle workers instead of coalescing their permits onto one.
    fn wake_one(&self) {
        let registry = self.registry.lock();
        let len = registry.len();
        if len == 0 {
            return;
        }
        let start = self.next_wake.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            let slot = &registry[(start + offset) % len];
            if slot.idle.load(Ordering::Acquire) {
                slot.parker.unpark();
                return;
            }
        }
        registry[start % len].parker.unpark();
    }

    fn wake_all(&self) {
        for slot in self.registry.lock().iter() {
            slot.parker.unpark();
        }
    }

    /// Delivers the interrupt flag to every currently running task.
    fn interrupt_running(&self) {
        for slot in self.registry.lock().iter() {
            let current = slot.current.lock();
            if let Some(runner) = current.as_ref() {
                runner.interrupt();
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != PoolState::Running {
                return;
            }
            if lifecycle.live_workers == 0 {
                if self.queued_task_count() == 0 {
                    lifecycle.state = PoolState::Terminated;
                    self.terminated.notify_all();
                } else {
                    // Queued work but no workers; start one to drain it.
                    lifecycle.state = PoolState::ShuttingDown;
                    self.spawn_worker_locked(&mut lifecycle);
                }
            } else {
                lifecycle.state = PoolState::ShuttingDown;
            }
        }
        debug!("scheduler shutting down");
        self.wake_all();
    }

    fn shutdown_now(&self) -> Vec<DrainedTask> {
        let entries = {
            let mut lifecycle = self.lifecycle.lock();
            self.hard_stop.store(true, Ordering::Release);
            let mut entries = Vec::new();
            for priority in Priority::ALL {
                for entry in self.queues[priority.index()].drain() {
                    entries.push((priority, entry));
                }
            }
            match lifecycle.state {
                PoolState::Running | PoolState::ShuttingDown => {
                    if lifecycle.live_workers == 0 {
                        lifecycle.state = PoolState::Terminated;
                        self.terminated.notify_all();
                    } else {
                        lifecycle.state = PoolState::ShuttingDown;
                    }
                }
                PoolState::Terminated => {}
            }
            entries
        };

        // Outside the lifecycle lock: cancelling futures runs callbacks.
        self.interrupt_running();
        self.wake_all();

        let mut drained: Vec<DrainedTask> = entries
            .into_iter()
            .map(|(priority, entry)| {
                entry.runner.abandon();
                DrainedTask {
                    priority,
                    seq: entry.seq,
                }
            })
            .collect();
        drained.sort_by_key(DrainedTask::sequence);
        debug!(drained = drained.len(), "scheduler stopped immediately");
        drained
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let deadline = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(timeout));
        loop {
            if lifecycle.state == PoolState::Terminated {
                return true;
            }
            let now = self.clock.now_millis();
            if now >= deadline {
                return false;
            }
            let slice = self.wait_slice(deadline - now);
            self.terminated.wait_for(&mut lifecycle, slice);
        }
    }
}

impl CancelRegistry for PoolShared {
    fn remove_pending(&self, priority: Priority, seq: u64) -> bool {
        self.queues[priority.index()].remove(seq).is_some()
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Prioritized task scheduler over an elastic worker pool.
///
/// Cheap to clone; all clones drive the same pool. See the module docs for
/// the dispatch policy and lifecycle. Worker threads live until
/// [`shutdown`](Self::shutdown) or [`shutdown_now`](Self::shutdown_now) is
/// called; dropping every handle without shutting down leaves them parked.
///
/// # Example
///
/// ```
/// use taskforge::{PoolConfig, Priority, PriorityScheduler};
///
/// let scheduler = PriorityScheduler::new(PoolConfig::fixed(2)).unwrap();
/// let future = scheduler.submit(Priority::High, || 2 + 2).unwrap();
/// assert_eq!(future.get().unwrap(), 4);
/// scheduler.shutdown();
/// ```
#[derive(Clone)]
pub struct PriorityScheduler {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("queued", &self.shared.queued_task_count())
            .field("workers", &self.current_pool_size())
            .finish_non_exhaustive()
    }
}

impl PriorityScheduler {
    /// Creates a scheduler on the system clock.
    ///
    /// # Errors
    ///
    /// `BadArgument` when the config fails validation.
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a scheduler reading time from the given clock.
    ///
    /// # Errors
    ///
    /// `BadArgument` when the config fails validation.
    pub fn with_clock(config: PoolConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            shared: PoolShared::new(config, clock),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    pub(crate) fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    /// Runs `action` exactly once, as soon as a worker is available.
    ///
    /// No completion handle is returned; use [`submit`](Self::submit) when
    /// the caller needs one.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn execute<F>(&self, priority: Priority, action: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(priority, action).map(drop)
    }

    /// Submits a computation and returns its completion handle.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn submit<T, F>(&self, priority: Priority, payload: F) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedule(priority, Duration::ZERO, payload)
    }

    /// Submits a computation that becomes eligible after `delay`.
    ///
    /// A zero delay is equivalent to [`submit`](Self::submit).
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn schedule<T, F>(
        &self,
        priority: Priority,
        delay: Duration,
        payload: F,
    ) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let core = FutureCore::new(self.clock_handle());
        let runner = OneShotTask::new(Box::new(payload), Arc::clone(&core));
        let ready_at = self
            .shared
            .clock
            .now_millis()
            .saturating_add(duration_millis(delay));
        self.shared.submit_runner(runner, priority, ready_at)?;
        Ok(TaskFuture::from_core(core))
    }

    /// Schedules `action` to run repeatedly, each run becoming eligible
    /// `delay` after the previous run completes. The first run is eligible
    /// after `initial_delay`.
    ///
    /// The returned future stays pending across runs; it terminates through
    /// cancellation or when a run panics (failing the future).
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        priority: Priority,
        initial_delay: Duration,
        delay: Duration,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_recurring(
            priority,
            initial_delay,
            Recurrence::FixedDelay {
                delay_ms: duration_millis(delay),
            },
            action,
        )
    }

    /// Schedules `action` on a drift-free cadence: the n-th run is eligible
    /// at `first_run + n * period` regardless of how long runs take. Runs
    /// never overlap; after an overrun the late ticks fire back-to-back
    /// until the cadence catches up.
    ///
    /// # Errors
    ///
    /// `BadArgument` when `period` is zero; `PoolClosed` after shutdown.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        priority: Priority,
        initial_delay: Duration,
        period: Duration,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::bad_argument("fixed-rate period must be positive"));
        }
        self.schedule_recurring(
            priority,
            initial_delay,
            Recurrence::FixedRate {
                period_ms: duration_millis(period),
            },
            action,
        )
    }

    fn schedule_recurring<F>(
        &self,
        priority: Priority,
        initial_delay: Duration,
        recurrence: Recurrence,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        let core = FutureCore::new(self.clock_handle());
        let first_tick = self
            .shared
            .clock
            .now_millis()
            .saturating_add(duration_millis(initial_delay));
        let runner = RecurringTask::new(
            Box::new(action),
            Arc::clone(&core),
            Arc::downgrade(&self.shared),
            priority,
            recurrence,
            first_tick,
        );
        self.shared.submit_runner(runner, priority, first_tick)?;
        Ok(TaskFuture::from_core(core))
    }

    /// Removes a still-pending task from this scheduler's queues.
    ///
    /// Returns whether the task was found (true exactly once for a pending
    /// task). The task's future is left pending; use
    /// [`TaskFuture::cancel`] to both unqueue and complete it.
    pub fn remove<T: Send + 'static>(&self, future: &TaskFuture<T>) -> bool {
        let Some((registry, priority, seq)) = future.core().slot_info() else {
            return false;
        };
        let Some(registry) = registry.upgrade() else {
            return false;
        };
        let ours: Arc<dyn CancelRegistry> = Arc::clone(&self.shared) as Arc<dyn CancelRegistry>;
        if !std::ptr::addr_eq(Arc::as_ptr(&registry), Arc::as_ptr(&ours)) {
            return false;
        }
        self.shared.remove_pending(priority, seq)
    }

    /// Stops intake and lets queued work (including delayed tasks) drain.
    ///
    /// Idempotent; a no-op after [`shutdown_now`](Self::shutdown_now).
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Stops intake, discards all pending tasks (cancelling their futures),
    /// and interrupts running tasks. Returns the discarded tasks in
    /// submission order; tasks that had already started are not included.
    pub fn shutdown_now(&self) -> Vec<DrainedTask> {
        self.shared.shutdown_now()
    }

    /// Blocks until the pool is terminated or the timeout expires; returns
    /// whether termination was reached. A zero timeout is a probe.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.await_termination(timeout)
    }

    /// Whether the scheduler has stopped accepting submissions.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Whether every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.lifecycle.lock().state == PoolState::Terminated
    }

    /// Number of currently live workers.
    #[must_use]
    pub fn current_pool_size(&self) -> usize {
        self.shared.lifecycle.lock().live_workers
    }

    /// Number of pending tasks across all priorities.
    #[must_use]
    pub fn queued_task_count(&self) -> usize {
        self.shared.queued_task_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn submit_runs_payload_and_returns_value() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(2)).expect("pool");
        let future = scheduler.submit(Priority::High, || 21 * 2).expect("submit");
        assert_eq!(future.get().expect("value"), 42);
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn execute_runs_exactly_once() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        scheduler
            .execute(Priority::Low, move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .expect("execute");
        wait_until("action to run", || runs.load(Ordering::SeqCst) == 1);
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_honors_delay() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let start = Instant::now();
        let future = scheduler
            .schedule(Priority::High, Duration::from_millis(80), move || {
                Instant::now()
            })
            .expect("schedule");
        let ran_at = future.get().expect("value");
        assert!(
            ran_at.duration_since(start) >= Duration::from_millis(80),
            "task ran {:?} after submit",
            ran_at.duration_since(start)
        );
        scheduler.shutdown();
    }

    #[test]
    fn delayed_task_fires_on_manual_clock_advance() {
        let clock = Arc::new(ManualClock::new());
        let scheduler =
            PriorityScheduler::with_clock(PoolConfig::fixed(1), clock.clone()).expect("pool");
        let fired = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&fired);
        scheduler
            .schedule(Priority::High, Duration::from_millis(500), move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .expect("schedule");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0, "must not fire early");

        clock.advance(500);
        wait_until("delayed task to fire", || fired.load(Ordering::SeqCst) == 1);
        scheduler.shutdown();
    }

    #[test]
    fn equal_priority_dispatch_is_fifo() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let (sender, receiver) = mpsc::channel();
        // Occupy the single worker so the rest queue up behind it.
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker_gate = Arc::clone(&gate);
        scheduler
            .execute(Priority::Low, move || {
                drop(blocker_gate.lock());
            })
            .expect("blocker");

        for index in 0..6 {
            let sender = sender.clone();
            scheduler
                .execute(Priority::Low, move || {
                    sender.send(index).expect("record dispatch order");
                })
                .expect("submit");
        }
        drop(held);

        let observed: Vec<i32> = (0..6).map(|_| receiver.recv().expect("task ran")).collect();
        assert_eq!(observed, vec![0, 1, 2, 3, 4, 5]);
        scheduler.shutdown();
    }

    #[test]
    fn high_priority_overtakes_queued_low() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let (sender, receiver) = mpsc::channel::<&str>();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker_gate = Arc::clone(&gate);
        scheduler
            .execute(Priority::Low, move || {
                drop(blocker_gate.lock());
            })
            .expect("blocker");

        for _ in 0..4 {
            let sender = sender.clone();
            scheduler
                .execute(Priority::Low, move || {
                    sender.send("low").expect("record");
                })
                .expect("low");
        }
        let high_sender = sender.clone();
        scheduler
            .execute(Priority::High, move || {
                high_sender.send("high").expect("record");
            })
            .expect("high");
        drop(held);

        let first = receiver.recv().expect("first dispatch");
        assert_eq!(
            first, "high",
            "the high task must begin before any queued low task"
        );
        scheduler.shutdown();
    }

    #[test]
    fn high_flood_does_not_starve_low() {
        let config = PoolConfig::fixed(1).high_streak_limit(4);
        let scheduler = PriorityScheduler::new(config).expect("pool");
        let (sender, receiver) = mpsc::channel::<&str>();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker_gate = Arc::clone(&gate);
        scheduler
            .execute(Priority::Low, move || {
                drop(blocker_gate.lock());
            })
            .expect("blocker");

        for _ in 0..32 {
            let sender = sender.clone();
            scheduler
                .execute(Priority::High, move || {
                    sender.send("high").expect("record");
                })
                .expect("high");
        }
        let low_sender = sender.clone();
        scheduler
            .execute(Priority::Low, move || {
                low_sender.send("low").expect("record");
            })
            .expect("low");
        drop(held);

        // The low task must appear within the first streak-limit + 1
        // dispatches, not after all 32 high tasks.
        let mut position = None;
        for index in 0..33 {
            if receiver.recv().expect("dispatch") == "low" {
                position = Some(index);
                break;
            }
        }
        let position = position.expect("low task must run");
        assert!(
            position <= 4,
            "low task dispatched at position {position}, expected within the fairness bound"
        );
        scheduler.shutdown();
    }

    #[test]
    fn starvable_runs_only_when_nothing_else_is_ready() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let (sender, receiver) = mpsc::channel::<&str>();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker_gate = Arc::clone(&gate);
        scheduler
            .execute(Priority::Low, move || {
                drop(blocker_gate.lock());
            })
            .expect("blocker");

        let starvable_sender = sender.clone();
        scheduler
            .execute(Priority::Starvable, move || {
                starvable_sender.send("starvable").expect("record");
            })
            .expect("starvable");
        for _ in 0..3 {
            let sender = sender.clone();
            scheduler
                .execute(Priority::Low, move || {
                    sender.send("low").expect("record");
                })
                .expect("low");
        }
        drop(held);

        let order: Vec<&str> = (0..4).map(|_| receiver.recv().expect("dispatch")).collect();
        assert_eq!(order, vec!["low", "low", "low", "starvable"]);
        scheduler.shutdown();
    }

    #[test]
    fn cancel_before_run_prevents_execution() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let (started_tx, started_rx) = mpsc::channel();
        scheduler
            .execute(Priority::High, move || {
                started_tx.send(()).expect("signal start");
                thread::sleep(Duration::from_millis(200));
            })
            .expect("blocker");
        started_rx.recv().expect("blocker started");

        let ran = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&ran);
        let victim = scheduler
            .submit(Priority::High, move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");

        assert!(victim.cancel(false), "cancel of pending task must succeed");
        assert!(matches!(victim.get(), Err(Error::Cancelled)));

        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 0, "cancelled action must not run");
    }

    #[test]
    fn cancel_removes_entry_from_queue() {
        let clock = Arc::new(ManualClock::new());
        let scheduler =
            PriorityScheduler::with_clock(PoolConfig::fixed(1), clock).expect("pool");
        let future = scheduler
            .schedule(Priority::Low, Duration::from_millis(1_000), || ())
            .expect("schedule");
        wait_until("task to be queued", || scheduler.queued_task_count() == 1);
        assert!(future.cancel(false));
        assert_eq!(scheduler.queued_task_count(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn remove_unqueues_pending_task_exactly_once() {
        let clock = Arc::new(ManualClock::new());
        let scheduler =
            PriorityScheduler::with_clock(PoolConfig::fixed(1), clock).expect("pool");
        let future = scheduler
            .schedule(Priority::High, Duration::from_millis(1_000), || 1)
            .expect("schedule");
        wait_until("task to be queued", || scheduler.queued_task_count() == 1);

        assert!(scheduler.remove(&future), "first remove finds the task");
        assert!(!scheduler.remove(&future), "second remove must miss");
        assert_eq!(scheduler.queued_task_count(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        scheduler.shutdown();
        let result = scheduler.submit(Priority::High, || ());
        assert!(matches!(result, Err(Error::PoolClosed)));
    }

    #[test]
    fn shutdown_drains_queued_work() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counted = Arc::clone(&runs);
            scheduler
                .execute(Priority::Low, move || {
                    counted.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_terminated());
    }

    #[test]
    fn shutdown_now_returns_pending_and_never_runs_them() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let (started_tx, started_rx) = mpsc::channel();
        scheduler
            .execute(Priority::High, move || {
                started_tx.send(()).expect("signal start");
                thread::sleep(Duration::from_millis(300));
            })
            .expect("blocker");
        started_rx.recv().expect("blocker started");

        let runs = Arc::new(AtomicUsize::new(0));
        let mut futures = Vec::new();
        for _ in 0..5 {
            let counted = Arc::clone(&runs);
            futures.push(
                scheduler
                    .submit(Priority::Low, move || {
                        counted.fetch_add(1, Ordering::SeqCst);
                    })
                    .expect("submit"),
            );
        }

        let drained = scheduler.shutdown_now();
        assert_eq!(drained.len(), 5, "every pending task is returned");
        assert!(scheduler.await_termination(Duration::from_secs(2)));
        assert_eq!(runs.load(Ordering::SeqCst), 0, "no drained task may run");
        for future in &futures {
            assert!(future.is_cancelled());
        }

        // shutdown after shutdown_now is a no-op.
        scheduler.shutdown();
        assert!(scheduler.is_terminated());
    }

    #[test]
    fn worker_survives_panicking_payload() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let failing = scheduler
            .submit(Priority::High, || -> u32 { panic!("first task fails") })
            .expect("submit");
        let err = failing.get().expect_err("failed task");
        assert!(matches!(err, Error::ExecutionFailure(_)));

        let healthy = scheduler.submit(Priority::High, || 7).expect("submit");
        assert_eq!(healthy.get().expect("value"), 7);
        assert_eq!(scheduler.current_pool_size(), 1, "same worker keeps serving");
        scheduler.shutdown();
    }

    #[test]
    fn fixed_delay_reschedules_after_completion() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let future = scheduler
            .schedule_with_fixed_delay(
                Priority::High,
                Duration::ZERO,
                Duration::from_millis(10),
                move || {
                    counted.fetch_add(1, Ordering::SeqCst);
                },
            )
            .expect("schedule");

        wait_until("three runs", || runs.load(Ordering::SeqCst) >= 3);
        assert!(future.cancel(false), "recurring future cancels while pending");
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        let final_count = runs.load(Ordering::SeqCst);
        assert!(
            final_count <= after_cancel + 1,
            "recurrence must stop after cancellation ({after_cancel} -> {final_count})"
        );
        scheduler.shutdown();
    }

    #[test]
    fn fixed_rate_zero_period_is_rejected() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let result = scheduler.schedule_at_fixed_rate(
            Priority::High,
            Duration::ZERO,
            Duration::ZERO,
            || {},
        );
        assert!(matches!(result, Err(Error::BadArgument(_))));
        scheduler.shutdown();
    }

    #[test]
    fn fixed_rate_catches_up_without_drift() {
        let clock = Arc::new(ManualClock::new());
        let scheduler =
            PriorityScheduler::with_clock(PoolConfig::fixed(1), clock.clone()).expect("pool");
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&ticks);
        let tick_clock = Arc::clone(&clock);
        let future = scheduler
            .schedule_at_fixed_rate(
                Priority::High,
                Duration::ZERO,
                Duration::from_millis(100),
                move || {
                    recorded.lock().push(tick_clock.now_millis());
                },
            )
            .expect("schedule");

        wait_until("first tick", || ticks.lock().len() == 1);
        clock.advance(100);
        wait_until("second tick", || ticks.lock().len() == 2);
        // Jump three periods at once: the missed ticks fire back-to-back.
        clock.advance(300);
        wait_until("catch-up ticks", || ticks.lock().len() >= 5);

        future.cancel(false);
        scheduler.shutdown();
    }

    #[test]
    fn elastic_pool_grows_under_load_and_reports_size() {
        let config = PoolConfig::elastic(1, 4).keep_alive(Duration::from_millis(50));
        let scheduler = PriorityScheduler::new(config).expect("pool");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let started = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let rx = Arc::clone(&release_rx);
            let started = Arc::clone(&started);
            scheduler
                .execute(Priority::High, move || {
                    started.fetch_add(1, Ordering::SeqCst);
                    let _ = rx.lock().recv();
                })
                .expect("submit");
        }

        wait_until("pool to grow", || started.load(Ordering::SeqCst) == 4);
        assert_eq!(scheduler.current_pool_size(), 4);

        for _ in 0..4 {
            release_tx.send(()).expect("release worker");
        }
        // Idle non-core workers retire after the keep-alive.
        wait_until("pool to shrink", || scheduler.current_pool_size() == 1);
        scheduler.shutdown();
    }

    #[test]
    fn reentrant_submission_from_worker_does_not_deadlock() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        let inner_ran = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&inner_ran);
        let resubmitter = scheduler.clone();
        scheduler
            .execute(Priority::High, move || {
                resubmitter
                    .execute(Priority::High, move || {
                        counted.fetch_add(1, Ordering::SeqCst);
                    })
                    .expect("reentrant submit");
            })
            .expect("outer submit");

        wait_until("inner task to run", || inner_ran.load(Ordering::SeqCst) == 1);
        scheduler.shutdown();
    }

    #[test]
    fn await_termination_times_out_while_running() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(1)).expect("pool");
        scheduler.execute(Priority::High, || ()).expect("submit");
        assert!(!scheduler.await_termination(Duration::from_millis(30)));
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
    }
}
