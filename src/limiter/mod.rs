//! Keyed concurrency limiting on top of a backing scheduler.
//!
//! [`KeyedLimiter`] guarantees that at most `max_concurrency_per_key` tasks
//! sharing a routing key execute concurrently, across any number of keys,
//! while all tasks draw workers from the backing
//! [`PriorityScheduler`](crate::PriorityScheduler).
//!
//! # Structure
//!
//! The key-to-gate map is striped: a key hashes to one of a power-of-two
//! number of stripes and map operations take only that stripe's lock, so
//! stripes bound contention without affecting correctness. Each key's
//! [`LimiterContainer`] holds the running count, a FIFO queue of tasks that
//! were ready but blocked by the cap, and an atomic `handling` counter of
//! everything in flight for the key (running + waiting + delayed).
//!
//! Submitters never block on the per-key cap; a task over the cap is
//! enqueued and promoted when a slot frees. The post-run release (decrement
//! the running count, promote one waiter, decrement `handling`) runs
//! unconditionally, including when the payload panicked.
//!
//! # Container lifecycle
//!
//! Containers are created lazily on first submission and evicted with a
//! two-phase pattern: when `handling` drops to zero the container is marked
//! removable, and it is actually unlinked only while holding the stripe
//! lock with the count still at zero. An insert that finds a marked
//! container either revives it (count non-zero would be a bug) or replaces
//! it, so the mark can never strand a task.
//!
//! # Lock order
//!
//! `stripe -> gate`. Nothing acquires a stripe lock while holding a gate
//! lock, and no path holds two stripes or two gates at once.

use crate::config::LimiterConfig;
use crate::error::{panic_message, Error};
use crate::future::{CancelRegistry, FutureCore, TaskFuture, TaskOutcome};
use crate::pool::task::{OneShotTask, TaskRunner};
use crate::pool::{duration_millis, PriorityScheduler};
use crate::priority::Priority;
use parking_lot::Mutex;
use std::collections::hash_map::{Entry, RandomState};
use std::collections::{HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::trace;

/// A task admitted to a key's gate: its runner and submission priority.
struct Waiting {
    runner: Arc<dyn TaskRunner>,
    priority: Priority,
}

struct Gate {
    /// Tasks currently executing for this key.
    active: usize,
    /// Ready tasks blocked by the concurrency cap, FIFO.
    waiting: VecDeque<Waiting>,
}

/// Per-key gate state. See the module docs for the lifecycle.
struct LimiterContainer<K> {
    key: K,
    stripe: usize,
    max: usize,
    /// running + waiting + delayed tasks for this key.
    handling: AtomicUsize,
    /// Two-phase eviction mark; see the module docs.
    removable: AtomicBool,
    gate: Mutex<Gate>,
}

impl<K> LimiterContainer<K> {
    fn new(key: K, stripe: usize, max: usize) -> Arc<Self> {
        Arc::new(Self {
            key,
            stripe,
            max,
            handling: AtomicUsize::new(0),
            removable: AtomicBool::new(false),
            gate: Mutex::new(Gate {
                active: 0,
                waiting: VecDeque::new(),
            }),
        })
    }
}

struct Stripe<K> {
    map: Mutex<HashMap<K, Arc<LimiterContainer<K>>>>,
}

struct LimiterInner<K> {
    pool: PriorityScheduler,
    max_per_key: usize,
    stripes: Box<[Stripe<K>]>,
    mask: usize,
    hasher: RandomState,
    /// Weak self-reference captured into wrapper closures and gate entries.
    self_weak: std::sync::OnceLock<Weak<LimiterInner<K>>>,
}

impl<K> LimiterInner<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn stripe_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask
    }

    /// Strong self-handle; valid whenever a `&self` exists.
    fn self_arc(&self) -> Arc<LimiterInner<K>> {
        self.self_weak
            .get()
            .expect("self reference initialized at construction")
            .upgrade()
            .expect("limiter outlives its borrows")
    }

    /// Finds or creates the container for `key`, counting the new task into
    /// `handling` under the stripe lock.
    fn resolve(&self, key: &K) -> Arc<LimiterContainer<K>> {
        let stripe = self.stripe_index(key);
        let mut map = self.stripes[stripe].map.lock();
        match map.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = Arc::clone(occupied.get());
                if existing.removable.load(Ordering::SeqCst)
                    && existing.handling.load(Ordering::SeqCst) == 0
                {
                    // Marked removable and truly idle: replace rather than
                    // race the pending eviction.
                    let fresh = LimiterContainer::new(key.clone(), stripe, self.max_per_key);
                    fresh.handling.store(1, Ordering::SeqCst);
                    occupied.insert(Arc::clone(&fresh));
                    fresh
                } else {
                    existing.removable.store(false, Ordering::SeqCst);
                    existing.handling.fetch_add(1, Ordering::SeqCst);
                    existing
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = LimiterContainer::new(key.clone(), stripe, self.max_per_key);
                fresh.handling.store(1, Ordering::SeqCst);
                vacant.insert(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// Runs `waiting` now if the key has a free slot, otherwise queues it.
    fn admit(
        &self,
        container: &Arc<LimiterContainer<K>>,
        waiting: Waiting,
    ) -> Result<(), Error> {
        let waiting = {
            let mut gate = container.gate.lock();
            if gate.active < container.max {
                gate.active += 1;
                waiting
            } else {
                gate.waiting.push_back(waiting);
                return Ok(());
            }
        };
        match self.spawn_wrapper(container, waiting) {
            Ok(()) => Ok(()),
            Err(error) => {
                container.gate.lock().active -= 1;
                self.finish_task(container);
                Err(error)
            }
        }
    }

    /// Hands one admitted task to the backing pool wrapped in a
    /// [`GateRunTask`] that runs the payload and then releases the key's
    /// slot. On error the task's future is cancelled; the caller unwinds
    /// the gate counts.
    fn spawn_wrapper(
        &self,
        container: &Arc<LimiterContainer<K>>,
        waiting: Waiting,
    ) -> Result<(), Error> {
        let Waiting { runner, priority } = waiting;
        let entry = Arc::new(GateRunTask {
            inner: self.self_arc(),
            container: Arc::clone(container),
            token: runner.future_token(),
            payload: Mutex::new(Some(runner)),
        });
        let entry_handle = Arc::clone(&entry);
        let shared = self.pool.shared();
        let ready_at = shared.clock().now_millis();
        match shared.submit_runner(entry, priority, ready_at) {
            Ok(_) => Ok(()),
            Err(error) => {
                // Consume the payload so the entry's drop bookkeeping stays
                // quiet; the caller rolls the gate counts back.
                if let Some(runner) = entry_handle.take_payload() {
                    runner.abandon();
                }
                Err(error)
            }
        }
    }

    /// Releases the finishing task's slot and promotes one waiter.
    ///
    /// Promotion happens regardless of how the finishing task ended; a
    /// waiter whose hand-off to the pool fails releases its slot through
    /// the same loop so the remaining waiters are not stranded.
    fn release_slot(&self, container: &Arc<LimiterContainer<K>>) {
        loop {
            let next = {
                let mut gate = container.gate.lock();
                gate.active -= 1;
                match gate.waiting.pop_front() {
                    Some(waiting) => {
                        gate.active += 1;
                        Some(waiting)
                    }
                    None => None,
                }
            };
            let Some(waiting) = next else { break };
            trace!(stripe = container.stripe, "promoting queued keyed task");
            match self.spawn_wrapper(container, waiting) {
                Ok(()) => break,
                Err(_) => {
                    // The promoted task is finished too; loop to release
                    // its slot and try the next waiter.
                    self.finish_task(container);
                }
            }
        }
        self.finish_task(container);
    }

    /// Counts one task out of the container, marking and attempting
    /// eviction when the container goes idle.
    fn finish_task(&self, container: &Arc<LimiterContainer<K>>) {
        if container.handling.fetch_sub(1, Ordering::SeqCst) == 1 {
            container.removable.store(true, Ordering::SeqCst);
            self.try_evict(container);
        }
    }

    /// Second phase of eviction: unlink the container while holding the
    /// stripe lock, only if it is still idle and still the mapped one.
    fn try_evict(&self, container: &Arc<LimiterContainer<K>>) {
        let mut map = self.stripes[container.stripe].map.lock();
        if container.handling.load(Ordering::SeqCst) != 0
            || !container.removable.load(Ordering::SeqCst)
        {
            return;
        }
        if let Some(current) = map.get(&container.key) {
            if Arc::ptr_eq(current, container) {
                trace!(stripe = container.stripe, "evicting idle key container");
                map.remove(&container.key);
            }
        }
    }

    /// Single intake path for keyed tasks, delayed or not.
    fn submit_runner(
        &self,
        key: K,
        runner: Arc<dyn TaskRunner>,
        priority: Priority,
        delay: Duration,
    ) -> Result<(), Error> {
        let container = self.resolve(&key);
        let delay_ms = duration_millis(delay);
        if delay_ms == 0 {
            return self.admit(&container, Waiting { runner, priority });
        }

        // Delayed tasks sit in the backing pool's delay queue wrapped in a
        // gate entry that re-enters the gate when it fires.
        let entry = Arc::new(GateEntryTask {
            inner: Arc::downgrade(&self.self_arc()),
            container: Arc::clone(&container),
            token: runner.future_token(),
            payload: Mutex::new(Some(Waiting { runner, priority })),
        });
        let entry_handle = Arc::clone(&entry);
        let shared = self.pool.shared();
        let ready_at = shared.clock().now_millis().saturating_add(delay_ms);
        match shared.submit_runner(entry, priority, ready_at) {
            Ok(_) => Ok(()),
            Err(error) => {
                entry_handle.abandon();
                Err(error)
            }
        }
    }
}

/// An admitted keyed task on its way through the backing pool: runs the
/// payload, then releases the key's slot and promotes one waiter.
///
/// The slot release is tied to this entry's lifetime so it happens exactly
/// once on every exit path: a normal run, abandonment by immediate
/// shutdown, or silent unqueueing when the task's future is cancelled
/// while the entry sits in the pool's queue.
struct GateRunTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Arc<LimiterInner<K>>,
    container: Arc<LimiterContainer<K>>,
    token: u64,
    payload: Mutex<Option<Arc<dyn TaskRunner>>>,
}

impl<K> GateRunTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn take_payload(&self) -> Option<Arc<dyn TaskRunner>> {
        self.payload.lock().take()
    }
}

impl<K> TaskRunner for GateRunTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn run(self: Arc<Self>) {
        let Some(runner) = self.take_payload() else {
            return;
        };
        // The payload catches its own panics, so the release below always
        // happens, including for a payload that threw.
        runner.run();
        self.inner.release_slot(&self.container);
    }

    fn abandon(&self) {
        let Some(runner) = self.take_payload() else {
            return;
        };
        runner.abandon();
        self.inner.release_slot(&self.container);
    }

    fn interrupt(&self) {
        let payload = self.payload.lock();
        if let Some(runner) = payload.as_ref() {
            runner.interrupt();
        }
    }

    fn future_token(&self) -> u64 {
        self.token
    }

    fn bind(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64) {
        let payload = self.payload.lock();
        if let Some(runner) = payload.as_ref() {
            runner.bind(registry, priority, seq);
        }
    }
}

impl<K> Drop for GateRunTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Silent-unqueue path: the entry left the pool queue without
        // running (cancellation removal or queue teardown). Release the
        // slot without touching the future.
        if self.payload.get_mut().take().is_some() {
            self.inner.release_slot(&self.container);
        }
    }
}

/// A delayed keyed task parked in the backing pool until its delay elapses,
/// then re-entering the key's gate.
///
/// Cleanup of the key's `handling` count is tied to this entry's lifetime:
/// whether it fires, is abandoned by immediate shutdown, or is silently
/// unqueued by cancellation, the count is released exactly once.
struct GateEntryTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Weak<LimiterInner<K>>,
    container: Arc<LimiterContainer<K>>,
    token: u64,
    payload: Mutex<Option<Waiting>>,
}

impl<K> GateEntryTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn cleanup(&self, cancel_future: bool) {
        let Some(waiting) = self.payload.lock().take() else {
            return;
        };
        if cancel_future {
            waiting.runner.abandon();
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.finish_task(&self.container);
        } else if self.container.handling.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.container.removable.store(true, Ordering::SeqCst);
        }
    }
}

impl<K> TaskRunner for GateEntryTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn run(self: Arc<Self>) {
        let Some(waiting) = self.payload.lock().take() else {
            return;
        };
        match self.inner.upgrade() {
            Some(inner) => {
                // admit releases the counts itself on failure.
                let _ = inner.admit(&self.container, waiting);
            }
            None => {
                waiting.runner.abandon();
                if self.container.handling.fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.container.removable.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn abandon(&self) {
        self.cleanup(true);
    }

    fn interrupt(&self) {
        let payload = self.payload.lock();
        if let Some(waiting) = payload.as_ref() {
            waiting.runner.interrupt();
        }
    }

    fn future_token(&self) -> u64 {
        self.token
    }

    fn bind(&self, registry: Weak<dyn CancelRegistry>, priority: Priority, seq: u64) {
        // Bind the user's future to this entry's queue position so
        // cancelling the future unqueues the delayed entry.
        let payload = self.payload.lock();
        if let Some(waiting) = payload.as_ref() {
            waiting.runner.bind(registry, priority, seq);
        }
    }
}

impl<K> Drop for GateEntryTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Covers the silent-unqueue paths (cancellation removal, queue
        // teardown): release the handling count without touching the
        // future.
        let Some(_waiting) = self.payload.get_mut().take() else {
            return;
        };
        if let Some(inner) = self.inner.upgrade() {
            inner.finish_task(&self.container);
        } else if self.container.handling.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.container.removable.store(true, Ordering::SeqCst);
        }
    }
}

/// Recurring action bound to a key: after each completed run it re-enters
/// the gate `delay` later, so every cycle honors the per-key cap.
struct GateRecurringTask<K> {
    inner: Weak<LimiterInner<K>>,
    key: K,
    core: Arc<FutureCore<()>>,
    action: Mutex<Option<Box<dyn FnMut() + Send>>>,
    priority: Priority,
    delay: Duration,
}

impl<K> TaskRunner for GateRecurringTask<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn run(self: Arc<Self>) {
        if !self.core.is_pending() {
            return;
        }
        let Some(mut action) = self.action.lock().take() else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| action())) {
            let message = panic_message(panic.as_ref());
            self.core
                .complete(TaskOutcome::Failed(Error::execution_failure(message)));
            return;
        }
        if !self.core.is_pending() {
            return;
        }
        if self.core.is_interrupted() {
            self.core.cancel(false);
            return;
        }
        *self.action.lock() = Some(action);

        let Some(inner) = self.inner.upgrade() else {
            self.core.cancel(false);
            return;
        };
        let runner: Arc<dyn TaskRunner> = Arc::clone(&self) as Arc<dyn TaskRunner>;
        if inner
            .submit_runner(self.key.clone(), runner, self.priority, self.delay)
            .is_err()
        {
            self.core.cancel(false);
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

/// Per-key concurrency limiter over a backing [`PriorityScheduler`].
///
/// Cheap to clone; all clones share the same gates.
///
/// # Example
///
/// ```
/// use taskforge::{KeyedLimiter, PoolConfig, Priority, PriorityScheduler};
///
/// let scheduler = PriorityScheduler::new(PoolConfig::fixed(4)).unwrap();
/// let limiter = KeyedLimiter::new(scheduler.clone(), 2).unwrap();
/// let future = limiter
///     .submit("tenant-a", Priority::Low, || "done")
///     .unwrap();
/// assert_eq!(future.get().unwrap(), "done");
/// scheduler.shutdown();
/// ```
pub struct KeyedLimiter<K> {
    inner: Arc<LimiterInner<K>>,
}

impl<K> Clone for KeyedLimiter<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> std::fmt::Debug for KeyedLimiter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLimiter")
            .field("max_concurrency_per_key", &self.inner.max_per_key)
            .field("stripes", &self.inner.stripes.len())
            .finish_non_exhaustive()
    }
}

impl<K> KeyedLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a limiter with the given per-key cap and default striping.
    ///
    /// # Errors
    ///
    /// `BadArgument` when `max_concurrency_per_key` is zero.
    pub fn new(scheduler: PriorityScheduler, max_concurrency_per_key: usize) -> Result<Self, Error> {
        Self::with_config(
            scheduler,
            LimiterConfig::with_max_concurrency(max_concurrency_per_key),
        )
    }

    /// Creates a limiter from a full [`LimiterConfig`].
    ///
    /// # Errors
    ///
    /// `BadArgument` when the config fails validation.
    pub fn with_config(scheduler: PriorityScheduler, config: LimiterConfig) -> Result<Self, Error> {
        config.validate()?;
        let stripe_count = config.stripes.next_power_of_two();
        let stripes = (0..stripe_count)
            .map(|_| Stripe {
                map: Mutex::new(HashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let inner = Arc::new(LimiterInner {
            pool: scheduler,
            max_per_key: config.max_concurrency_per_key,
            stripes,
            mask: stripe_count - 1,
            hasher: RandomState::new(),
            self_weak: std::sync::OnceLock::new(),
        });
        inner
            .self_weak
            .set(Arc::downgrade(&inner))
            .unwrap_or_else(|_| unreachable!("self reference initialized once"));
        Ok(Self { inner })
    }

    /// The per-key concurrency cap.
    #[must_use]
    pub fn max_concurrency_per_key(&self) -> usize {
        self.inner.max_per_key
    }

    /// Runs `action` under `key`'s concurrency cap; no completion handle.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn execute<F>(&self, key: K, priority: Priority, action: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(key, priority, action).map(drop)
    }

    /// Submits a computation under `key`'s concurrency cap.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn submit<T, F>(&self, key: K, priority: Priority, payload: F) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedule(key, priority, Duration::ZERO, payload)
    }

    /// Submits a computation that enters `key`'s gate after `delay`.
    ///
    /// The delay elapses in the backing pool's delay queue; the per-key
    /// accounting covers the delayed phase, so a burst of delayed tasks
    /// still respects the cap when it fires.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn schedule<T, F>(
        &self,
        key: K,
        priority: Priority,
        delay: Duration,
        payload: F,
    ) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let core = FutureCore::new(self.inner.pool.clock_handle());
        let runner = OneShotTask::new(Box::new(payload), Arc::clone(&core));
        self.inner.submit_runner(key, runner, priority, delay)?;
        Ok(TaskFuture::from_core(core))
    }

    /// Schedules `action` to run repeatedly under `key`'s cap, each cycle
    /// re-entering the gate `delay` after the previous run completes. The
    /// first run enters after `initial_delay`.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        key: K,
        priority: Priority,
        initial_delay: Duration,
        delay: Duration,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        let core = FutureCore::new(self.inner.pool.clock_handle());
        let runner = Arc::new(GateRecurringTask {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            core: Arc::clone(&core),
            action: Mutex::new(Some(Box::new(action))),
            priority,
            delay,
        });
        self.inner
            .submit_runner(key, runner, priority, initial_delay)?;
        Ok(TaskFuture::from_core(core))
    }

    /// Removes a task still waiting in some key's queue.
    ///
    /// Scans every container's waiting queue; returns whether the task was
    /// found (true exactly once). The task's future is left pending, as
    /// with [`PriorityScheduler::remove`].
    pub fn remove<T: Send + 'static>(&self, future: &TaskFuture<T>) -> bool {
        let token = future.core().token();
        let mut matched: Option<Arc<LimiterContainer<K>>> = None;
        'scan: for stripe in self.inner.stripes.iter() {
            let map = stripe.map.lock();
            for container in map.values() {
                let mut gate = container.gate.lock();
                if let Some(position) = gate
                    .waiting
                    .iter()
                    .position(|waiting| waiting.runner.future_token() == token)
                {
                    gate.waiting.remove(position);
                    matched = Some(Arc::clone(container));
                    break 'scan;
                }
            }
        }
        match matched {
            Some(container) => {
                self.inner.finish_task(&container);
                true
            }
            None => false,
        }
    }

    /// Number of keys currently holding a container.
    #[must_use]
    pub fn tracked_key_count(&self) -> usize {
        self.inner
            .stripes
            .iter()
            .map(|stripe| stripe.map.lock().len())
            .sum()
    }

    /// Number of tasks queued behind `key`'s cap (not yet handed to the
    /// backing pool).
    #[must_use]
    pub fn unsubmitted_task_count(&self, key: &K) -> usize {
        let stripe = self.inner.stripe_index(key);
        let map = self.inner.stripes[stripe].map.lock();
        map.get(key)
            .map_or(0, |container| container.gate.lock().waiting.len())
    }

    /// A submitter with every operation pre-bound to `key` — a projection
    /// of this limiter, not a new pool.
    #[must_use]
    pub fn submitter_for_key(&self, key: K) -> KeyedSubmitter<K> {
        KeyedSubmitter {
            limiter: self.clone(),
            key,
        }
    }
}

/// All limiter operations pre-bound to one key.
#[derive(Clone)]
pub struct KeyedSubmitter<K> {
    limiter: KeyedLimiter<K>,
    key: K,
}

impl<K> std::fmt::Debug for KeyedSubmitter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedSubmitter").finish_non_exhaustive()
    }
}

impl<K> KeyedSubmitter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Runs `action` under the bound key's cap; no completion handle.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn execute<F>(&self, priority: Priority, action: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.limiter.execute(self.key.clone(), priority, action)
    }

    /// Submits a computation under the bound key's cap.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
    pub fn submit<T, F>(&self, priority: Priority, payload: F) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.limiter.submit(self.key.clone(), priority, payload)
    }

    /// Submits a delayed computation under the bound key's cap.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
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
        self.limiter
            .schedule(self.key.clone(), priority, delay, payload)
    }

    /// Schedules a fixed-delay recurring action under the bound key's cap.
    ///
    /// # Errors
    ///
    /// `PoolClosed` when the backing scheduler is shut down.
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
        self.limiter.schedule_with_fixed_delay(
            self.key.clone(),
            priority,
            initial_delay,
            delay,
            action,
        )
    }
}
