//! Worker thread logic.
//!
//! Each worker repeatedly asks the pool for the next eligible entry and
//! runs it. When nothing is eligible the worker parks on its own [`Parker`]
//! with a timeout bounded by the earliest pending eligibility time and its
//! keep-alive budget; submissions unpark a parked worker. A worker that
//! stays idle past the keep-alive exits when the pool holds more than its
//! core worker count.
//!
//! Payload panics are caught inside the task runner and published through
//! the task's future, so they never unwind this loop. A panic in the loop
//! itself (an internal invariant violation) kills only this worker; the
//! pool starts a replacement.

use crate::pool::task::TaskRunner;
use crate::pool::PoolShared;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A permit-based parking primitive for one worker thread.
///
/// `unpark` leaves a permit that makes the next `park` return immediately,
/// so a wakeup delivered between the idle check and the actual sleep is
/// never lost. Repeated unparks coalesce into one permit.
#[derive(Clone)]
pub(crate) struct Parker {
    inner: Arc<ParkerInner>,
}

struct ParkerInner {
    notified: AtomicBool,
    lock: Mutex<()>,
    condvar: Arc<Condvar>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ParkerInner {
                notified: AtomicBool::new(false),
                lock: Mutex::new(()),
                condvar: Arc::new(Condvar::new()),
            }),
        }
    }

    /// The condvar used for sleeping; registered with virtual clocks so
    /// advancing test time wakes parked workers.
    pub(crate) fn condvar(&self) -> &Arc<Condvar> {
        &self.inner.condvar
    }

    #[inline]
    fn consume_permit(&self) -> bool {
        self.inner
            .notified
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Parks the current thread until unparked or the timeout elapses.
    pub(crate) fn park_timeout(&self, duration: Duration) {
        if self.consume_permit() || duration.is_zero() {
            return;
        }
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while !self.consume_permit() {
            if self
                .inner
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                // Consume a permit published during the final wakeup so it
                // does not leak into the next park.
                let _ = self.consume_permit();
                return;
            }
        }
    }

    /// Wakes the owning worker, or leaves a permit if it is not parked.
    pub(crate) fn unpark(&self) {
        if self
            .inner
            .notified
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // Already notified; the permit is still pending.
            return;
        }
        // Acquire the mutex before signalling to close the window where the
        // worker checked the permit but has not yet started waiting.
        let _guard = self.inner.lock.lock();
        self.inner.condvar.notify_one();
    }
}

impl std::fmt::Debug for Parker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parker")
            .field("notified", &self.inner.notified.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Shared per-worker state visible to the pool.
pub(crate) struct WorkerSlot {
    pub id: usize,
    pub parker: Parker,
    /// True while the worker is parked waiting for work; used to route
    /// wakeups to a worker that can actually act on them.
    pub idle: AtomicBool,
    /// The runner currently executing on this worker, for interrupt
    /// delivery on immediate shutdown.
    pub current: Mutex<Option<Arc<dyn TaskRunner>>>,
}

impl WorkerSlot {
    pub(crate) fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            parker: Parker::new(),
            idle: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }
}

/// Runs the worker loop. Returns true when the worker retired itself via
/// keep-alive (in which case pool bookkeeping already happened).
pub(crate) fn run_worker(shared: &Arc<PoolShared>, slot: &Arc<WorkerSlot>) -> bool {
    debug!(worker_id = slot.id, "worker started");
    // Bound on consecutive high-priority dispatches before a ready
    // low-priority task is served; resets whenever the worker parks.
    let mut high_streak: u32 = 0;
    let mut idle_since: Option<Instant> = None;

    loop {
        if shared.hard_stopped() {
            debug!(worker_id = slot.id, "worker stopping immediately");
            return false;
        }

        if let Some(entry) = shared.next_entry(&mut high_streak) {
            idle_since = None;
            trace!(worker_id = slot.id, seq = entry.seq, "dispatching task");
            *slot.current.lock() = Some(Arc::clone(&entry.runner));
            entry.runner.run();
            *slot.current.lock() = None;
            continue;
        }

        // Nothing eligible. During graceful shutdown the worker drains
        // until every queue is empty, then exits.
        if shared.is_shutting_down() && shared.queued_task_count() == 0 {
            debug!(worker_id = slot.id, "worker drained, stopping");
            return false;
        }

        let now = Instant::now();
        let idle_start = *idle_since.get_or_insert(now);
        let mut idle_elapsed = now.saturating_duration_since(idle_start);
        let keep_alive = shared.config().keep_alive;
        if idle_elapsed >= keep_alive {
            if shared.try_retire(slot) {
                debug!(worker_id = slot.id, "worker retired after keep-alive");
                return true;
            }
            // Core workers never retire; restart the idle window so the
            // park below sleeps a full keep-alive again.
            idle_since = Some(now);
            idle_elapsed = Duration::ZERO;
        }

        // Park until the earliest pending eligibility, the keep-alive
        // budget, or an unpark, whichever comes first.
        let mut park_for = keep_alive.saturating_sub(idle_elapsed);
        if let Some(ready_at) = shared.earliest_ready_at() {
            let remaining = ready_at.saturating_sub(shared.clock().now_millis());
            park_for = park_for.min(shared.wait_slice(remaining));
        }
        park_for = park_for.max(Duration::from_millis(1));

        high_streak = 0;
        slot.idle.store(true, Ordering::Release);
        slot.parker.park_timeout(park_for);
        slot.idle.store(false, Ordering::Release);
    }
}
