//! Generic scheduled-executor adapter.
//!
//! [`ScheduledExecutor`] projects a [`PriorityScheduler`] behind the plain
//! scheduled-executor shape most callers want: every submission uses a
//! default priority chosen at construction time, and the lifecycle surface
//! (`shutdown`, `shutdown_now`, `await_termination`) forwards to the
//! underlying pool.

use crate::error::Error;
use crate::future::TaskFuture;
use crate::pool::{DrainedTask, PriorityScheduler};
use crate::priority::Priority;
use std::time::Duration;

/// A [`PriorityScheduler`] behind the generic scheduled-executor contract.
///
/// Cheap to clone; clones share the underlying pool.
#[derive(Debug, Clone)]
pub struct ScheduledExecutor {
    scheduler: PriorityScheduler,
    default_priority: Priority,
}

impl ScheduledExecutor {
    /// Wraps `scheduler`, submitting everything at [`Priority::High`].
    #[must_use]
    pub fn new(scheduler: PriorityScheduler) -> Self {
        Self::with_priority(scheduler, Priority::High)
    }

    /// Wraps `scheduler` with an explicit default priority.
    #[must_use]
    pub fn with_priority(scheduler: PriorityScheduler, default_priority: Priority) -> Self {
        Self {
            scheduler,
            default_priority,
        }
    }

    /// The priority applied to every submission through this adapter.
    #[must_use]
    pub fn default_priority(&self) -> Priority {
        self.default_priority
    }

    /// Runs `action` once; no completion handle.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn execute<F>(&self, action: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.execute(self.default_priority, action)
    }

    /// Submits an action and returns a completion handle.
    ///
    /// Unlike [`execute`](Self::execute) the caller can wait on, cancel,
    /// or attach callbacks to the run; the future completes with `()`.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn submit_action<F>(&self, action: F) -> Result<TaskFuture<()>, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.submit(self.default_priority, action)
    }

    /// Submits a computation and returns its completion handle.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn submit<T, F>(&self, payload: F) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.scheduler.submit(self.default_priority, payload)
    }

    /// Submits a computation that becomes eligible after `delay`.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn schedule<T, F>(&self, delay: Duration, payload: F) -> Result<TaskFuture<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.scheduler.schedule(self.default_priority, delay, payload)
    }

    /// Recurring action re-queued `delay` after each run completes.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.scheduler
            .schedule_with_fixed_delay(self.default_priority, initial_delay, delay, action)
    }

    /// Recurring action on a drift-free cadence.
    ///
    /// # Errors
    ///
    /// `BadArgument` when `period` is zero; `PoolClosed` after shutdown.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        action: F,
    ) -> Result<TaskFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.scheduler
            .schedule_at_fixed_rate(self.default_priority, initial_delay, period, action)
    }

    /// Submits every payload, waits for all of them to reach a terminal
    /// state, and returns their futures in input order.
    ///
    /// Individual failures and cancellations are reported through each
    /// future's `get`, not as an error from this call.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after shutdown; in that case none of the remaining
    /// payloads is submitted.
    pub fn invoke_all<T>(
        &self,
        payloads: Vec<Box<dyn FnOnce() -> T + Send>>,
    ) -> Result<Vec<TaskFuture<T>>, Error>
    where
        T: Send + 'static,
    {
        let mut futures = Vec::with_capacity(payloads.len());
        for payload in payloads {
            futures.push(self.scheduler.submit(self.default_priority, payload)?);
        }
        for future in &futures {
            future.wait(None);
        }
        Ok(futures)
    }

    /// Stops intake and drains queued work.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Stops intake and discards pending work; see
    /// [`PriorityScheduler::shutdown_now`].
    pub fn shutdown_now(&self) -> Vec<DrainedTask> {
        self.scheduler.shutdown_now()
    }

    /// Whether submissions are no longer accepted.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.scheduler.is_shutdown()
    }

    /// Whether every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.scheduler.is_terminated()
    }

    /// Waits for termination; returns whether it was reached in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.scheduler.await_termination(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn executor() -> ScheduledExecutor {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(2)).expect("pool");
        ScheduledExecutor::new(scheduler)
    }

    #[test]
    fn submit_uses_default_priority_surface() {
        let executor = executor();
        assert_eq!(executor.default_priority(), Priority::High);
        let future = executor.submit(|| 5).expect("submit");
        assert_eq!(future.get().expect("value"), 5);
        executor.shutdown();
        assert!(executor.await_termination(Duration::from_secs(5)));
        assert!(executor.is_terminated());
    }

    #[test]
    fn submit_action_completes_with_unit() {
        let executor = executor();
        let ran = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&ran);
        let future = executor
            .submit_action(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit_action");
        future.get().expect("action future completes");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        executor.shutdown();
    }

    #[test]
    fn invoke_all_returns_when_every_task_is_terminal() {
        let executor = executor();
        let completed = Arc::new(AtomicUsize::new(0));

        let payloads: Vec<Box<dyn FnOnce() -> usize + Send>> = (0..6)
            .map(|index| {
                let completed = Arc::clone(&completed);
                Box::new(move || {
                    completed.fetch_add(1, Ordering::SeqCst);
                    index
                }) as Box<dyn FnOnce() -> usize + Send>
            })
            .collect();

        let futures = executor.invoke_all(payloads).expect("invoke_all");
        assert_eq!(completed.load(Ordering::SeqCst), 6);
        let values: Vec<usize> = futures
            .iter()
            .map(|future| future.get().expect("value"))
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
        executor.shutdown();
    }

    #[test]
    fn invoke_all_reports_individual_failures_via_futures() {
        let executor = executor();
        let payloads: Vec<Box<dyn FnOnce() -> u32 + Send>> = vec![
            Box::new(|| 1),
            Box::new(|| panic!("middle payload fails")),
            Box::new(|| 3),
        ];
        let futures = executor.invoke_all(payloads).expect("invoke_all");
        assert_eq!(futures[0].get().expect("value"), 1);
        assert!(futures[1].get().is_err());
        assert_eq!(futures[2].get().expect("value"), 3);
        executor.shutdown();
    }

    #[test]
    fn lifecycle_surface_forwards_to_the_pool() {
        let executor = executor();
        assert!(!executor.is_shutdown());
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(matches!(executor.execute(|| ()), Err(Error::PoolClosed)));
        assert!(executor.await_termination(Duration::from_secs(5)));

        // shutdown_now after termination returns nothing.
        assert!(executor.shutdown_now().is_empty());
    }
}
