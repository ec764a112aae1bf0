//! taskforge: prioritized task scheduling with per-key concurrency limiting.
//!
//! The crate is built from three subsystems layered over a shared worker
//! pool:
//!
//! - [`PriorityScheduler`] — an elastic worker pool dispatching one-shot,
//!   delayed, and recurring tasks across three priority classes
//!   ([`Priority`]), with starvation-fair ordering between `High` and `Low`
//!   and a deliberately starvable background class.
//! - [`TaskFuture`] — the completion handle attached to every submission:
//!   blocking and timed `get`, cancellation with cooperative interruption,
//!   panic capture, and exactly-once completion callbacks.
//! - [`KeyedLimiter`] — a striped per-key gate over the scheduler that caps
//!   how many tasks sharing a routing key run concurrently, promoting
//!   queued tasks FIFO as slots free up.
//!
//! [`ScheduledExecutor`] adapts the scheduler to the plain
//! scheduled-executor shape, and [`clock::ManualClock`] lets tests drive
//! every timed behavior deterministically.
//!
//! # Example
//!
//! ```
//! use taskforge::{KeyedLimiter, PoolConfig, Priority, PriorityScheduler};
//! use std::time::Duration;
//!
//! let scheduler = PriorityScheduler::new(PoolConfig::elastic(2, 8)).unwrap();
//!
//! // Plain prioritized submission.
//! let answer = scheduler.submit(Priority::High, || 6 * 7).unwrap();
//! assert_eq!(answer.get().unwrap(), 42);
//!
//! // At most two concurrent tasks per tenant, drawn from the same pool.
//! let limiter = KeyedLimiter::new(scheduler.clone(), 2).unwrap();
//! let report = limiter
//!     .submit("tenant-7", Priority::Low, || "report generated")
//!     .unwrap();
//! assert_eq!(report.get().unwrap(), "report generated");
//!
//! scheduler.shutdown();
//! assert!(scheduler.await_termination(Duration::from_secs(5)));
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
mod future;
pub mod limiter;
pub mod pool;
mod priority;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, PoolConfig};
pub use error::{Error, ErrorKind};
pub use executor::ScheduledExecutor;
pub use future::{TaskFuture, TaskOutcome};
pub use limiter::{KeyedLimiter, KeyedSubmitter};
pub use pool::{DrainedTask, PriorityScheduler};
pub use priority::Priority;
