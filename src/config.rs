//! Configuration and tuning for the scheduler and the keyed limiter.
//!
//! Both config types carry sensible defaults, builder-style setters, and an
//! explicit [`validate`](PoolConfig::validate) step that rejects
//! inconsistent values before any thread is spawned.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default idle time after which a non-core worker exits.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Default bound on consecutive high-priority dispatches before a ready
/// low-priority task is served unconditionally.
pub const DEFAULT_HIGH_STREAK_LIMIT: u32 = 4;

/// Default number of lock stripes in the keyed limiter's container map.
pub const DEFAULT_LIMITER_STRIPES: usize = 16;

/// Worker pool configuration for [`PriorityScheduler`](crate::PriorityScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Workers kept alive regardless of idle time. Must be at least 1.
    pub core_pool_size: usize,
    /// Upper bound on concurrently live workers. Must be >= `core_pool_size`.
    pub max_pool_size: usize,
    /// Idle duration after which a worker beyond the core size exits.
    pub keep_alive: Duration,
    /// Consecutive high-priority dispatches allowed before a ready
    /// low-priority task preempts the next pick. Must be at least 1.
    pub high_streak_limit: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(4, usize::from);
        Self {
            core_pool_size: parallelism,
            max_pool_size: parallelism,
            keep_alive: DEFAULT_KEEP_ALIVE,
            high_streak_limit: DEFAULT_HIGH_STREAK_LIMIT,
        }
    }
}

impl PoolConfig {
    /// A fixed pool of exactly `size` workers.
    #[must_use]
    pub fn fixed(size: usize) -> Self {
        Self {
            core_pool_size: size,
            max_pool_size: size,
            ..Self::default()
        }
    }

    /// A single-worker pool; useful for strictly sequential dispatch.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self::fixed(1)
    }

    /// An elastic pool growing from `core` up to `max` workers under load.
    #[must_use]
    pub fn elastic(core: usize, max: usize) -> Self {
        Self {
            core_pool_size: core,
            max_pool_size: max,
            ..Self::default()
        }
    }

    /// Overrides the keep-alive idle timeout.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Overrides the consecutive high-priority dispatch bound.
    #[must_use]
    pub fn high_streak_limit(mut self, limit: u32) -> Self {
        self.high_streak_limit = limit;
        self
    }

    /// Validates invariants between the configured values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.core_pool_size == 0 {
            return Err(Error::bad_argument("core_pool_size must be at least 1"));
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(Error::bad_argument(
                "max_pool_size must be >= core_pool_size",
            ));
        }
        if self.high_streak_limit == 0 {
            return Err(Error::bad_argument("high_streak_limit must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for [`KeyedLimiter`](crate::KeyedLimiter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum tasks concurrently executing per routing key.
    pub max_concurrency_per_key: usize,
    /// Number of lock stripes in the key map. Rounded up to a power of two.
    /// Governs contention, not correctness.
    pub stripes: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrency_per_key: 1,
            stripes: DEFAULT_LIMITER_STRIPES,
        }
    }
}

impl LimiterConfig {
    /// Config with the given per-key concurrency cap and default striping.
    #[must_use]
    pub fn with_max_concurrency(max_concurrency_per_key: usize) -> Self {
        Self {
            max_concurrency_per_key,
            ..Self::default()
        }
    }

    /// Overrides the stripe count.
    #[must_use]
    pub fn stripes(mut self, stripes: usize) -> Self {
        self.stripes = stripes;
        self
    }

    /// Validates invariants between the configured values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrency_per_key == 0 {
            return Err(Error::bad_argument(
                "max_concurrency_per_key must be at least 1",
            ));
        }
        if self.stripes == 0 {
            return Err(Error::bad_argument("stripes must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn default_pool_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn profiles_produce_expected_shapes() {
        let single = PoolConfig::single_threaded();
        assert_eq!(single.core_pool_size, 1);
        assert_eq!(single.max_pool_size, 1);

        let elastic = PoolConfig::elastic(2, 8);
        assert_eq!(elastic.core_pool_size, 2);
        assert_eq!(elastic.max_pool_size, 8);
        assert!(elastic.validate().is_ok());
    }

    #[test]
    fn zero_core_size_is_rejected() {
        let config = PoolConfig {
            core_pool_size: 0,
            ..PoolConfig::default()
        };
        let err = config.validate().expect_err("zero core size must fail");
        assert_eq!(err.kind(), ErrorKind::BadArgument);
    }

    #[test]
    fn max_below_core_is_rejected() {
        let config = PoolConfig::elastic(4, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn limiter_config_rejects_zero_cap() {
        let config = LimiterConfig::with_max_concurrency(0);
        let err = config.validate().expect_err("zero cap must fail");
        assert_eq!(err.kind(), ErrorKind::BadArgument);
    }
}
