//! Priority classes and helpers used across the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling classes ordered from most to least favored.
///
/// `High` and `Low` are mutually starvation-fair: a bounded number of
/// consecutive `High` dispatches is allowed before a ready `Low` task is
/// served unconditionally (see
/// [`PoolConfig::high_streak_limit`](crate::PoolConfig::high_streak_limit)).
/// `Starvable` tasks run only when neither of the other classes has ready
/// work and may be deferred indefinitely; that is their defining property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Latency-sensitive work, served first within the fairness bound.
    High,
    /// Normal work; never starved by `High` traffic.
    Low,
    /// Background work with no anti-starvation guarantee.
    Starvable,
}

impl Priority {
    /// All priorities in dispatch-preference order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Low, Priority::Starvable];

    /// Stable index for per-priority arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
            Priority::Starvable => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::High => "high",
            Priority::Low => "low",
            Priority::Starvable => "starvable",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_stable() {
        assert_eq!(Priority::High.index(), 0);
        assert_eq!(Priority::Low.index(), 1);
        assert_eq!(Priority::Starvable.index(), 2);
    }

    #[test]
    fn all_covers_every_class_in_order() {
        for (position, priority) in Priority::ALL.iter().enumerate() {
            assert_eq!(priority.index(), position);
        }
    }
}
