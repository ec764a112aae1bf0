//! Injectable monotonic time source.
//!
//! All timed behavior in the crate (delay queues, timed future waits,
//! keep-alive accounting of dispatch deadlines) reads time exclusively
//! through a [`Clock`] handle so tests can substitute [`ManualClock`] and
//! drive time deterministically.
//!
//! The clock counts non-decreasing milliseconds from an arbitrary origin.
//! [`SystemClock`] derives them from a cached [`Instant`]; [`ManualClock`]
//! holds a counter advanced explicitly by the test and wakes every condvar
//! that registered as a sleeper so blocked waits re-check their deadlines
//! promptly.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Upper bound on a single condvar wait slice under a virtual clock.
///
/// Virtual deadlines have no real-time meaning, so waiters re-check their
/// condition on short real-time slices instead of sleeping the full
/// (virtual) remainder. Registered sleepers are normally woken by
/// [`ManualClock::advance`] well before this expires; the slice is the
/// recovery path for a wakeup that raced with going to sleep.
const VIRTUAL_WAIT_SLICE: Duration = Duration::from_millis(5);

/// A monotonic, non-decreasing millisecond time source.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the clock's origin.
    ///
    /// Must never decrease between calls, on any thread.
    fn now_millis(&self) -> u64;

    /// Registers a condvar to be notified when virtual time advances.
    ///
    /// Real clocks ignore this; [`ManualClock`] wakes every registered
    /// sleeper on [`advance`](ManualClock::advance).
    fn register_sleeper(&self, _sleeper: &Arc<Condvar>) {}

    /// Whether this clock's milliseconds are decoupled from real time.
    fn is_virtual(&self) -> bool {
        false
    }
}

/// Converts a remaining clock-millisecond wait into a real condvar timeout.
///
/// Under a real clock the two are the same quantity. Under a virtual clock
/// the wait is clamped to a short re-check slice.
pub(crate) fn wait_slice(clock: &dyn Clock, remaining_ms: u64) -> Duration {
    let wanted = Duration::from_millis(remaining_ms.max(1));
    if clock.is_virtual() {
        wanted.min(VIRTUAL_WAIT_SLICE)
    } else {
        wanted
    }
}

/// Wall-clock backed [`Clock`].
///
/// Milliseconds are measured from the instant the clock was created, so the
/// count stays small and never goes backwards even if the system wall clock
/// is adjusted.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced [`Clock`] for deterministic tests.
///
/// Time moves only when [`advance`](ManualClock::advance) is called. Every
/// condvar registered through [`Clock::register_sleeper`] is notified on
/// each advance so blocked timed waits re-evaluate their deadlines.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    sleepers: Mutex<Vec<Weak<Condvar>>>,
}

impl ManualClock {
    /// Creates a manual clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a manual clock starting at the given millisecond count.
    #[must_use]
    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
            sleepers: Mutex::new(Vec::new()),
        }
    }

    /// Advances the clock by `millis` and wakes all registered sleepers.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
        let mut sleepers = self.sleepers.lock();
        sleepers.retain(|weak| match weak.upgrade() {
            Some(condvar) => {
                condvar.notify_all();
                true
            }
            None => false,
        });
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn register_sleeper(&self, sleeper: &Arc<Condvar>) {
        self.sleepers.lock().push(Arc::downgrade(sleeper));
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a, "clock went backwards: {a} -> {b}");
    }

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 250);
        clock.advance(50);
        assert_eq!(clock.now_millis(), 300);
    }

    #[test]
    fn manual_clock_wakes_registered_sleeper() {
        let clock = Arc::new(ManualClock::new());
        let condvar = Arc::new(Condvar::new());
        let gate = Arc::new(Mutex::new(()));
        clock.register_sleeper(&condvar);

        let waiter = {
            let clock = Arc::clone(&clock);
            let condvar = Arc::clone(&condvar);
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let mut guard = gate.lock();
                while clock.now_millis() < 100 {
                    condvar.wait_for(&mut guard, Duration::from_secs(2));
                }
                clock.now_millis()
            })
        };

        thread::sleep(Duration::from_millis(20));
        clock.advance(100);
        let observed = waiter.join().expect("waiter thread should complete");
        assert!(observed >= 100, "sleeper woke before time advanced");
    }

    #[test]
    fn wait_slice_clamps_only_virtual_clocks() {
        let real = SystemClock::new();
        assert_eq!(wait_slice(&real, 400), Duration::from_millis(400));

        let virt = ManualClock::new();
        assert!(wait_slice(&virt, 400) <= VIRTUAL_WAIT_SLICE);
        // A sub-slice remainder is not rounded up past the request.
        assert_eq!(wait_slice(&virt, 2), Duration::from_millis(2));
    }

    #[test]
    fn dropped_sleepers_are_pruned_on_advance() {
        let clock = ManualClock::new();
        {
            let condvar = Arc::new(Condvar::new());
            clock.register_sleeper(&condvar);
        }
        clock.advance(1);
        assert!(clock.sleepers.lock().is_empty());
    }
}
