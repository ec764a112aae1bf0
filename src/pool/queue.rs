//! Delay queue: the per-priority pending-task store.
//!
//! A binary heap ordered by `(ready_at ascending, seq ascending)` behind a
//! single mutex, with one condvar for blocking consumers. Entries with equal
//! ready times dequeue in submission order (FIFO by `seq`).
//!
//! The blocking [`take`](DelayQueue::take) sleeps for
//! `min(head.ready_at - now, next insert signal)`: an offer that becomes the
//! new head wakes one waiter so an earlier-deadline insert always preempts
//! the current head wait. Each queue owns exactly one mutex and no code path
//! holds two queue locks simultaneously.

use crate::clock::{wait_slice, Clock};
use crate::pool::task::TaskRunner;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A pending task: its eligibility time, submission order, and runner.
pub(crate) struct QueueEntry {
    /// Absolute clock milliseconds at which the task becomes eligible.
    pub ready_at: u64,
    /// Global submission counter; unique per entry, FIFO tie-breaker.
    pub seq: u64,
    /// Type-erased payload and completion publisher.
    pub runner: Arc<dyn TaskRunner>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    /// Reversed comparison so the std max-heap behaves as a min-heap:
    /// earlier `ready_at` first, then lower `seq`.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Thread-safe delay queue for one priority class.
pub(crate) struct DelayQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    available: Arc<Condvar>,
    clock: Arc<dyn Clock>,
}

impl DelayQueue {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        let available = Arc::new(Condvar::new());
        clock.register_sleeper(&available);
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available,
            clock,
        }
    }

    /// Inserts an entry, waking one waiter when it becomes the new head.
    pub(crate) fn offer(&self, entry: QueueEntry) {
        let mut heap = self.heap.lock();
        // In heap order "greater" means "dequeues sooner", so a new head is
        // any entry that outranks the current one (or an empty queue).
        let new_head = heap.peek().is_none_or(|head| entry > *head);
        heap.push(entry);
        if new_head {
            self.available.notify_one();
        }
    }

    /// Removes and returns the head once it is ready, blocking otherwise.
    ///
    /// At most one consumer observes any given entry.
    pub(crate) fn take(&self) -> QueueEntry {
        let mut heap = self.heap.lock();
        loop {
            let now = self.clock.now_millis();
            match heap.peek() {
                Some(head) if head.ready_at <= now => {
                    return heap.pop().expect("peeked head must pop");
                }
                Some(head) => {
                    let slice = wait_slice(self.clock.as_ref(), head.ready_at - now);
                    self.available.wait_for(&mut heap, slice);
                }
                None => {
                    self.available.wait(&mut heap);
                }
            }
        }
    }

    /// Removes and returns the head if it is ready at `now`.
    pub(crate) fn try_take(&self, now: u64) -> Option<QueueEntry> {
        let mut heap = self.heap.lock();
        if heap.peek().is_some_and(|head| head.ready_at <= now) {
            heap.pop()
        } else {
            None
        }
    }

    /// Eligibility time of the head entry, if any.
    pub(crate) fn peek_ready_at(&self) -> Option<u64> {
        self.heap.lock().peek().map(|entry| entry.ready_at)
    }

    /// Removes the entry with the given submission sequence, if present.
    ///
    /// Rebuilds the heap; O(n), but removal is a cancellation path, not a
    /// dispatch path.
    pub(crate) fn remove(&self, seq: u64) -> Option<QueueEntry> {
        let mut heap = self.heap.lock();
        let position = heap.iter().position(|entry| entry.seq == seq)?;
        let mut entries = std::mem::take(&mut *heap).into_vec();
        let removed = entries.swap_remove(position);
        *heap = BinaryHeap::from(entries);
        Some(removed)
    }

    /// Empties the queue, returning the entries in submission order.
    pub(crate) fn drain(&self) -> Vec<QueueEntry> {
        let mut entries = std::mem::take(&mut *self.heap.lock()).into_vec();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::future::{FutureCore, TaskFuture};
    use crate::pool::task::OneShotTask;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::thread;
    use std::time::Duration;

    fn entry(clock: &Arc<dyn Clock>, ready_at: u64, seq: u64) -> QueueEntry {
        let core: Arc<FutureCore<()>> = FutureCore::new(Arc::clone(clock));
        QueueEntry {
            ready_at,
            seq,
            runner: OneShotTask::new(Box::new(|| ()), core),
        }
    }

    fn system_clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock::new())
    }

    #[test]
    fn ready_entries_dequeue_in_deadline_order() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        queue.offer(entry(&clock, 30, 0));
        queue.offer(entry(&clock, 10, 1));
        queue.offer(entry(&clock, 20, 2));

        assert_eq!(queue.try_take(100).expect("ready").seq, 1);
        assert_eq!(queue.try_take(100).expect("ready").seq, 2);
        assert_eq!(queue.try_take(100).expect("ready").seq, 0);
        assert!(queue.try_take(100).is_none());
    }

    #[test]
    fn equal_deadlines_dequeue_fifo() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        for seq in 0..8 {
            queue.offer(entry(&clock, 5, seq));
        }
        for expected in 0..8 {
            assert_eq!(queue.try_take(5).expect("ready").seq, expected);
        }
    }

    #[test]
    fn try_take_respects_eligibility_time() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        queue.offer(entry(&clock, 50, 0));
        assert!(queue.try_take(49).is_none());
        assert!(queue.try_take(50).is_some());
    }

    #[test]
    fn remove_by_seq_extracts_exactly_one_entry() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        queue.offer(entry(&clock, 10, 0));
        queue.offer(entry(&clock, 20, 1));
        queue.offer(entry(&clock, 30, 2));

        assert!(queue.remove(1).is_some());
        assert!(queue.remove(1).is_none(), "second remove must miss");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_take(100).expect("ready").seq, 0);
        assert_eq!(queue.try_take(100).expect("ready").seq, 2);
    }

    #[test]
    fn drain_returns_submission_order() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        queue.offer(entry(&clock, 300, 0));
        queue.offer(entry(&clock, 100, 1));
        queue.offer(entry(&clock, 200, 2));

        let drained: Vec<u64> = queue.drain().iter().map(|e| e.seq).collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn earlier_insert_preempts_head_wait() {
        // A consumer blocked on a far-future head must be woken promptly
        // when a sooner entry arrives.
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let queue = Arc::new(DelayQueue::new(Arc::clone(&clock)));
        queue.offer(entry(&clock, clock.now_millis() + 60_000, 0));

        let taken = Arc::new(AtomicBool::new(false));
        let consumer = {
            let queue = Arc::clone(&queue);
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                let entry = queue.take();
                taken.store(true, AtomicOrdering::SeqCst);
                entry.seq
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!taken.load(AtomicOrdering::SeqCst), "far head must not be taken");

        queue.offer(entry(&clock, 0, 1));
        let seq = consumer.join().expect("consumer thread");
        assert_eq!(seq, 1, "the earlier insert must be dequeued first");
    }

    #[test]
    fn blocking_take_honors_virtual_time() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let queue = Arc::new(DelayQueue::new(Arc::clone(&clock)));
        queue.offer(entry(&clock, 500, 0));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().seq)
        };

        thread::sleep(Duration::from_millis(20));
        manual.advance(500);
        assert_eq!(consumer.join().expect("consumer thread"), 0);
    }

    #[test]
    fn dequeued_runner_still_completes_its_future() {
        let clock = system_clock();
        let queue = DelayQueue::new(Arc::clone(&clock));
        let core: Arc<FutureCore<u32>> = FutureCore::new(Arc::clone(&clock));
        let future = TaskFuture::from_core(Arc::clone(&core));
        queue.offer(QueueEntry {
            ready_at: 0,
            seq: 0,
            runner: OneShotTask::new(Box::new(|| 11), core),
        });

        let entry = queue.try_take(0).expect("ready");
        entry.runner.run();
        assert_eq!(future.get().expect("value"), 11);
    }
}
