//! End-to-end keyed limiter scenario: a large burst on one key must never
//! exceed the per-key cap, and the total runtime reflects the serialization
//! the cap imposes.

mod common;

use common::{init_test_logging, wait_until};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskforge::{KeyedLimiter, PoolConfig, Priority, PriorityScheduler};

#[test]
fn burst_on_one_key_honors_cap_and_serializes() {
    init_test_logging();
    let scheduler = PriorityScheduler::new(PoolConfig::fixed(16)).expect("pool");
    let limiter = KeyedLimiter::new(scheduler.clone(), 2).expect("limiter");

    let active = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    for _ in 0..100 {
        let active = Arc::clone(&active);
        let high_water = Arc::clone(&high_water);
        let completed = Arc::clone(&completed);
        limiter
            .execute("A", Priority::Low, move || {
                let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(running, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                active.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
    }

    wait_until("all 100 tasks", Duration::from_secs(30), || {
        completed.load(Ordering::SeqCst) == 100
    });
    let elapsed = started.elapsed();

    assert!(
        high_water.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent tasks for key A, cap is 2",
        high_water.load(Ordering::SeqCst)
    );
    // 100 tasks of 50 ms at concurrency 2 need at least 2500 ms of wall
    // time; anything faster means the cap leaked.
    assert!(
        elapsed >= Duration::from_millis(2_500),
        "run finished in {elapsed:?}, faster than the cap permits"
    );

    wait_until("container eviction", Duration::from_secs(5), || {
        limiter.tracked_key_count() == 0
    });
    scheduler.shutdown();
    assert!(scheduler.await_termination(Duration::from_secs(5)));
}

#[test]
fn keys_are_isolated_under_mixed_load() {
    init_test_logging();
    let scheduler = PriorityScheduler::new(PoolConfig::fixed(8)).expect("pool");
    let limiter = KeyedLimiter::new(scheduler.clone(), 1).expect("limiter");

    let per_key_active: Vec<Arc<AtomicUsize>> =
        (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let per_key_high_water: Vec<Arc<AtomicUsize>> =
        (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let completed = Arc::new(AtomicUsize::new(0));

    for round in 0..10 {
        for key in 0..4 {
            let active = Arc::clone(&per_key_active[key]);
            let high_water = Arc::clone(&per_key_high_water[key]);
            let completed = Arc::clone(&completed);
            let priority = if round % 2 == 0 {
                Priority::High
            } else {
                Priority::Low
            };
            limiter
                .execute(key, priority, move || {
                    let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(running, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
    }

    wait_until("all 40 tasks", Duration::from_secs(10), || {
        completed.load(Ordering::SeqCst) == 40
    });
    for (key, high_water) in per_key_high_water.iter().enumerate() {
        assert!(
            high_water.load(Ordering::SeqCst) <= 1,
            "key {key} exceeded its cap of 1"
        );
    }
    scheduler.shutdown();
}
