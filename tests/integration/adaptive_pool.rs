//! Adaptive pools, timers and the task pool under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blaze_pool::adaptive::calibrate::{class_size, CALIBRATE_CALLS_THRESHOLD, MAX_SIZE, MIN_SIZE};
use blaze_pool::adaptive::{AdaptivePool, BufferPool, TimerPool};
use blaze_pool::TaskPool;

use crate::helpers::within;

#[test]
fn test_concurrent_get_put_keeps_count_sane() {
    let pool = Arc::new(AdaptivePool::<Vec<u8>>::new(64));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let mut buf = pool.get();
                    assert!(buf.is_empty());
                    buf.resize(64 + (i + t) % 512, 0xAB);
                    pool.put(buf);
                    assert!(pool.count() >= 0);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(pool.count() > 0 && pool.count() <= 64);
    assert!(pool.histogram().calibrations() >= 1);
    let (default_size, max_size) = pool.histogram().sizes();
    assert!(default_size >= MIN_SIZE && default_size <= max_size);
    assert!(max_size <= class_size(4));
}

/// A skewed workload converges to its dominant size class.
#[test]
fn test_calibration_converges_to_dominant_class() {
    let pool = BufferPool::new(8);
    let dominant = class_size(2);

    for i in 0..=CALIBRATE_CALLS_THRESHOLD {
        let size = if i % 100 < 96 { dominant } else { class_size(14) };
        let mut buf = pool.get();
        buf.resize(size, 0);
        pool.put(buf);
    }

    assert_eq!(pool.default_size(), dominant);
    assert_eq!(pool.max_size(), dominant);
    assert!(pool.default_size() < MAX_SIZE);

    // A large buffer is no longer retained.
    let mut big = pool.get();
    big.resize(class_size(10), 0);
    let before = pool.count();
    pool.put(big);
    assert_eq!(pool.count(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timer_pool_under_load() {
    let timers = Arc::new(TimerPool::new(32));

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let timers = Arc::clone(&timers);
            tokio::spawn(async move {
                let fast = timers
                    .timeout(Duration::from_secs(5), async move { i * 2 })
                    .await;
                assert_eq!(fast, Ok(i * 2));

                let slow = timers
                    .timeout(Duration::from_millis(5), tokio::time::sleep(Duration::from_secs(5)))
                    .await;
                assert!(slow.is_err());
            })
        })
        .collect();

    for task in tasks {
        within(Duration::from_secs(10), task).await.unwrap();
    }
    assert!(timers.idle() > 0 && timers.idle() <= 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_pool_never_exceeds_ceiling() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let pool = {
        let (running, peak, done) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&done));
        TaskPool::new(3, move |_: usize| {
            let (running, peak, done) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&done));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    within(Duration::from_secs(10), async {
        for i in 0..50 {
            pool.invoke(i).await.unwrap();
        }
        while done.load(Ordering::SeqCst) < 50 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.workers_count() <= 3);
    pool.shutdown();
    assert_eq!(pool.invoke(0).await, Err(0));
}
