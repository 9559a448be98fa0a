//! Dispatch, capacity and reuse behaviour of the worker pool.

use std::sync::atomic::Ordering;
use std::time::Duration;

use blaze_pool::config::{LaneMode, WorkerPoolConfig};
use blaze_pool::worker::{Lane, RejectReason, WorkerPool};
use futures_util::future::join_all;

use crate::helpers::*;

/// Serving past `max_workers` sheds the connection and never over-spawns.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_invariant() {
    let (handler, gate) = Recorder::gated(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(4), handler.clone());
    pool.start();

    for id in 0..4 {
        pool.serve(TestConn::new(id)).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || handler.in_flight.load(Ordering::SeqCst) == 4).await);

    let rejected = pool.serve(TestConn::new(99)).await.unwrap_err();
    assert_eq!(rejected.reason(), RejectReason::AtCapacity);
    let conn = rejected.into_inner();
    assert_eq!(conn.id, 99);
    assert!(!conn.is_closed());
    assert_eq!(pool.workers_count(), 4);

    gate.add_permits(4);
    settle(&pool).await;
    assert_eq!(handler.peak.load(Ordering::SeqCst), 4);

    // Capacity frees up once workers park again.
    pool.serve(TestConn::new(5)).await.unwrap();
    gate.add_permits(1);
    settle(&pool).await;
    assert_eq!(pool.workers_count(), 4);
    assert_eq!(pool.stats().rejected, 1);
    pool.stop();
}

/// N concurrent serves against capacity N: N workers, one connection each.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_double_dispatch() {
    const N: usize = 32;
    let (handler, gate) = Recorder::gated(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(N), handler.clone());
    pool.start();

    let results = join_all((0..N).map(|id| {
        let pool = pool.clone();
        tokio::spawn(async move { pool.serve(TestConn::new(id)).await.is_ok() })
    }))
    .await;
    assert!(results.into_iter().all(|r| r.unwrap()));

    // Every connection is held by its own worker at the same time.
    assert!(wait_until(Duration::from_secs(5), || handler.in_flight.load(Ordering::SeqCst) == N).await);
    assert_eq!(pool.workers_count(), N);
    assert_eq!(pool.idle_count(), 0);

    gate.add_permits(N);
    settle(&pool).await;

    let calls = handler.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), N);
    assert!(calls.values().all(|&n| n == 1));
    pool.stop();
}

/// Sequential serves reuse the most recently idled worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_worker_is_reused() {
    let handler = Recorder::new(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(8), handler.clone());
    pool.start();

    for id in 0..10 {
        pool.serve(TestConn::new(id)).await.unwrap();
        settle(&pool).await;
        assert_eq!(pool.workers_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }
    assert_eq!(handler.total_calls(), 10);
    assert_eq!(pool.stats().served, 10);
    pool.stop();
}

/// Workers idle past `max_idle_duration` are evicted.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_workers_are_reaped() {
    let (handler, gate) = Recorder::gated(Behavior::Ok);
    let config = WorkerPoolConfig::new(8).with_max_idle_duration(Duration::from_millis(50));
    let pool = WorkerPool::new(config, handler.clone());
    pool.start();

    for id in 0..3 {
        pool.serve(TestConn::new(id)).await.unwrap();
    }
    gate.add_permits(3);
    settle(&pool).await;
    assert_eq!(pool.workers_count(), 3);

    assert!(wait_until(Duration::from_secs(5), || pool.workers_count() == 0).await);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.stats().reaped, 3);

    // A reaped pool spawns fresh workers on demand.
    pool.serve(TestConn::new(10)).await.unwrap();
    gate.add_permits(1);
    settle(&pool).await;
    assert_eq!(handler.total_calls(), 4);
    pool.stop();
}

/// Serving twice on a current-thread runtime must not deadlock.
#[tokio::test(flavor = "current_thread")]
async fn test_single_lane_sequential_serves() {
    let handler = Recorder::new(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(2), handler.clone());
    assert_eq!(pool.lane(), Lane::Single);
    pool.start();

    within(Duration::from_secs(5), async {
        for id in 0..4 {
            pool.serve(TestConn::new(id)).await.unwrap();
            settle(&pool).await;
        }
    })
    .await;

    assert_eq!(handler.total_calls(), 4);
    assert_eq!(pool.workers_count(), 1);
    pool.stop();
}

/// Forcing one lane on a multi-threaded runtime behaves the same.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_single_lane() {
    let handler = Recorder::new(Behavior::Ok);
    let config = WorkerPoolConfig::new(1).with_lane_mode(LaneMode::Single);
    let pool = WorkerPool::new(config, handler.clone());
    assert_eq!(pool.lane(), Lane::Single);
    pool.start();

    within(Duration::from_secs(5), async {
        for id in 0..3 {
            pool.serve(TestConn::new(id)).await.unwrap();
            settle(&pool).await;
        }
    })
    .await;
    assert_eq!(handler.total_calls(), 3);
    pool.stop();
}
