//! Start/stop, hijacking and error handling.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blaze_pool::config::WorkerPoolConfig;
use blaze_pool::metrics::PoolMetrics;
use blaze_pool::worker::{ConnState, RejectReason, WorkerPool};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_drains_idle_workers() {
    let handler = Recorder::new(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(8), handler.clone());
    pool.start();

    let conns: Vec<_> = (0..3).map(TestConn::new).collect();
    let flags: Vec<_> = conns.iter().map(|c| Arc::clone(&c.closed)).collect();
    for conn in conns {
        pool.serve(conn).await.unwrap();
        settle(&pool).await;
    }
    assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    assert_eq!(pool.idle_count(), 1);

    pool.stop();
    assert!(!pool.is_running());
    assert!(wait_until(Duration::from_secs(5), || pool.workers_count() == 0).await);

    let rejected = pool.serve(TestConn::new(7)).await.unwrap_err();
    assert_eq!(rejected.reason(), RejectReason::NotRunning);
}

/// Busy workers finish their connection, then exit instead of parking.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_lets_busy_workers_finish() {
    let (handler, gate) = Recorder::gated(Behavior::Ok);
    let pool = WorkerPool::new(WorkerPoolConfig::new(8), handler.clone());
    pool.start();

    let conns: Vec<_> = (0..4).map(TestConn::new).collect();
    let flags: Vec<_> = conns.iter().map(|c| Arc::clone(&c.closed)).collect();
    for conn in conns {
        pool.serve(conn).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || handler.in_flight.load(Ordering::SeqCst) == 4).await);

    pool.stop();
    assert_eq!(pool.workers_count(), 4);

    gate.add_permits(4);
    assert!(wait_until(Duration::from_secs(5), || pool.workers_count() == 0).await);
    assert_eq!(pool.idle_count(), 0);
    assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
}

#[tokio::test(flavor = "current_thread")]
async fn test_start_and_stop_are_idempotent() {
    let pool = WorkerPool::new(WorkerPoolConfig::new(2), Recorder::new(Behavior::Ok));
    pool.start();
    pool.start();
    assert!(pool.is_running());

    pool.serve(TestConn::new(1)).await.unwrap();
    settle(&pool).await;

    pool.stop();
    pool.stop();
    assert!(!pool.is_running());
    assert!(wait_until(Duration::from_secs(5), || pool.workers_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hijacked_connection_is_not_closed() {
    let handler = Recorder::new(Behavior::Hijack);
    let pool = WorkerPool::new(WorkerPoolConfig::new(2), handler.clone());
    pool.start();

    pool.serve(TestConn::new(42)).await.unwrap();
    settle(&pool).await;

    let hijacked = handler.hijacked.lock().unwrap();
    assert_eq!(hijacked.len(), 1);
    assert_eq!(hijacked[0].id, 42);
    assert!(!hijacked[0].is_closed());
    drop(hijacked);
    pool.stop();
}

/// Handler errors close the connection and keep the worker; transient ones
/// are counted like any other.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_errors_close_connection() {
    let metrics = Arc::new(PoolMetrics::new("it").unwrap());

    for (behavior, kind) in [(Behavior::Reset, "io"), (Behavior::Fail, "other")] {
        let handler = Recorder::new(behavior);
        let pool = WorkerPool::builder(handler)
            .config(WorkerPoolConfig::new(2).with_log_all_errors(true))
            .metrics(Arc::clone(&metrics))
            .build();
        pool.start();

        let conn = TestConn::new(1);
        let closed = Arc::clone(&conn.closed);
        pool.serve(conn).await.unwrap();
        settle(&pool).await;

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(pool.workers_count(), 1);
        let text = metrics.export().unwrap();
        assert!(text.contains(&format!("it_handler_errors_total{{kind=\"{kind}\"}} 1")));
        pool.stop();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conn_state_hook_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let pool = WorkerPool::builder(Recorder::new(Behavior::Ok))
        .config(WorkerPoolConfig::new(1))
        .conn_state(move |remote, state| sink.lock().unwrap().push((remote, state)))
        .build();
    pool.start();

    let conn = TestConn::new(3);
    let remote = blaze_pool::listener::Connection::remote_addr(&conn);
    pool.serve(conn).await.unwrap();
    settle(&pool).await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![(remote, ConnState::Active), (remote, ConnState::Closed)]
    );
    pool.stop();
}
