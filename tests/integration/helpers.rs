//! Test helpers and utilities

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blaze_pool::listener::Connection;
use blaze_pool::worker::{ConnHandler, HandlerError, HandlerResult, WorkerPool};
use tokio::sync::Semaphore;

/// In-memory connection that records whether the pool closed it.
pub struct TestConn {
    pub id: usize,
    pub closed: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl TestConn {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for TestConn {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([10, 0, 0, 1], 40_000 + self.id as u16)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// What [`Recorder`] does with each connection.
#[allow(dead_code)]
#[derive(Clone, Copy)]
pub enum Behavior {
    Ok,
    Hijack,
    Reset,
    Fail,
}

/// Handler that counts per-connection calls and, when gated, holds each
/// connection until the test releases a permit.
#[derive(Clone)]
pub struct Recorder {
    pub calls: Arc<Mutex<HashMap<usize, usize>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub hijacked: Arc<Mutex<Vec<TestConn>>>,
    gate: Option<Arc<Semaphore>>,
    behavior: Behavior,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            calls: Arc::default(),
            in_flight: Arc::default(),
            peak: Arc::default(),
            hijacked: Arc::default(),
            gate: None,
            behavior,
        }
    }

    /// Recorder whose connections wait on a semaphore with no permits.
    pub fn gated(behavior: Behavior) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut recorder = Self::new(behavior);
        recorder.gate = Some(Arc::clone(&gate));
        (recorder, gate)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ConnHandler<TestConn> for Recorder {
    async fn handle(&self, conn: &mut TestConn) -> HandlerResult {
        *self.calls.lock().unwrap().entry(conn.id).or_insert(0) += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Ok => Ok(()),
            Behavior::Hijack => Err(HandlerError::Hijacked),
            Behavior::Reset => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
            Behavior::Fail => Err(HandlerError::Other("handler failed".into())),
        }
    }

    fn hijack(&self, conn: TestConn) {
        self.hijacked.lock().unwrap().push(conn);
    }
}

/// Poll `cond` every millisecond until it holds or `limit` passes.
#[allow(dead_code)]
pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .is_ok()
}

/// Wait until every live worker is parked.
#[allow(dead_code)]
pub async fn settle(pool: &WorkerPool<TestConn, Recorder>) {
    assert!(
        wait_until(Duration::from_secs(5), || pool.idle_count() == pool.workers_count()).await,
        "workers did not settle: live={} idle={}",
        pool.workers_count(),
        pool.idle_count()
    );
}

/// Run `fut` with a hard deadline so a deadlock fails instead of hanging.
#[allow(dead_code)]
pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    tokio::time::timeout(limit, fut)
        .await
        .expect("operation did not finish in time")
}
