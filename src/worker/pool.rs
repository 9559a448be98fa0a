//! Connection worker pool.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;

use super::error::{HandlerError, HandlerResult, RejectReason, Rejected};
use super::lane::Lane;
use super::slot::{run_worker, Acquired, SlotTable};
use super::{ConnHandler, ConnState, PoolStats};
use crate::adaptive::{Elapsed, TimerPool};
use crate::config::WorkerPoolConfig;
use crate::listener::Connection;
use crate::metrics::PoolMetrics;

const NEW: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

type ConnStateHook = Box<dyn Fn(Option<SocketAddr>, ConnState) + Send + Sync>;

/// Bounded pool of connection workers.
///
/// Cloning is cheap; all clones drive the same pool.
pub struct WorkerPool<C: Connection, H: ConnHandler<C>> {
    shared: Arc<Shared<C, H>>,
}

struct Shared<C: Connection, H: ConnHandler<C>> {
    config: WorkerPoolConfig,
    handler: H,
    table: SlotTable<C>,
    state: AtomicU8,
    stop_tx: watch::Sender<bool>,
    timers: TimerPool,
    metrics: Option<Arc<PoolMetrics>>,
    conn_state: Option<ConnStateHook>,
    served: AtomicU64,
    rejected: AtomicU64,
    reaped: AtomicU64,
}

/// Builder for [`WorkerPool`].
pub struct WorkerPoolBuilder<C: Connection, H: ConnHandler<C>> {
    config: WorkerPoolConfig,
    handler: H,
    metrics: Option<Arc<PoolMetrics>>,
    conn_state: Option<ConnStateHook>,
    _conn: std::marker::PhantomData<fn(C)>,
}

impl<C: Connection, H: ConnHandler<C>> WorkerPoolBuilder<C, H> {
    pub fn config(mut self, config: WorkerPoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PoolMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Hook called on connection state changes.
    pub fn conn_state<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<SocketAddr>, ConnState) + Send + Sync + 'static,
    {
        self.conn_state = Some(Box::new(hook));
        self
    }

    /// Build the pool. The lane is resolved here, so call this inside the
    /// runtime the pool will run on when `LaneMode::Auto` is used.
    pub fn build(self) -> WorkerPool<C, H> {
        let lane = self.config.lane_mode.resolve();
        let (stop_tx, _) = watch::channel(false);

        let mut table = SlotTable::new(self.config.max_workers, lane);
        if let Some(metrics) = &self.metrics {
            let metrics = Arc::clone(metrics);
            table = table
                .with_observer(move |live, idle| metrics.update_worker_gauges(live, idle));
        }

        WorkerPool {
            shared: Arc::new(Shared {
                table,
                config: self.config,
                handler: self.handler,
                state: AtomicU8::new(NEW),
                stop_tx,
                timers: TimerPool::default(),
                metrics: self.metrics,
                conn_state: self.conn_state,
                served: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                reaped: AtomicU64::new(0),
            }),
        }
    }
}

impl<C: Connection, H: ConnHandler<C>> WorkerPool<C, H> {
    pub fn new(config: WorkerPoolConfig, handler: H) -> Self {
        Self::builder(handler).config(config).build()
    }

    pub fn builder(handler: H) -> WorkerPoolBuilder<C, H> {
        WorkerPoolBuilder {
            config: WorkerPoolConfig::default(),
            handler,
            metrics: None,
            conn_state: None,
            _conn: std::marker::PhantomData,
        }
    }

    /// Begin accepting connections and launch the idle reaper.
    ///
    /// Idempotent. A stopped pool cannot be restarted.
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        match self
            .shared
            .state
            .compare_exchange(NEW, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) => return,
            Err(_) => {
                tracing::warn!("start called on a stopped worker pool");
                return;
            }
        }

        let period = self.shared.config.max_idle_duration;
        tokio::spawn(reap_idle(
            Arc::downgrade(&self.shared),
            self.shared.stop_tx.subscribe(),
            period,
        ));

        tracing::info!(
            max_workers = self.shared.table.max_workers(),
            max_idle_ms = period.as_millis() as u64,
            lane = ?self.shared.table.lane(),
            "worker pool started"
        );
    }

    /// Hand `conn` to a worker.
    ///
    /// Never waits for a worker to become free: at capacity the connection
    /// is handed back inside [`Rejected`] for the caller to close. In single
    /// lane mode the call returns once the worker has picked the connection up.
    pub async fn serve(&self, conn: C) -> Result<(), Rejected<C>> {
        let shared = &self.shared;
        if shared.state.load(Ordering::Acquire) != RUNNING || shared.table.is_stopping() {
            return Err(shared.reject(conn, RejectReason::NotRunning));
        }

        match shared.table.acquire().await {
            Some(Acquired::Idle(id)) => shared.table.dispatch(id, conn).await,
            Some(Acquired::Fresh(id)) => {
                // Spawn before dispatch: a rendezvous needs the worker to exist.
                self.spawn_worker(id.index());
                shared.table.dispatch(id, conn).await;
            }
            None => return Err(shared.reject(conn, RejectReason::AtCapacity)),
        }

        shared.served.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &shared.metrics {
            metrics.connections_served_total.inc();
        }
        Ok(())
    }

    /// Stop accepting connections and terminate idle workers.
    ///
    /// Busy workers finish their connection and exit instead of parking.
    /// Idempotent.
    pub fn stop(&self) {
        if self.shared.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }
        self.shared.stop_tx.send_replace(true);
        let drained = self.shared.table.stop();

        tracing::info!(
            drained,
            live = self.shared.table.live(),
            "worker pool stopped"
        );
    }

    /// Live worker tasks, busy or idle.
    pub fn workers_count(&self) -> usize {
        self.shared.table.live()
    }

    /// Workers parked on the idle stack.
    pub fn idle_count(&self) -> usize {
        self.shared.table.idle()
    }

    pub fn max_workers(&self) -> usize {
        self.shared.table.max_workers()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn lane(&self) -> Lane {
        self.shared.table.lane()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_workers: self.shared.table.live(),
            idle_workers: self.shared.table.idle(),
            max_workers: self.shared.table.max_workers(),
            served: self.shared.served.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            reaped: self.shared.reaped.load(Ordering::Relaxed),
        }
    }

    fn spawn_worker(&self, index: usize) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tracing::trace!(worker = index, "worker started");
            run_worker(&shared.table, index, |conn| shared.serve_conn(conn, index)).await;
            tracing::trace!(worker = index, "worker exited");
        });
    }
}

impl<C: Connection, H: ConnHandler<C>> Shared<C, H> {
    async fn serve_conn(&self, mut conn: C, worker: usize) {
        let remote = conn.remote_addr();
        self.notify(remote, ConnState::Active);

        match self.run_handler(&mut conn).await {
            Ok(()) => {}
            Err(HandlerError::Hijacked) => {
                self.notify(remote, ConnState::Hijacked);
                self.handler.hijack(conn);
                return;
            }
            Err(err) => self.report(&err, &conn, worker),
        }

        if let Err(error) = conn.close().await {
            tracing::debug!(worker, remote = ?remote, %error, "connection close failed");
        }
        self.notify(remote, ConnState::Closed);
    }

    async fn run_handler(&self, conn: &mut C) -> HandlerResult {
        let handling = AssertUnwindSafe(self.handler.handle(conn)).catch_unwind();
        let outcome = match self.config.handle_timeout {
            Some(limit) => match self.timers.timeout(limit, handling).await {
                Ok(outcome) => outcome,
                Err(Elapsed(limit)) => return Err(HandlerError::Timeout(limit)),
            },
            None => handling.await,
        };
        outcome.unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))))
    }

    fn report(&self, err: &HandlerError, conn: &C, worker: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_handler_error(err.kind());
        }

        let local = conn.local_addr();
        let remote = conn.remote_addr();
        if self.config.log_all_errors || !err.is_transient() {
            tracing::error!(
                worker,
                local = ?local,
                remote = ?remote,
                error = %err,
                "error when serving connection"
            );
        } else {
            tracing::debug!(
                worker,
                local = ?local,
                remote = ?remote,
                error = %err,
                "transient connection error"
            );
        }
    }

    fn reject(&self, conn: C, reason: RejectReason) -> Rejected<C> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_rejected(reason.as_str());
        }
        Rejected::new(conn, reason)
    }

    fn notify(&self, remote: Option<SocketAddr>, state: ConnState) {
        if let Some(hook) = &self.conn_state {
            hook(remote, state);
        }
    }
}

/// Evict workers idle longer than `period`, every `period`, until stopped.
async fn reap_idle<C: Connection, H: ConnHandler<C>>(
    shared: Weak<Shared<C, H>>,
    mut stop_rx: watch::Receiver<bool>,
    period: Duration,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(period) => {}
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.table.is_stopping() {
            break;
        }

        let evicted = shared.table.reap(period);
        if evicted > 0 {
            shared.reaped.fetch_add(evicted as u64, Ordering::Relaxed);
            if let Some(metrics) = &shared.metrics {
                metrics.workers_reaped_total.inc_by(evicted as u64);
            }
            tracing::debug!(
                evicted,
                idle = shared.table.idle(),
                "reaped idle workers"
            );
        }
    }
    tracing::trace!("idle reaper exited");
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<C: Connection, H: ConnHandler<C>> Clone for WorkerPool<C, H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection, H: ConnHandler<C>> fmt::Debug for WorkerPool<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .field("lane", &self.shared.table.lane())
            .field("live", &self.shared.table.live())
            .field("idle", &self.shared.table.idle())
            .field("max_workers", &self.shared.table.max_workers())
            .finish()
    }
}
