//! TCP acceptor driving a [`WorkerPool`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::adaptive::BufferPool;
use crate::config::Config;
use crate::listener::{Connection, Listener, ListenerConfig, TcpConnection, TcpListener};
use crate::metrics::PoolMetrics;
use crate::worker::{ConnHandler, HandlerError, HandlerResult, PoolStats, WorkerPool};

/// Pause after an accept error so a full fd table does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Largest single read the echo handler accepts.
const MAX_READ_BUFFER: usize = 1 << 20;

/// Writes back whatever the peer sends until it closes.
pub struct EchoHandler {
    buffers: Arc<BufferPool>,
}

impl EchoHandler {
    pub fn new(buffers: Arc<BufferPool>) -> Self {
        Self { buffers }
    }
}

#[async_trait]
impl ConnHandler<TcpConnection> for EchoHandler {
    async fn handle(&self, conn: &mut TcpConnection) -> HandlerResult {
        let mut buf = self.buffers.get();
        let mut peak = 0;
        let result = async {
            loop {
                if buf.capacity() == buf.len() {
                    if buf.len() >= MAX_READ_BUFFER {
                        return Err(HandlerError::SmallReadBuffer);
                    }
                    buf.reserve(buf.len().max(64));
                }
                if conn.read_buf(&mut buf).await? == 0 {
                    return Ok(());
                }
                peak = peak.max(buf.len());
                conn.write_all(&buf).await?;
                buf.clear();
            }
        }
        .await;
        self.buffers.put_with_size(buf, peak);
        result
    }
}

/// Accept loop plus the pool it feeds.
pub struct Server<H: ConnHandler<TcpConnection>> {
    listener: TcpListener,
    pool: WorkerPool<TcpConnection, H>,
    metrics: Arc<PoolMetrics>,
}

impl<H: ConnHandler<TcpConnection>> Server<H> {
    /// Bind the listener and start the pool.
    ///
    /// Must be called within a Tokio runtime.
    pub fn bind(config: &Config, handler: H) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind_with(
            &ListenerConfig::tcp(config.server.listen_addr).with_backlog(config.server.backlog),
        )?;
        let metrics = Arc::new(PoolMetrics::new("blaze_pool")?);
        let pool = WorkerPool::builder(handler)
            .config(config.pool.clone())
            .metrics(Arc::clone(&metrics))
            .build();
        pool.start();

        Ok(Self {
            listener,
            pool,
            metrics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn pool(&self) -> &WorkerPool<TcpConnection, H> {
        &self.pool
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    /// Accept until the pool is stopped.
    pub async fn run(&self) {
        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            listener = self.listener.name(),
            lane = ?self.pool.lane(),
            "accepting connections"
        );

        while self.pool.is_running() {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Err(rejected) = self.pool.serve(conn).await {
                tracing::debug!(reason = %rejected.reason(), "connection rejected");
                let mut conn = rejected.into_inner();
                if let Err(error) = conn.close().await {
                    tracing::debug!(remote = ?conn.remote_addr(), %error, "rejected connection close failed");
                }
            }
        }
    }

    /// Stop the pool. Busy workers finish their connection.
    pub fn shutdown(&self) -> PoolStats {
        self.pool.stop();
        let stats = self.pool.stats();
        tracing::info!(
            served = stats.served,
            rejected = stats.rejected,
            reaped = stats.reaped,
            live = stats.live_workers,
            "server stopped"
        );
        stats
    }
}
