//! Listener abstractions for accepting connections.
//!
//! The worker pool is generic over [`Connection`], so anything that can
//! report its peers and be closed can be served. [`TcpListener`] is the
//! stock implementation used by the binary.
//!
//! ```text
//! ┌──────────────┐  accept   ┌───────────────┐  serve   ┌────────────┐
//! │ TcpListener  │ ────────▶ │ TcpConnection │ ───────▶ │ WorkerPool │
//! └──────────────┘           └───────────────┘          └────────────┘
//! ```

mod tcp;

pub use tcp::{TcpConnection, TcpListener};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;

/// Default `listen(2)` backlog.
pub const DEFAULT_BACKLOG: u32 = 4096;

/// A connection accepted by a listener.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Peer address, if known.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Local address the connection was accepted on, if known.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Flush and shut the connection down. Called by the worker after a
    /// handler returns without hijacking.
    async fn close(&mut self) -> io::Result<()>;
}

/// Trait for listening and accepting connections.
pub trait Listener: Send + Sync {
    /// The connection type produced by this listener.
    type Conn: Connection;

    /// Accept a new connection.
    fn accept(&self) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the listener name for logging.
    fn name(&self) -> &'static str;
}

/// Configuration for creating listeners.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Pending connection queue length.
    pub backlog: u32,
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_addr: bool,
}

impl ListenerConfig {
    /// TCP listener configuration with the default backlog.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            backlog: DEFAULT_BACKLOG,
            reuse_addr: true,
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }
}
