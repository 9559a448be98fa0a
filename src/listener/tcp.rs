//! TCP listener implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};

use super::{Connection, Listener, ListenerConfig};

/// A TCP connection.
pub struct TcpConnection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let local_addr = stream.local_addr().ok();
        Self {
            stream,
            remote_addr,
            local_addr,
        }
    }

    /// Get the underlying TCP stream.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown().await {
            // Peer went away first.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// A TCP listener that accepts plain TCP connections.
pub struct TcpListener {
    inner: TokioTcpListener,
}

impl TcpListener {
    /// Bind with the default listener configuration.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with(&ListenerConfig::tcp(addr))
    }

    /// Bind through `socket2` so the backlog and `SO_REUSEADDR` can be set.
    ///
    /// Must be called within a Tokio runtime.
    pub fn bind_with(config: &ListenerConfig) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::for_address(config.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        if config.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&config.addr.into())?;
        socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

        let inner = TokioTcpListener::from_std(socket.into())?;
        tracing::debug!(
            addr = %config.addr,
            backlog = config.backlog,
            "tcp listener bound"
        );
        Ok(Self { inner })
    }

    /// Create a TCP listener from an existing tokio TcpListener.
    pub fn from_tokio(listener: TokioTcpListener) -> Self {
        Self { inner: listener }
    }
}

impl Listener for TcpListener {
    type Conn = TcpConnection;

    fn accept(&self) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>> {
        Box::pin(async move {
            let (stream, addr) = self.inner.accept().await?;

            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }

            Ok(TcpConnection::new(stream, addr))
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
