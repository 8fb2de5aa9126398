//! In-process transport.
//!
//! A [`MemoryListener`] hands out `tokio::io::duplex` pipes instead of
//! sockets. The server serves its gRPC router on one, and
//! [`memory_channel`] connects a tonic [`Channel`] through it, so calls
//! made in-process still go through HTTP/2 framing and the full pipeline.
//!
//! # Example
//!
//! ```rust
//! use janus_server::memory::MemoryListener;
//!
//! # tokio_test::block_on(async {
//! let listener = MemoryListener::new();
//! let _client = listener.dial().unwrap();
//! let _server = listener.accept().await.unwrap();
//!
//! listener.close();
//! assert!(listener.dial().is_err());
//! # });
//! ```

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use crate::error::TransportError;

/// Buffer size of each direction of a memory pipe.
pub const PIPE_BUFFER: usize = 64 * 1024;

/// A listener backed by in-process duplex pipes.
///
/// Clones share the accept queue.
#[derive(Debug, Clone)]
pub struct MemoryListener {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: mpsc::UnboundedSender<DuplexStream>,
    rx: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    closed: CancellationToken,
}

impl Default for MemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryListener {
    /// Creates an open listener.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Opens a connection and returns the client end.
    ///
    /// # Errors
    ///
    /// `ListenerClosed` after [`close`](Self::close).
    pub fn dial(&self) -> Result<DuplexStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ListenerClosed);
        }
        let (client, server) = tokio::io::duplex(PIPE_BUFFER);
        self.inner
            .tx
            .send(server)
            .map_err(|_| TransportError::ListenerClosed)?;
        Ok(client)
    }

    /// Waits for the next dialed connection.
    ///
    /// # Errors
    ///
    /// `ListenerClosed` once the listener is closed, including for calls
    /// already waiting.
    pub async fn accept(&self) -> Result<DuplexStream, TransportError> {
        let mut rx = tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => return Err(TransportError::ListenerClosed),
            rx = self.inner.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => Err(TransportError::ListenerClosed),
            stream = rx.recv() => stream.ok_or(TransportError::ListenerClosed),
        }
    }

    /// Closes the listener. Idempotent.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

/// A tonic channel whose connections are dialed on `listener`.
///
/// The channel connects lazily, on the first call.
pub fn memory_channel(listener: &MemoryListener) -> Channel {
    let listener = listener.clone();
    Endpoint::from_static("http://janus.memory").connect_with_connector_lazy(tower::service_fn(
        move |_: http::Uri| {
            let listener = listener.clone();
            async move { listener.dial().map(TokioIo::new) }
        },
    ))
}

/// A listener of either transport.
#[derive(Debug)]
pub enum Listener {
    /// A TCP socket.
    Tcp(TcpListener),
    /// An in-process listener.
    Memory(MemoryListener),
}

impl Listener {
    /// Binds a TCP listener.
    ///
    /// # Errors
    ///
    /// `Bind` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        TcpListener::bind(addr)
            .await
            .map(Self::Tcp)
            .map_err(|source| TransportError::Bind { addr, source })
    }

    /// Local address; `None` for memory listeners.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Memory(_) => None,
        }
    }

    /// Accepts the next connection with its peer address.
    ///
    /// # Errors
    ///
    /// `Accept` on socket errors, `ListenerClosed` for a closed memory
    /// listener.
    pub async fn accept(&self, name: &'static str) -> Result<(Conn, Option<SocketAddr>), TransportError> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(|source| TransportError::Accept { listener: name, source })?;
                let _ = stream.set_nodelay(true);
                Ok((Conn::Tcp(stream), Some(peer)))
            }
            Self::Memory(listener) => Ok((Conn::Memory(listener.accept().await?), None)),
        }
    }
}

/// A connection accepted from a [`Listener`].
#[derive(Debug)]
pub enum Conn {
    /// A TCP stream.
    Tcp(TcpStream),
    /// One end of a memory pipe.
    Memory(DuplexStream),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Memory(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Memory(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Memory(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Memory(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
