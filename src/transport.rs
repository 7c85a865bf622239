//! Listener abstraction over stream transports.
//!
//! The server loop only needs "accept the next bidirectional byte
//! stream, with a peer address". [`TcpTransport`] is the production
//! implementation; tests drive the same loop with scripted listeners,
//! and other stream transports (Unix sockets, in-memory pipes) can slot
//! in the same way.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// Source of incoming session streams.
#[async_trait]
pub trait SessionListener: Send {
    /// The connected stream type handed to each session.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Local address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Wait for the next connection.
    ///
    /// Errors here are transient from the server's point of view: they
    /// are reported through the fault sink and the loop keeps accepting.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// TCP listener transport.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to an address and start listening.
    ///
    /// This is the server's only unrecoverable startup step; failure
    /// here fails [`WorkServer::run`](crate::server::WorkServer::run).
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl SessionListener for TcpTransport {
    type Stream = TcpStream;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)> {
        self.listener.accept().await
    }
}
