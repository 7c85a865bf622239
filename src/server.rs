//! Work server: accept loop, session tracking, graceful shutdown.
//!
//! The server owns a listening transport, spawns one independent task
//! per accepted connection, and survives any single client's
//! misbehavior: accept errors and session failures are reported through
//! the fault sink, never thrown. Its lifecycle is an explicit state
//! machine observable through a [`ServerHandle`]:
//!
//! ```text
//! Idle ──run()──► Running ──cancel──► Draining ──all sessions done──► Stopped
//! ```
//!
//! # Example
//!
//! ```ignore
//! use offload::server::WorkServer;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = WorkServer::<MyJob, _>::builder(MyBenchmark)
//!     .bind_addr("0.0.0.0:7077".parse()?)
//!     .build();
//! let cancel = CancellationToken::new();
//! server.run(cancel).await?;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::DEFAULT_MAX_FRAME_LEN;
use crate::error::{OffloadError, Result};
use crate::fault::{FaultListener, FaultSink, WorkFault};
use crate::session;
use crate::transport::{SessionListener, TcpTransport};
use crate::work::{WorkItem, WorkloadBenchmark};

/// Lifecycle state of a [`WorkServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet running.
    Idle,
    /// Listening and accepting connections.
    Running,
    /// Shutdown signalled; waiting for outstanding sessions to finish.
    Draining,
    /// Accept loop exited and every session task has completed.
    Stopped,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the TCP listener to.
    pub bind_addr: SocketAddr,
    /// Maximum payload size per frame.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Builder for configuring and creating a [`WorkServer`].
pub struct WorkServerBuilder<W, B> {
    benchmark: B,
    config: ServerConfig,
    listeners: Vec<Arc<dyn FaultListener<W>>>,
}

impl<W, B> WorkServerBuilder<W, B>
where
    W: WorkItem + DeserializeOwned,
    B: WorkloadBenchmark,
{
    /// Create a builder around the benchmark capability.
    pub fn new(benchmark: B) -> Self {
        Self {
            benchmark,
            config: ServerConfig::default(),
            listeners: Vec::new(),
        }
    }

    /// Set the bind address. Defaults to `127.0.0.1` on an ephemeral
    /// port.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the maximum payload size per frame.
    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.config.max_frame_len = max_frame_len;
        self
    }

    /// Attach a fault listener before the server starts.
    pub fn fault_listener(mut self, listener: Arc<dyn FaultListener<W>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build the server.
    pub fn build(self) -> WorkServer<W, B> {
        let sink = Arc::new(FaultSink::new());
        for listener in self.listeners {
            sink.subscribe(listener);
        }
        let (state_tx, _) = watch::channel(ServerState::Idle);
        let (addr_tx, _) = watch::channel(None);

        WorkServer {
            config: self.config,
            benchmark: Arc::new(self.benchmark),
            sink,
            state_tx,
            addr_tx,
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// The worker-side server: accepts connections and services unbounded
/// concurrent work sessions.
pub struct WorkServer<W, B> {
    config: ServerConfig,
    benchmark: Arc<B>,
    sink: Arc<FaultSink<W>>,
    state_tx: watch::Sender<ServerState>,
    addr_tx: watch::Sender<Option<SocketAddr>>,
    accepted: Arc<AtomicU64>,
}

impl<W, B> WorkServer<W, B>
where
    W: WorkItem + DeserializeOwned,
    B: WorkloadBenchmark,
{
    /// Create a builder around the benchmark capability.
    pub fn builder(benchmark: B) -> WorkServerBuilder<W, B> {
        WorkServerBuilder::new(benchmark)
    }

    /// The fault-notification sink; subscribe here to observe accept
    /// and session failures.
    pub fn fault_sink(&self) -> &Arc<FaultSink<W>> {
        &self.sink
    }

    /// An observer handle for lifecycle state, bound address, and
    /// session counters. Usable from any task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: self.state_tx.subscribe(),
            addr: self.addr_tx.subscribe(),
            accepted: Arc::clone(&self.accepted),
        }
    }

    /// Bind the configured TCP address and serve until cancelled.
    ///
    /// Completes only when fully stopped: once `cancel` fires, no new
    /// connections are accepted and every already-accepted session is
    /// awaited, however long it takes.
    ///
    /// # Errors
    ///
    /// Failing to bind/listen at startup is the only unrecoverable
    /// condition and fails the call itself. Everything after that is
    /// reported through the fault sink instead.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpTransport::bind(self.config.bind_addr).await?;
        self.serve(listener, cancel).await
    }

    /// Serve sessions from an already-bound listener until cancelled.
    ///
    /// This is [`run`](WorkServer::run) minus the TCP bind, for embedders
    /// bringing their own transport.
    pub async fn serve<L: SessionListener>(
        self,
        mut listener: L,
        cancel: CancellationToken,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "work server listening");
            self.addr_tx.send_replace(Some(addr));
        }
        self.state_tx.send_replace(ServerState::Running);

        // Outstanding-session set: mutated only by this loop.
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                    sessions.push(tokio::spawn(session::run(
                        stream,
                        peer,
                        Arc::clone(&self.benchmark),
                        Arc::clone(&self.sink),
                        self.config.max_frame_len,
                        cancel.clone(),
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, continuing");
                    self.sink.notify(&WorkFault {
                        message: "failed to accept connection".to_string(),
                        peer: None,
                        work_item: None,
                        cause: OffloadError::Accept(e),
                    });
                }
            }

            // Drop finished entries so the set stays bounded.
            sessions.retain(|handle| !handle.is_finished());
        }

        self.state_tx.send_replace(ServerState::Draining);
        tracing::info!(
            outstanding = sessions.len(),
            "shutdown signalled, draining sessions"
        );

        for handle in sessions {
            if let Err(e) = handle.await {
                // Session faults were already reported from inside the
                // task; only a panic/abort reaches this point.
                tracing::error!(error = %e, "session task did not complete");
                self.sink.notify(&WorkFault {
                    message: "session task did not complete".to_string(),
                    peer: None,
                    work_item: None,
                    cause: OffloadError::Session(Box::new(e)),
                });
            }
        }

        self.state_tx.send_replace(ServerState::Stopped);
        tracing::info!("work server stopped");
        Ok(())
    }
}

/// Cloneable observer of a server's lifecycle.
#[derive(Clone)]
pub struct ServerHandle {
    state: watch::Receiver<ServerState>,
    addr: watch::Receiver<Option<SocketAddr>>,
    accepted: Arc<AtomicU64>,
}

impl ServerHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Total connections accepted so far.
    pub fn sessions_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Wait until the server reaches `target`.
    ///
    /// Returns false if the server went away without ever reaching it.
    pub async fn wait_for_state(&mut self, target: ServerState) -> bool {
        loop {
            if *self.state.borrow_and_update() == target {
                return true;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow() == target;
            }
        }
    }

    /// Wait for the listener to come up and return its bound address.
    ///
    /// Returns None if the server went away before binding.
    pub async fn bound_addr(&mut self) -> Option<SocketAddr> {
        loop {
            if let Some(addr) = *self.addr.borrow_and_update() {
                return Some(addr);
            }
            if self.addr.changed().await.is_err() {
                return *self.addr.borrow();
            }
        }
    }
}
