//! Error types for the offload server.

use thiserror::Error;

/// Boxed opaque error used at the capability boundaries (work items,
/// benchmarks), where the concrete failure type belongs to the caller.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all offload operations.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// I/O error on the underlying stream or listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload serialization failed in the codec.
    #[error("encode error: {0}")]
    Encode(#[source] BoxError),

    /// Payload deserialization failed in the codec.
    #[error("decode error: {0}")]
    Decode(#[source] BoxError),

    /// Framing contract violation (empty, negative or oversized frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// Listener-level accept failure. The accept loop reports these and
    /// keeps running.
    #[error("accept error: {0}")]
    Accept(#[source] std::io::Error),

    /// The workload benchmark failed to score a category.
    #[error("benchmark error: {0}")]
    Benchmark(#[source] BoxError),

    /// A work item's own execution failed. The cause is opaque to the
    /// server and is transported back to the initiator as data.
    #[error("work item execution failed: {0}")]
    Execution(#[source] BoxError),

    /// A session task could not be joined (panic or abort).
    #[error("session task failed: {0}")]
    Session(#[source] BoxError),

    /// The operation was interrupted by the shutdown signal.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias using OffloadError.
pub type Result<T> = std::result::Result<T, OffloadError>;
