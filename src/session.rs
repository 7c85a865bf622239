//! Per-connection session protocol.
//!
//! One independent task per accepted connection drives the full
//! exchange:
//!
//! 1. receive the work-category identifier (i32)
//! 2. score it through the workload benchmark
//! 3. send the score (i64)
//! 4. receive the work item
//! 5. execute it under the shutdown signal
//! 6. send back the result, or a [`WireFault`] if execution failed
//!
//! The steps are strictly sequential within a session; sessions share
//! nothing with each other. Any failure anywhere is contained at the
//! session boundary: the connection is released, the fault is wrapped
//! with the peer address (and the work item, if one was deserialized)
//! and handed to the fault sink. Nothing propagates out of the task.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::connection::FramedConnection;
use crate::error::{OffloadError, Result};
use crate::fault::{FaultSink, WireFault, WorkFault};
use crate::work::{WorkItem, WorkloadBenchmark};

/// Run one session to completion. Never returns an error; faults go to
/// the sink.
pub(crate) async fn run<S, W, B>(
    stream: S,
    peer: SocketAddr,
    benchmark: Arc<B>,
    sink: Arc<FaultSink<W>>,
    max_frame_len: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    W: WorkItem + DeserializeOwned,
    B: WorkloadBenchmark,
{
    let mut conn = FramedConnection::with_max_frame_len(stream, max_frame_len);
    let mut work_item: Option<Arc<W>> = None;

    let outcome = drive(&mut conn, &*benchmark, &mut work_item, &cancel).await;

    // Released on every exit path; idempotent.
    conn.shutdown().await;

    match outcome {
        Ok(()) => tracing::debug!(%peer, "session completed"),
        Err(cause) => {
            tracing::warn!(%peer, error = %cause, "session failed");
            sink.notify(&WorkFault {
                message: format!("work session with {peer} failed"),
                peer: Some(peer),
                work_item,
                cause,
            });
        }
    }
}

/// The protocol proper. The deserialized work item is parked in
/// `item_slot` so the boundary handler can attach it to a fault even
/// when a later step fails.
async fn drive<S, W, B>(
    conn: &mut FramedConnection<S>,
    benchmark: &B,
    item_slot: &mut Option<Arc<W>>,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    W: WorkItem + DeserializeOwned,
    B: WorkloadBenchmark,
{
    let category = conn.receive_int(cancel).await?;

    let score = benchmark
        .score(category)
        .await
        .map_err(OffloadError::Benchmark)?;
    tracing::debug!(category, score, "advertising benchmark score");

    conn.send_long(score, cancel).await?;

    // If the initiator declines the score it simply closes the
    // connection and this receive fails.
    let item: W = conn.receive_object(cancel).await?;
    let item = Arc::new(item);
    *item_slot = Some(Arc::clone(&item));

    match item.execute(cancel).await {
        Ok(output) => conn.send_object(&output, cancel).await,
        Err(cause) => {
            // The initiator learns why its work failed; locally the
            // failure is carried to the session boundary for the sink.
            conn.send_object(&WireFault::from_error(&cause), cancel)
                .await?;
            Err(OffloadError::Execution(cause))
        }
    }
}
