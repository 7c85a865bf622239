//! Work item and benchmark capabilities consumed by the server.
//!
//! The server never inspects a concrete work item type. It deserializes
//! a value of the embedder's chosen type from the wire and drives it
//! solely through [`WorkItem::execute`]; variants, dispatch, and the
//! meaning of the output are the embedder's business.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// One unit of computation executed on behalf of a remote initiator.
///
/// The implementing type (typically an enum of work kinds) must also be
/// deserializable from the wire; the server requires
/// `WorkItem + DeserializeOwned` at the session boundary.
#[async_trait]
pub trait WorkItem: Send + Sync + 'static {
    /// The result value sent back to the initiator on success.
    ///
    /// `Sync` because a session task serializes the output by reference
    /// while suspended on the send; the future must stay `Send`.
    type Output: Serialize + Send + Sync;

    /// Execute the work under the server's shutdown signal.
    ///
    /// A failure here does not abort the session: the server transports
    /// the error back to the initiator as a fault payload and reports it
    /// through the fault sink.
    async fn execute(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Self::Output, BoxError>;
}

/// Scores this server's current fitness for a category of work.
///
/// Shared read-only across all sessions, so implementations must be safe
/// for concurrent invocation. Larger/smaller meaning is a convention
/// owned by the initiator side, not enforced here.
#[async_trait]
pub trait WorkloadBenchmark: Send + Sync + 'static {
    /// Return the score for a work-category identifier.
    ///
    /// A failure surfaces as a session fault and closes that session;
    /// other sessions are unaffected.
    async fn score(&self, category: i32) -> std::result::Result<i64, BoxError>;
}
