//! Fault records and the fault-notification sink.
//!
//! Accept-level and session-level failures never terminate the server;
//! they are wrapped into a [`WorkFault`] and delivered synchronously to
//! zero or more subscribed listeners. What a listener does with a fault
//! (logging, metrics, alerting) is its own concern.
//!
//! A separate, serializable [`WireFault`] record is what travels back to
//! the initiator when a work item's execution fails.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, OffloadError};

/// A reported failure from the accept loop or a session.
///
/// Immutable once constructed; discarded after delivery.
#[derive(Debug)]
pub struct WorkFault<W> {
    /// Human-readable description, including the remote endpoint when it
    /// is known.
    pub message: String,
    /// Remote endpoint of the faulted session, if one was involved.
    pub peer: Option<SocketAddr>,
    /// The offending work item, if one had been deserialized before the
    /// failure.
    pub work_item: Option<Arc<W>>,
    /// The underlying cause.
    pub cause: OffloadError,
}

/// Observer of fault records.
///
/// Called synchronously from the server; keep implementations quick.
pub trait FaultListener<W>: Send + Sync {
    /// Handle one fault record.
    fn on_fault(&self, fault: &WorkFault<W>);
}

/// Any `Fn(&WorkFault<W>)` closure works as a listener.
impl<W, F> FaultListener<W> for F
where
    F: Fn(&WorkFault<W>) + Send + Sync,
{
    fn on_fault(&self, fault: &WorkFault<W>) {
        self(fault)
    }
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of fault listeners with synchronous delivery.
pub struct FaultSink<W> {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn FaultListener<W>>)>>,
    next_id: AtomicU64,
}

impl<W> FaultSink<W> {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a listener; returns an id usable with [`unsubscribe`].
    ///
    /// [`unsubscribe`]: FaultSink::unsubscribe
    pub fn subscribe(&self, listener: Arc<dyn FaultListener<W>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Detach a listener. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    /// Deliver a fault record to every subscribed listener, in
    /// subscription order.
    pub fn notify(&self, fault: &WorkFault<W>) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for (_, listener) in listeners.iter() {
            listener.on_fault(fault);
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<W> Default for FaultSink<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// The failure record sent back to the initiator over the wire when a
/// work item's execution fails.
///
/// The wire does not tag success vs failure structurally; the initiator
/// detects a fault by decoding this shape. Kept this way for
/// compatibility with the original protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFault {
    /// What went wrong, as reported by the work item.
    pub message: String,
    /// The next error in the source chain, if any.
    pub cause: Option<String>,
}

impl WireFault {
    /// Build a wire fault from an opaque execution error.
    pub fn from_error(err: &BoxError) -> Self {
        Self {
            message: err.to_string(),
            cause: err.source().map(|s| s.to_string()),
        }
    }
}
