//! # offload
//!
//! Worker-side server for offloading units of computation over a framed
//! stream transport.
//!
//! An initiator connects, sends a work-category identifier, reads this
//! server's benchmark score for that category, and - if the score suits
//! it - sends a work item. The server executes the item and sends back
//! the result, or a fault record describing why execution failed.
//!
//! ## Architecture
//!
//! - [`connection::FramedConnection`] - length-prefixed message channel
//!   over any byte stream, cancellable in both directions
//! - [`work::WorkItem`] / [`work::WorkloadBenchmark`] - the capabilities
//!   the embedder plugs in
//! - [`server::WorkServer`] - accept loop, concurrent sessions, graceful
//!   drain on shutdown
//! - [`fault::FaultSink`] - observer channel for accept and session
//!   failures; the server never crashes on a misbehaving client
//!
//! ## Example
//!
//! ```ignore
//! use offload::{WorkServer, WorkItem, WorkloadBenchmark};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let server = WorkServer::<MyJob, _>::builder(MyBenchmark)
//!     .bind_addr("0.0.0.0:7077".parse()?)
//!     .build();
//!
//! tokio::spawn({
//!     let cancel = cancel.clone();
//!     async move { server.run(cancel).await }
//! });
//!
//! // ... later: cancel.cancel() drains sessions and stops the server.
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod fault;
pub mod server;
pub mod transport;
pub mod work;

mod session;

pub use codec::{MsgPackCodec, PayloadCodec};
pub use connection::FramedConnection;
pub use error::{BoxError, OffloadError, Result};
pub use fault::{FaultListener, FaultSink, SubscriptionId, WireFault, WorkFault};
pub use server::{ServerHandle, ServerState, WorkServer, WorkServerBuilder};
pub use transport::{SessionListener, TcpTransport};
pub use work::{WorkItem, WorkloadBenchmark};
