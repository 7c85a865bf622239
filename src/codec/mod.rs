//! Codec module - serialization/deserialization for frame payloads.
//!
//! The wire protocol does not care how payloads are produced; it only
//! moves opaque byte blobs. The codec is therefore pluggable:
//!
//! - [`PayloadCodec`] - the codec capability consumed by
//!   [`FramedConnection`](crate::connection::FramedConnection)
//! - [`MsgPackCodec`] - the default MessagePack implementation
//!
//! # Design
//!
//! Codecs are marker structs with static methods selected at compile
//! time via a type parameter, not trait objects. Both ends of a
//! connection must use the same codec.
//!
//! # Example
//!
//! ```
//! use offload::codec::{MsgPackCodec, PayloadCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialization capability used for every frame payload.
///
/// Implementations map their concrete codec failures into
/// [`OffloadError::Encode`](crate::OffloadError::Encode) and
/// [`OffloadError::Decode`](crate::OffloadError::Decode).
pub trait PayloadCodec {
    /// Encode a value to payload bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode payload bytes to a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
