//! MsgPack codec using `rmp-serde`.
//!
//! Uses `to_vec_named` so structs serialize as maps (with field names)
//! rather than positional arrays. Initiators written in other languages
//! expect the map format, and it is what lets a fault record be told
//! apart from a result value by shape (the wire carries no structural
//! success/failure discriminator).

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::{OffloadError, Result};

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::Encode`] if the value cannot be serialized.
    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| OffloadError::Encode(e.into()))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::Decode`] if the bytes cannot be
    /// deserialized to type `T`.
    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| OffloadError::Decode(e.into()))
    }
}
