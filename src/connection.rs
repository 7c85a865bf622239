//! Framed connection over a raw bidirectional byte stream.
//!
//! Implements the length-prefixed message channel both ends of a work
//! session speak:
//!
//! ```text
//! ┌────────────────┬──────────────────┐
//! │ Payload length │ Payload          │
//! │ 4 bytes, i32 BE│ exactly N bytes  │
//! └────────────────┴──────────────────┘
//! ```
//!
//! The prefix always equals the emitted payload length. A receiver reads
//! exactly that many bytes before decoding - never more, never fewer -
//! looping over partial reads however the transport fragments delivery.
//! Every read and write is cancellable through the shutdown signal.
//!
//! # Example
//!
//! ```ignore
//! use offload::connection::FramedConnection;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut conn = FramedConnection::new(stream);
//! let cancel = CancellationToken::new();
//! conn.send_object(&42i64, &cancel).await?;
//! let reply: String = conn.receive_object(&cancel).await?;
//! conn.shutdown().await;
//! ```

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::codec::{MsgPackCodec, PayloadCodec};
use crate::error::{OffloadError, Result};

/// Size of the frame length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default maximum payload size per frame (64 MiB).
///
/// A length prefix above this is treated as a protocol violation rather
/// than an allocation request.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A length-prefixed message channel over one byte stream.
///
/// Owns the stream exclusively for its lifetime. [`shutdown`] releases
/// it exactly once and is safe to call repeatedly; sessions invoke it on
/// every exit path.
///
/// The codec type parameter selects payload serialization at compile
/// time; both ends must agree on it.
///
/// [`shutdown`]: FramedConnection::shutdown
pub struct FramedConnection<S, C = MsgPackCodec> {
    stream: S,
    max_frame_len: usize,
    closed: bool,
    _codec: PhantomData<fn() -> C>,
}

impl<S, C> FramedConnection<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: PayloadCodec,
{
    /// Wrap a stream with the default frame size limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_len(stream, DEFAULT_MAX_FRAME_LEN)
    }

    /// Wrap a stream with an explicit frame size limit.
    pub fn with_max_frame_len(stream: S, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
            closed: false,
            _codec: PhantomData,
        }
    }

    /// Serialize `value` and write it as one frame.
    ///
    /// An empty encoded payload is a protocol violation: every message in
    /// the work protocol (category, score, work item, result, fault) is
    /// a present value.
    ///
    /// # Errors
    ///
    /// [`OffloadError::Encode`] if the codec fails,
    /// [`OffloadError::Io`] if the write fails,
    /// [`OffloadError::Cancelled`] if the shutdown signal fires first.
    pub async fn send_object<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let payload = C::encode(value)?;
        if payload.is_empty() {
            return Err(OffloadError::Protocol(
                "refusing to send empty payload".to_string(),
            ));
        }
        if payload.len() > self.max_frame_len {
            return Err(OffloadError::Protocol(format!(
                "payload of {} bytes exceeds frame limit of {}",
                payload.len(),
                self.max_frame_len
            )));
        }
        self.ensure_open()?;

        let len = i32::try_from(payload.len())
            .map_err(|_| OffloadError::Protocol("payload length exceeds i32".to_string()))?;

        self.write_all(&len.to_be_bytes(), cancel).await?;
        self.write_all(&payload, cancel).await?;
        self.flush(cancel).await
    }

    /// Read one frame and deserialize its payload.
    ///
    /// Reads exactly [`LEN_PREFIX_SIZE`] bytes, interprets them as the
    /// payload length, then reads exactly that many payload bytes before
    /// handing them to the codec. Partial delivery by the transport is
    /// tolerated by reading into the remaining buffer until satisfied;
    /// awaiting readiness means the loop never busy-spins while the peer
    /// is idle.
    ///
    /// # Errors
    ///
    /// [`OffloadError::ConnectionClosed`] if the peer closes cleanly at a
    /// frame boundary, [`OffloadError::Io`] if the stream ends mid-frame,
    /// [`OffloadError::Protocol`] on a non-positive or oversized length,
    /// [`OffloadError::Decode`] if the codec fails,
    /// [`OffloadError::Cancelled`] if the shutdown signal fires first.
    pub async fn receive_object<T: DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.ensure_open()?;

        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        self.read_exact(&mut prefix, true, cancel).await?;

        let len = i32::from_be_bytes(prefix);
        if len <= 0 {
            return Err(OffloadError::Protocol(format!(
                "invalid frame length prefix: {len}"
            )));
        }
        let len = len as usize;
        if len > self.max_frame_len {
            return Err(OffloadError::Protocol(format!(
                "frame of {len} bytes exceeds frame limit of {}",
                self.max_frame_len
            )));
        }

        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload, false, cancel).await?;

        C::decode(&payload)
    }

    /// Send a work-category identifier.
    ///
    /// A typed convenience over the generic object frame, not a distinct
    /// wire format.
    #[inline]
    pub async fn send_int(&mut self, value: i32, cancel: &CancellationToken) -> Result<()> {
        self.send_object(&value, cancel).await
    }

    /// Receive a work-category identifier.
    #[inline]
    pub async fn receive_int(&mut self, cancel: &CancellationToken) -> Result<i32> {
        self.receive_object(cancel).await
    }

    /// Send a benchmark score (wider than 32 bits by convention).
    #[inline]
    pub async fn send_long(&mut self, value: i64, cancel: &CancellationToken) -> Result<()> {
        self.send_object(&value, cancel).await
    }

    /// Receive a benchmark score.
    #[inline]
    pub async fn receive_long(&mut self, cancel: &CancellationToken) -> Result<i64> {
        self.receive_object(cancel).await
    }

    /// Release the underlying stream.
    ///
    /// Idempotent: only the first call shuts the stream down, later calls
    /// are no-ops. Shutdown errors are logged, not surfaced - the session
    /// is over either way.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "error shutting down stream");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(OffloadError::ConnectionClosed);
        }
        Ok(())
    }

    /// Fill `buf` completely, tolerating arbitrary fragmentation.
    ///
    /// `at_frame_boundary` distinguishes a clean close (no bytes of the
    /// next frame seen yet) from a stream that dies mid-frame.
    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        at_frame_boundary: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OffloadError::Cancelled),
                res = self.stream.read(&mut buf[filled..]) => res?,
            };
            if n == 0 {
                return if at_frame_boundary && filled == 0 {
                    Err(OffloadError::ConnectionClosed)
                } else {
                    Err(OffloadError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed before frame was complete",
                    )))
                };
            }
            filled += n;
        }
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OffloadError::Cancelled),
            res = self.stream.write_all(buf) => Ok(res?),
        }
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OffloadError::Cancelled),
            res = self.stream.flush() => Ok(res?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::io::duplex;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        id: i32,
        message: String,
    }

    fn conn<S: AsyncRead + AsyncWrite + Unpin + Send>(s: S) -> FramedConnection<S> {
        FramedConnection::new(s)
    }

    #[tokio::test]
    async fn test_object_round_trip() {
        let (a, b) = duplex(1024);
        let mut tx = conn(a);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        let sent = Payload {
            id: 42,
            message: "hello".to_string(),
        };
        tx.send_object(&sent, &cancel).await.unwrap();

        let received: Payload = rx.receive_object(&cancel).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_int_and_long_round_trip() {
        let (a, b) = duplex(1024);
        let mut tx = conn(a);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        tx.send_int(7, &cancel).await.unwrap();
        tx.send_long(9_000_000_000, &cancel).await.unwrap();

        assert_eq!(rx.receive_int(&cancel).await.unwrap(), 7);
        assert_eq!(rx.receive_long(&cancel).await.unwrap(), 9_000_000_000);
    }

    #[tokio::test]
    async fn test_framing_exactness() {
        let (a, mut raw) = duplex(1024);
        let mut tx = conn(a);
        let cancel = CancellationToken::new();

        tx.send_object("hello", &cancel).await.unwrap();
        tx.shutdown().await;

        let mut bytes = Vec::new();
        raw.read_to_end(&mut bytes).await.unwrap();

        // Exactly prefix + payload on the wire, prefix equals payload length.
        let expected = crate::codec::MsgPackCodec::encode("hello").unwrap();
        assert_eq!(bytes.len(), LEN_PREFIX_SIZE + expected.len());
        let len = i32::from_be_bytes(bytes[..LEN_PREFIX_SIZE].try_into().unwrap());
        assert_eq!(len as usize, expected.len());
        assert_eq!(&bytes[LEN_PREFIX_SIZE..], &expected[..]);
    }

    #[tokio::test]
    async fn test_one_byte_at_a_time_delivery() {
        let (mut raw, b) = duplex(1024);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        let payload = crate::codec::MsgPackCodec::encode("fragmented delivery").unwrap();
        let mut frame = (payload.len() as i32).to_be_bytes().to_vec();
        frame.extend_from_slice(&payload);

        let writer = tokio::spawn(async move {
            for byte in frame {
                raw.write_all(&[byte]).await.unwrap();
                raw.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let received: String = rx.receive_object(&cancel).await.unwrap();
        assert_eq!(received, "fragmented delivery");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_length_prefix() {
        let (mut raw, b) = duplex(1024);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        let payload = crate::codec::MsgPackCodec::encode(&1234i32).unwrap();
        let prefix = (payload.len() as i32).to_be_bytes();

        let writer = tokio::spawn(async move {
            raw.write_all(&prefix[..2]).await.unwrap();
            raw.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            raw.write_all(&prefix[2..]).await.unwrap();
            raw.write_all(&payload).await.unwrap();
            raw.flush().await.unwrap();
        });

        let received: i32 = rx.receive_object(&cancel).await.unwrap();
        assert_eq!(received, 1234);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_length_prefix_is_protocol_error() {
        let (mut raw, b) = duplex(64);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        raw.write_all(&0i32.to_be_bytes()).await.unwrap();

        let result: Result<i32> = rx.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_negative_length_prefix_is_protocol_error() {
        let (mut raw, b) = duplex(64);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        raw.write_all(&(-1i32).to_be_bytes()).await.unwrap();

        let result: Result<i32> = rx.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (a, b) = duplex(1024);
        let mut tx: FramedConnection<_> = FramedConnection::with_max_frame_len(a, 8);
        let mut rx: FramedConnection<_> = FramedConnection::with_max_frame_len(b, 8);
        let cancel = CancellationToken::new();

        let big = "a".repeat(64);
        let result = tx.send_object(&big, &cancel).await;
        assert!(matches!(result, Err(OffloadError::Protocol(_))));

        // A forged oversized prefix is rejected on the receive side too.
        let (mut raw, b) = duplex(64);
        let mut rx2: FramedConnection<_> = FramedConnection::with_max_frame_len(b, 8);
        raw.write_all(&1024i32.to_be_bytes()).await.unwrap();
        let result: Result<String> = rx2.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::Protocol(_))));
        drop(rx);
    }

    #[tokio::test]
    async fn test_clean_close_at_frame_boundary() {
        let (raw, b) = duplex(64);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        drop(raw);

        let result: Result<i32> = rx.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_io_error() {
        let (mut raw, b) = duplex(64);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();

        // Promise 100 bytes, deliver 3, then close.
        raw.write_all(&100i32.to_be_bytes()).await.unwrap();
        raw.write_all(&[1, 2, 3]).await.unwrap();
        drop(raw);

        let result: Result<Vec<u8>> = rx.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::Io(_))));
    }

    #[tokio::test]
    async fn test_cancelled_receive() {
        let (_raw, b) = duplex(64);
        let mut rx = conn(b);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<i32> = rx.receive_object(&cancel).await;
        assert!(matches!(result, Err(OffloadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_send() {
        let (a, _b) = duplex(64);
        let mut tx = conn(a);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tx.send_object(&1i32, &cancel).await;
        assert!(matches!(result, Err(OffloadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (a, _b) = duplex(64);
        let mut tx = conn(a);
        let cancel = CancellationToken::new();

        tx.shutdown().await;
        tx.shutdown().await;

        let result = tx.send_object(&1i32, &cancel).await;
        assert!(matches!(result, Err(OffloadError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        struct EmptyCodec;
        impl PayloadCodec for EmptyCodec {
            fn encode<T: Serialize + ?Sized>(_: &T) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            fn decode<T: serde::de::DeserializeOwned>(_: &[u8]) -> Result<T> {
                unreachable!("encode never produces a frame")
            }
        }

        let (a, _b) = duplex(64);
        let mut tx: FramedConnection<_, EmptyCodec> = FramedConnection::new(a);
        let cancel = CancellationToken::new();

        let result = tx.send_object(&1i32, &cancel).await;
        assert!(matches!(result, Err(OffloadError::Protocol(_))));
    }
}
