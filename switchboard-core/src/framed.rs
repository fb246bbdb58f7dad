//! Buffered frame I/O over `compio` streams.
//!
//! Network backends describe their wire format with a [`FrameDecoder`] and
//! read through a [`FramedStream`], which owns the read buffer, the size
//! limit and the poison flag.
//!
//! # Cancellation
//!
//! Streaming loops drop in-flight reads when cancelled. A read that was
//! abandoned leaves the stream in an unknown position, so the stream is
//! marked poisoned (see [`crate::poison`]) and every later read or write
//! fails with a transport error.

use crate::error::{Result, SwitchboardError};
use crate::options::TransportOptions;
use crate::poison::PoisonGuard;
use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use std::time::Duration;
use tracing::trace;

/// Incremental decoder for one wire format.
pub trait FrameDecoder {
    /// Decoded frame type.
    type Frame;

    /// Decode one frame from the front of `src`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Frame>>;
}

/// A stream plus its read buffer and decoder.
pub struct FramedStream<S, D> {
    stream: S,
    decoder: D,
    buffer: BytesMut,
    read_size: usize,
    max_frame_size: Option<usize>,
    poisoned: bool,
}

impl<S, D> FramedStream<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: FrameDecoder,
{
    /// Wrap a fresh stream.
    pub fn new(stream: S, decoder: D, options: &TransportOptions) -> Self {
        Self::with_buffer(stream, decoder, BytesMut::new(), options)
    }

    /// Wrap a stream whose first bytes were already read elsewhere.
    pub fn with_buffer(stream: S, decoder: D, buffer: BytesMut, options: &TransportOptions) -> Self {
        Self {
            stream,
            decoder,
            buffer,
            read_size: options.read_buffer_size,
            max_frame_size: options.max_frame_size,
            poisoned: false,
        }
    }

    /// Returns true once a read or write was abandoned mid-flight.
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Read the next frame, or `None` on a clean EOF between frames.
    ///
    /// # Errors
    ///
    /// `Transport` on I/O failure, EOF inside a frame, an oversized frame,
    /// a decoder error, or a poisoned stream.
    pub async fn read_frame(&mut self) -> Result<Option<D::Frame>> {
        self.check_health()?;
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            if let Some(max) = self.max_frame_size {
                if self.buffer.len() > max {
                    return Err(SwitchboardError::transport(format!(
                        "frame exceeds {max} bytes"
                    )));
                }
            }
            if self.fill().await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(SwitchboardError::transport(
                    "connection closed in the middle of a frame",
                ));
            }
        }
    }

    /// [`read_frame`](Self::read_frame) bounded by `limit`.
    ///
    /// A zero `limit` waits forever. An expired read is abandoned, so the
    /// stream is poisoned afterwards.
    pub async fn read_frame_within(&mut self, limit: Duration) -> Result<Option<D::Frame>> {
        if limit.is_zero() {
            return self.read_frame().await;
        }
        match compio::time::timeout(limit, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(SwitchboardError::transport(format!(
                "no frame within {limit:?}"
            ))),
        }
    }

    /// Read exactly `len` raw bytes, bypassing the decoder.
    ///
    /// Used for fixed-size preambles such as the ZMTP greeting.
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        self.check_health()?;
        while self.buffer.len() < len {
            if self.fill().await? == 0 {
                return Err(SwitchboardError::transport(format!(
                    "connection closed after {} of {len} bytes",
                    self.buffer.len()
                )));
            }
        }
        Ok(self.buffer.split_to(len).freeze())
    }

    /// Write `data` completely.
    pub async fn write_all(&mut self, data: Vec<u8>) -> Result<()> {
        self.check_health()?;
        let guard = PoisonGuard::new(&mut self.poisoned);
        let BufResult(result, _) = self.stream.write_all(data).await;
        result.map_err(|e| SwitchboardError::transport(format!("write failed: {e}")))?;
        guard.disarm();
        Ok(())
    }

    /// Split into the stream and any bytes read but not yet decoded.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.buffer)
    }

    fn check_health(&self) -> Result<()> {
        if self.poisoned {
            return Err(SwitchboardError::transport(
                "stream poisoned by cancelled I/O",
            ));
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<usize> {
        let guard = PoisonGuard::new(&mut self.poisoned);
        let buf = Vec::with_capacity(self.read_size);
        let BufResult(result, buf) = self.stream.read(buf).await;
        let n = result.map_err(|e| SwitchboardError::transport(format!("read failed: {e}")))?;
        guard.disarm();

        trace!(bytes = n, "[FRAMED] Read");
        self.buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use compio::net::{TcpListener, TcpStream};

    /// One-byte length prefix, for exercising the buffer logic.
    struct LengthPrefixed;

    impl FrameDecoder for LengthPrefixed {
        type Frame = Bytes;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
            let Some(&len) = src.first() else {
                return Ok(None);
            };
            let len = len as usize;
            if src.len() < 1 + len {
                return Ok(None);
            }
            src.advance(1);
            Ok(Some(src.split_to(len).freeze()))
        }
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = futures::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[compio::test]
    async fn test_frames_split_across_writes() {
        let (client, server) = pair().await;
        let opts = TransportOptions::default();
        let mut writer = FramedStream::new(client, LengthPrefixed, &opts);
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        writer.write_all(vec![3, b'a', b'b']).await.unwrap();
        writer.write_all(vec![b'c', 1, b'z']).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), "abc");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), "z");
    }

    #[compio::test]
    async fn test_clean_eof_and_truncated_frame() {
        let (client, server) = pair().await;
        let opts = TransportOptions::default();
        let mut writer = FramedStream::new(client, LengthPrefixed, &opts);
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        writer.write_all(vec![5, b'x']).await.unwrap();
        drop(writer);

        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[compio::test]
    async fn test_max_frame_size() {
        let (client, server) = pair().await;
        let opts = TransportOptions::default().with_max_frame_size(4);
        let mut writer = FramedStream::new(client, LengthPrefixed, &opts);
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        writer.write_all(vec![200; 16]).await.unwrap();
        assert!(reader.read_frame().await.is_err());
    }

    #[compio::test]
    async fn test_cancelled_read_poisons() {
        let (_client, server) = pair().await;
        let opts = TransportOptions::default();
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        let (handle, cancel) = crate::cancel::cancel_pair();
        handle.cancel();
        // Already cancelled: the read is never polled, so nothing is poisoned.
        assert!(cancel.run_until(reader.read_frame()).await.is_none());
        assert!(!reader.is_poisoned());

        let timed_out =
            compio::time::timeout(Duration::from_millis(20), reader.read_frame()).await;
        assert!(timed_out.is_err());
        assert!(reader.is_poisoned());
        assert!(reader.read_frame().await.is_err());
    }

    #[compio::test]
    async fn test_read_frame_within_expires() {
        let (_client, server) = pair().await;
        let opts = TransportOptions::default();
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        let err = reader
            .read_frame_within(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
        assert!(reader.is_poisoned());
    }

    #[compio::test]
    async fn test_read_exact_then_leftover() {
        let (client, server) = pair().await;
        let opts = TransportOptions::default();
        let mut writer = FramedStream::new(client, LengthPrefixed, &opts);
        let mut reader = FramedStream::new(server, LengthPrefixed, &opts);

        writer.write_all(b"HELLO\x01!".to_vec()).await.unwrap();
        assert_eq!(reader.read_exact(5).await.unwrap(), "HELLO");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), "!");
        let (_stream, rest) = reader.into_parts();
        assert!(rest.is_empty());
    }
}
