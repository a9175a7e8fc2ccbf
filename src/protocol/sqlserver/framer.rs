//! TDS message framing over a byte stream
//!
//! [`TdsFramer`] is a [`tokio_util::codec::Decoder`] / [`Encoder`] pair that
//! splits an arbitrarily fragmented byte stream into [`Message`]s using the
//! big-endian length at header offset 2, and joins messages back onto the
//! wire unchanged. [`MessageReader`] drives the decoder from any
//! [`AsyncRead`] without taking ownership away from the caller, so the
//! underlying socket can still be written to or upgraded to TLS.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::TDS_HEADER_SIZE;
use super::packets::Message;
use crate::error::{ProxyError, Result};

/// Initial read buffer capacity (one default-sized TDS packet plus slack)
const READ_BUFFER_SIZE: usize = 8192;

/// Splits and joins TDS messages
///
/// The decoder never yields a partial message and leaves any bytes past the
/// current message in the buffer for the next call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TdsFramer;

impl TdsFramer {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for TdsFramer {
    type Item = Message;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < TDS_HEADER_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < TDS_HEADER_SIZE {
            return Err(ProxyError::Framing(format!(
                "TDS length {} is smaller than the {}-byte header (type 0x{:02X})",
                length, TDS_HEADER_SIZE, src[0]
            )));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length).freeze();
        let message = Message::from_bytes(frame)?;
        trace!(
            "Framed TDS message type=0x{:02X} len={}",
            message.packet_type(),
            message.len()
        );
        Ok(Some(message))
    }
}

impl Encoder<Message> for TdsFramer {
    type Error = ProxyError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

/// Reads whole TDS messages from a stream
pub struct MessageReader<R> {
    inner: R,
    buffer: BytesMut,
    framer: TdsFramer,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            framer: TdsFramer::new(),
        }
    }

    /// Read until one complete message is available
    ///
    /// Returns `Ok(None)` on EOF at a message boundary. EOF in the middle of
    /// a message is a framing error. Cancel-safe: bytes read before the
    /// future is dropped stay buffered.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.framer.decode(&mut self.buffer)? {
                return Ok(Some(message));
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProxyError::Framing(format!(
                    "connection closed with {} bytes of an incomplete message",
                    self.buffer.len()
                )));
            }
        }
    }

    /// Bytes received but not yet framed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Give the stream back for a transport upgrade
    ///
    /// Fails if the peer already sent bytes beyond the last framed message,
    /// since those would be lost.
    pub fn into_inner(self) -> Result<R> {
        if !self.buffer.is_empty() {
            return Err(ProxyError::Protocol(format!(
                "{} unexpected bytes buffered before transport upgrade",
                self.buffer.len()
            )));
        }
        Ok(self.inner)
    }
}

/// Write one message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
