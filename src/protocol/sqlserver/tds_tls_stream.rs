//! TDS-encapsulated TLS stream
//!
//! During the SQL Server TLS handshake, TLS records travel inside TDS packets:
//! - The client side wraps its records in PRELOGIN packets (type 0x12)
//! - The server side wraps its records in TABULAR_RESULT packets (type 0x04)
//!
//! [`TdsTlsStream`] sits between a TLS library and the socket. Reads strip
//! TDS headers, writes are buffered and emitted as TDS packets on flush.
//! Once the handshake completes, `set_passthrough(true)` makes it transparent
//! and TLS records flow over the raw socket.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::constants::{status, TDS_HEADER_SIZE};
use super::packets::TdsHeader;

/// Maximum TDS packet size used when wrapping TLS data
const MAX_TDS_PACKET_SIZE: usize = 4096;

/// TDS-wrapped TLS transport over any byte stream
///
/// `outgoing_type` is the packet type stamped on written packets: PRELOGIN
/// when acting as a client, TABULAR_RESULT when acting as a server.
pub struct TdsTlsStream<S> {
    inner: S,
    outgoing_type: u8,
    /// Partial TDS header being read
    header_buf: [u8; TDS_HEADER_SIZE],
    header_pos: usize,
    /// Bytes remaining in current TDS packet payload
    payload_remaining: usize,
    /// TLS data written since the last flush
    pending: Vec<u8>,
    /// Framed packets being written, and how much of them already went out
    write_buf: Vec<u8>,
    write_pos: usize,
    packet_id: u8,
    /// When true, bypass TDS wrapping (used after TLS handshake completes)
    passthrough: bool,
}

impl<S> TdsTlsStream<S> {
    pub fn new(inner: S, outgoing_type: u8) -> Self {
        Self {
            inner,
            outgoing_type,
            header_buf: [0u8; TDS_HEADER_SIZE],
            header_pos: 0,
            payload_remaining: 0,
            pending: Vec::with_capacity(MAX_TDS_PACKET_SIZE),
            write_buf: Vec::with_capacity(MAX_TDS_PACKET_SIZE),
            write_pos: 0,
            packet_id: 1,
            passthrough: false,
        }
    }

    /// Enable/disable passthrough mode
    ///
    /// In passthrough mode, data is sent/received directly without TDS wrapping.
    pub fn set_passthrough(&mut self, enabled: bool) {
        debug!("TdsTlsStream: passthrough mode = {}", enabled);
        self.passthrough = enabled;
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Move pending TLS data into framed packets, EOM on the last one
    fn frame_pending(&mut self) {
        let max_payload = MAX_TDS_PACKET_SIZE - TDS_HEADER_SIZE;
        let total = self.pending.len();

        for (i, chunk) in self.pending.chunks(max_payload).enumerate() {
            let is_last = (i + 1) * max_payload >= total;
            let mut header = TdsHeader::new(
                self.outgoing_type,
                if is_last { status::EOM } else { status::NORMAL },
                (TDS_HEADER_SIZE + chunk.len()) as u16,
            );
            header.packet_id = self.packet_id;
            self.packet_id = self.packet_id.wrapping_add(1);

            self.write_buf.extend_from_slice(&header.serialize());
            self.write_buf.extend_from_slice(chunk);
        }

        trace!(
            "TdsTlsStream: framed {} TLS bytes into {} bytes of TDS packets",
            total,
            self.write_buf.len()
        );
        self.pending.clear();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TdsTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.passthrough {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        // Skip headers (and empty packets) until payload bytes are available
        while this.payload_remaining == 0 {
            while this.header_pos < TDS_HEADER_SIZE {
                let mut header_read = ReadBuf::new(&mut this.header_buf[this.header_pos..]);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut header_read))?;
                let n = header_read.filled().len();
                if n == 0 {
                    if this.header_pos == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Connection closed while reading TDS header",
                    )));
                }
                this.header_pos += n;
            }

            this.header_pos = 0;
            let length = u16::from_be_bytes([this.header_buf[2], this.header_buf[3]]) as usize;
            if length < TDS_HEADER_SIZE {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid TDS header length {}", length),
                )));
            }
            this.payload_remaining = length - TDS_HEADER_SIZE;
            trace!(
                "TdsTlsStream: TDS packet type=0x{:02X}, payload_len={}",
                this.header_buf[0],
                this.payload_remaining
            );
        }

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max_read = this.payload_remaining.min(buf.remaining());
        let dst = buf.initialize_unfilled_to(max_read);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed while reading TDS payload",
            )));
        }

        buf.advance(n);
        this.payload_remaining -= n;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TdsTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.passthrough {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        // Buffer the TLS data; it is framed on flush
        this.pending.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.passthrough || this.write_pos < this.write_buf.len() {
            loop {
                if this.write_pos < this.write_buf.len() {
                    let n = ready!(
                        Pin::new(&mut this.inner).poll_write(cx, &this.write_buf[this.write_pos..])
                    )?;
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "Failed to write TDS packet",
                        )));
                    }
                    this.write_pos += n;
                } else if !this.pending.is_empty() {
                    this.write_buf.clear();
                    this.write_pos = 0;
                    this.frame_pending();
                } else {
                    this.write_buf.clear();
                    this.write_pos = 0;
                    break;
                }
            }
        }

        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
