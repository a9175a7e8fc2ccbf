//! TDS packet structures
//!
//! This module defines the 8-byte packet header and [`Message`], one complete
//! framed packet as it travelled on the wire.
//! Reference: MS-TDS specification (Microsoft Open Specifications)

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::{status, MAX_PACKET_SIZE, TDS_HEADER_SIZE};
use super::error::{Result, TdsParseError};

/// TDS packet header (8 bytes)
///
/// All TDS packets begin with this fixed-size header.
/// Note: Length field is big-endian, unlike most TDS data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdsHeader {
    /// Packet type (PRELOGIN=0x12, LOGIN7=0x10, TABULAR_RESULT=0x04, etc.)
    pub packet_type: u8,
    /// Status flags (0x01 = EOM - End of Message)
    pub status: u8,
    /// Total packet length including header (big-endian)
    pub length: u16,
    /// Server Process ID (0 from client, assigned by server)
    pub spid: u16,
    /// Packet ID (incrementing counter, wraps at 255)
    pub packet_id: u8,
    /// Window (always 0, reserved)
    pub window: u8,
}

impl TdsHeader {
    /// Create a new TDS header
    pub fn new(packet_type: u8, status: u8, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Parse header from bytes
    ///
    /// Returns `None` only when fewer than 8 bytes are given.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TDS_HEADER_SIZE {
            return None;
        }

        Some(Self {
            packet_type: data[0],
            status: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
            spid: u16::from_be_bytes([data[4], data[5]]),
            packet_id: data[6],
            window: data[7],
        })
    }

    /// Serialize header to bytes
    pub fn serialize(&self) -> [u8; TDS_HEADER_SIZE] {
        let length_bytes = self.length.to_be_bytes();
        let spid_bytes = self.spid.to_be_bytes();

        [
            self.packet_type,
            self.status,
            length_bytes[0],
            length_bytes[1],
            spid_bytes[0],
            spid_bytes[1],
            self.packet_id,
            self.window,
        ]
    }

    /// Check if this is the last packet in the message
    pub fn is_end_of_message(&self) -> bool {
        (self.status & status::EOM) != 0
    }

    /// Get the payload length (total length minus header)
    pub fn payload_length(&self) -> usize {
        self.length.saturating_sub(TDS_HEADER_SIZE as u16) as usize
    }
}

impl Default for TdsHeader {
    fn default() -> Self {
        Self::new(0, status::EOM, TDS_HEADER_SIZE as u16)
    }
}

/// One framed TDS packet: header plus exactly `length - 8` payload bytes
///
/// The bytes are kept verbatim so forwarding is a plain copy. Rewrites build
/// a new message with [`Message::with_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: TdsHeader,
    bytes: Bytes,
}

impl Message {
    /// Wrap a complete packet
    ///
    /// Fails unless the header's length field matches `bytes.len()`.
    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        let header = TdsHeader::parse(&bytes).ok_or(TdsParseError::TooShort)?;
        if header.length as usize != bytes.len() {
            return Err(TdsParseError::InvalidLength);
        }
        Ok(Self { header, bytes })
    }

    /// Build a single-packet message (EOM set, spid 0, packet id 1)
    pub fn new(packet_type: u8, payload: &[u8]) -> Result<Self> {
        let header = TdsHeader::new(packet_type, status::EOM, 0);
        Self::with_header(header, payload)
    }

    /// Build a message reusing `self`'s header metadata with a new payload
    ///
    /// Type, status, spid, packet id and window are preserved and the length
    /// is recomputed.
    pub fn with_payload(&self, payload: &[u8]) -> Result<Self> {
        Self::with_header(self.header, payload)
    }

    /// Build a message from a saved header and a new payload
    ///
    /// Same as [`Message::with_payload`] when the original message itself
    /// is no longer around.
    pub fn with_header(mut header: TdsHeader, payload: &[u8]) -> Result<Self> {
        let total = TDS_HEADER_SIZE + payload.len();
        if total > MAX_PACKET_SIZE {
            return Err(TdsParseError::InvalidLength);
        }
        header.length = total as u16;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&header.serialize());
        buf.put_slice(payload);
        Ok(Self {
            header,
            bytes: buf.freeze(),
        })
    }

    pub fn header(&self) -> &TdsHeader {
        &self.header
    }

    pub fn packet_type(&self) -> u8 {
        self.header.packet_type
    }

    /// Bytes after the header
    pub fn payload(&self) -> &[u8] {
        &self.bytes[TDS_HEADER_SIZE..]
    }

    /// Full wire bytes, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a message carries at least its header
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
