//! Messages nested inside packet payloads.
//!
//! A payload carries zero or more messages back to back. Each message is
//! a varint type code followed by either a fixed, type-dependent payload
//! or, for [`Message::Data`], a varint *total length* (counting the type
//! and length bytes themselves) and the opaque data.
//!
//! Trailing bytes that do not parse as a message are not an error; the
//! iterator simply stops, leaving them unconsumed. Padding relies on
//! this.

use bytes::Bytes;

use crate::channel_id::ChannelId;
use crate::cookie::Cookie;
use crate::errors::{ProtocolError, Result};
use crate::header::Capabilities;
use crate::varint::{decode_varint, encode_varint, varint_len};

/// Message type codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Channel negotiation request.
    ChannelNew,
    /// Responder's answer to [`MessageKind::ChannelNew`].
    ChannelAcknowledge,
    /// Initiator's confirmation completing the handshake.
    ChannelFinalize,
    /// Cookie refresh accompanying early data; reserved.
    ChannelCookie,
    /// Application data.
    Data,
}

impl MessageKind {
    /// Wire code for this message kind.
    pub fn code(&self) -> u16 {
        match self {
            Self::ChannelNew => 10,
            Self::ChannelAcknowledge => 11,
            Self::ChannelFinalize => 12,
            Self::ChannelCookie => 13,
            Self::Data => 20,
        }
    }

    /// Look up a kind by wire code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            10 => Some(Self::ChannelNew),
            11 => Some(Self::ChannelAcknowledge),
            12 => Some(Self::ChannelFinalize),
            13 => Some(Self::ChannelCookie),
            20 => Some(Self::Data),
            _ => None,
        }
    }

    /// Fixed payload size for this kind, or `None` for variable-length
    /// messages that carry their own length.
    pub fn fixed_payload_size(&self) -> Option<usize> {
        match self {
            // initiator half + cookie1
            Self::ChannelNew => Some(2 + Cookie::SIZE),
            // full channel id + cookie1 echo + cookie2
            Self::ChannelAcknowledge => Some(ChannelId::SIZE + Cookie::SIZE * 2),
            // full channel id + cookie2 + capability bits
            Self::ChannelFinalize => Some(ChannelId::SIZE + Cookie::SIZE + 2),
            // either cookie + capability bits; the channel id is in the
            // packet header
            Self::ChannelCookie => Some(Cookie::SIZE + 2),
            Self::Data => None,
        }
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Start channel negotiation: the initiator half and a cookie the
    /// responder must echo.
    ChannelNew {
        /// Initiator half of the prospective channel identifier.
        initiator: u16,
        /// Keyed cookie over the initiator half.
        cookie1: Cookie,
    },

    /// The responder's answer: the completed identifier, the echoed
    /// initiator cookie, and the responder's own cookie.
    ChannelAcknowledge {
        /// Completed channel identifier.
        id: ChannelId,
        /// Echo of the initiator's cookie.
        cookie1: Cookie,
        /// Keyed cookie over the full identifier.
        cookie2: Cookie,
    },

    /// The initiator's confirmation, proving receipt of the responder
    /// cookie.
    ChannelFinalize {
        /// Completed channel identifier.
        id: ChannelId,
        /// The responder cookie being returned.
        cookie2: Cookie,
        /// Requested channel capabilities.
        capabilities: Capabilities,
    },

    /// Cookie refresh sent instead of acknowledge/finalize when data is
    /// already queued. Reserved; currently accepted and ignored.
    ChannelCookie {
        /// Whichever cookie applies at this point of the handshake.
        cookie: Cookie,
        /// Requested channel capabilities.
        capabilities: Capabilities,
    },

    /// Opaque application data.
    Data {
        /// The data bytes.
        payload: Bytes,
    },
}

impl Message {
    /// The wire kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ChannelNew { .. } => MessageKind::ChannelNew,
            Self::ChannelAcknowledge { .. } => MessageKind::ChannelAcknowledge,
            Self::ChannelFinalize { .. } => MessageKind::ChannelFinalize,
            Self::ChannelCookie { .. } => MessageKind::ChannelCookie,
            Self::Data { .. } => MessageKind::Data,
        }
    }

    /// Serialized size of this message in bytes.
    pub fn wire_size(&self) -> usize {
        let type_len = varint_len(u64::from(self.kind().code()));
        match self {
            Self::Data { payload } => data_wire_size(type_len, payload.len()),
            other => {
                // Kinds other than Data always report a fixed size.
                let fixed = other.kind().fixed_payload_size().unwrap_or(0);
                type_len + fixed
            },
        }
    }

    /// Overhead a [`Message::Data`] of `payload_len` bytes adds on the
    /// wire (type and length varints).
    pub fn data_overhead(payload_len: usize) -> usize {
        let type_len = varint_len(u64::from(MessageKind::Data.code()));
        data_wire_size(type_len, payload_len) - payload_len
    }

    /// Parse one message from the front of `buf`, returning it along
    /// with the bytes consumed.
    ///
    /// # Errors
    ///
    /// - `Decode` if the buffer ends inside the message
    /// - `InvalidMessageType` for unknown type codes
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let (code, type_len) = decode_varint(buf)?;
        let kind =
            MessageKind::from_code(code).ok_or(ProtocolError::InvalidMessageType(code))?;

        match kind.fixed_payload_size() {
            Some(fixed) => {
                let payload = buf
                    .get(type_len..type_len + fixed)
                    .ok_or(ProtocolError::Decode { what: "message payload" })?;
                let message = Self::parse_fixed(kind, payload)?;
                Ok((message, type_len + fixed))
            },
            None => {
                // Variable-length: the varint counts the whole message,
                // including the type and length bytes themselves.
                let (total, len_len) = decode_varint(&buf[type_len..])?;
                let total = total as usize;
                let header_len = type_len + len_len;
                if total < header_len || total > buf.len() {
                    return Err(ProtocolError::Decode { what: "message length" });
                }
                let payload = Bytes::copy_from_slice(&buf[header_len..total]);
                Ok((Self::Data { payload }, total))
            },
        }
    }

    fn parse_fixed(kind: MessageKind, payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { buf: payload };
        let message = match kind {
            MessageKind::ChannelNew => Self::ChannelNew {
                initiator: cursor.read_u16()?,
                cookie1: Cookie::from_wire(cursor.read_u32()?),
            },
            MessageKind::ChannelAcknowledge => Self::ChannelAcknowledge {
                id: ChannelId::from_full(cursor.read_u32()?),
                cookie1: Cookie::from_wire(cursor.read_u32()?),
                cookie2: Cookie::from_wire(cursor.read_u32()?),
            },
            MessageKind::ChannelFinalize => Self::ChannelFinalize {
                id: ChannelId::from_full(cursor.read_u32()?),
                cookie2: Cookie::from_wire(cursor.read_u32()?),
                capabilities: Capabilities::from_bits_retain(cursor.read_u16()?),
            },
            MessageKind::ChannelCookie => Self::ChannelCookie {
                cookie: Cookie::from_wire(cursor.read_u32()?),
                capabilities: Capabilities::from_bits_retain(cursor.read_u16()?),
            },
            MessageKind::Data => return Err(ProtocolError::Decode { what: "message" }),
        };
        Ok(message)
    }

    /// Serialize this message into the front of `out`, returning the
    /// bytes written.
    ///
    /// # Errors
    ///
    /// `Encode` if `out` cannot hold [`Message::wire_size`] bytes.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize> {
        let size = self.wire_size();
        if out.len() < size {
            return Err(ProtocolError::Encode { what: "message" });
        }

        let mut offset = encode_varint(u64::from(self.kind().code()), out)?;
        match self {
            Self::ChannelNew { initiator, cookie1 } => {
                offset += write(&mut out[offset..], &initiator.to_be_bytes());
                offset += write(&mut out[offset..], &cookie1.value().to_be_bytes());
            },
            Self::ChannelAcknowledge { id, cookie1, cookie2 } => {
                offset += write(&mut out[offset..], &id.full().to_be_bytes());
                offset += write(&mut out[offset..], &cookie1.value().to_be_bytes());
                offset += write(&mut out[offset..], &cookie2.value().to_be_bytes());
            },
            Self::ChannelFinalize { id, cookie2, capabilities } => {
                offset += write(&mut out[offset..], &id.full().to_be_bytes());
                offset += write(&mut out[offset..], &cookie2.value().to_be_bytes());
                offset += write(&mut out[offset..], &capabilities.bits().to_be_bytes());
            },
            Self::ChannelCookie { cookie, capabilities } => {
                offset += write(&mut out[offset..], &cookie.value().to_be_bytes());
                offset += write(&mut out[offset..], &capabilities.bits().to_be_bytes());
            },
            Self::Data { payload } => {
                offset += encode_varint(size as u64, &mut out[offset..])?;
                offset += write(&mut out[offset..], payload);
            },
        }
        debug_assert_eq!(offset, size);
        Ok(offset)
    }
}

/// Total wire size of a data message: the length varint covers itself,
/// so the size is a fixed point found in at most two steps.
fn data_wire_size(type_len: usize, payload_len: usize) -> usize {
    let mut total = type_len + 1 + payload_len;
    loop {
        let candidate = type_len + varint_len(total as u64) + payload_len;
        if candidate == total {
            return total;
        }
        total = candidate;
    }
}

fn write(out: &mut [u8], bytes: &[u8]) -> usize {
    out[..bytes.len()].copy_from_slice(bytes);
    bytes.len()
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl Cursor<'_> {
    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let (head, rest) = self
            .buf
            .split_at_checked(len)
            .ok_or(ProtocolError::Decode { what: "message payload" })?;
        self.buf = rest;
        Ok(head)
    }
}

/// Iterator over the messages in a payload block.
///
/// Yields messages in order until the remainder no longer parses; call
/// [`MessageIter::remaining`] afterwards for the number of unconsumed
/// bytes.
#[derive(Debug, Clone)]
pub struct MessageIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> MessageIter<'a> {
    /// Iterate over the messages at the front of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes not consumed by any yielded message.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

impl Iterator for MessageIter<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }
        match Message::parse(&self.buf[self.offset..]) {
            Ok((message, consumed)) => {
                self.offset += consumed;
                Some(message)
            },
            Err(_) => None,
        }
    }
}
