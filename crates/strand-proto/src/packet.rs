//! Packet envelope parsing and construction.
//!
//! A packet is laid out as:
//!
//! ```text
//! +---------------+----------------+---------+---------+--------+
//! | Public Header | Private Header | Payload | Padding | Footer |
//! +---------------+----------------+---------+---------+--------+
//! ```
//!
//! The packet size in the public header counts everything including the
//! envelope; the payload size in the private header counts only the
//! non-padding payload. Working with fixed-size packets keeps padding
//! below a chosen MTU and leaks as little payload-length information as
//! possible, but any buffer size is accepted.
//!
//! The footer checksum is a CRC-32C over all bytes before the footer.
//! It is addressed from the encoded packet size, not the buffer size, so
//! trailing bytes after the packet (as stream transports produce) are
//! ignored.

use crate::channel_id::ChannelId;
use crate::errors::{ProtocolError, Result};
use crate::header::{Flags, PrivateHeader, PublicHeader};
use crate::message::MessageIter;
use crate::peer::PeerId;
use crate::PROTOCOL_ID;

/// Size of the packet footer (checksum) in bytes.
pub const FOOTER_SIZE: usize = 4;

/// Size of the full envelope: both headers plus the footer.
pub const ENVELOPE_SIZE: usize = PublicHeader::SIZE + PrivateHeader::SIZE + FOOTER_SIZE;

/// Parsed packet envelope.
///
/// A `Packet` holds the deserialized header fields; the backing buffer
/// stays wherever it lives (usually a pool slot) and is passed to the
/// methods that need it. This keeps the type freely clonable while the
/// buffer remains shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    public: PublicHeader,
    private: PrivateHeader,
    checksum: u32,
}

impl Packet {
    /// Parse the envelope out of `buf`.
    ///
    /// # Errors
    ///
    /// - `InsufficientBufferSize` if `buf` cannot hold an envelope
    /// - `Decode` if the encoded packet size exceeds the buffer, falls
    ///   short of the envelope, or the payload size exceeds the space
    ///   the packet size allows
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENVELOPE_SIZE {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: ENVELOPE_SIZE,
                available: buf.len(),
            });
        }

        let public = *PublicHeader::from_bytes(buf)?;
        let packet_size = usize::from(public.packet_size());
        if packet_size > buf.len() || packet_size < ENVELOPE_SIZE {
            return Err(ProtocolError::Decode { what: "packet size" });
        }

        let private = *PrivateHeader::from_bytes(&buf[PublicHeader::SIZE..])?;
        if usize::from(private.payload_size()) > packet_size - ENVELOPE_SIZE {
            return Err(ProtocolError::Decode { what: "payload size" });
        }

        let footer = &buf[packet_size - FOOTER_SIZE..packet_size];
        let checksum = u32::from_be_bytes([footer[0], footer[1], footer[2], footer[3]]);

        Ok(Self { public, private, checksum })
    }

    /// Start a fresh outgoing packet for a buffer of `buffer_len` bytes.
    ///
    /// The packet size is fixed to the full buffer so payload lengths
    /// stay hidden behind padding; the payload size starts at zero.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if the buffer cannot hold an envelope or
    /// exceeds what a 16-bit packet size can express.
    pub fn outgoing(
        buffer_len: usize,
        sender: &PeerId,
        recipient: &PeerId,
        channel: ChannelId,
        sequence_no: u16,
    ) -> Result<Self> {
        if buffer_len < ENVELOPE_SIZE || buffer_len > usize::from(u16::MAX) {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: ENVELOPE_SIZE,
                available: buffer_len,
            });
        }

        let mut public = PublicHeader::new(PROTOCOL_ID, sender, recipient, channel);
        public.set_packet_size(buffer_len as u16);
        Ok(Self {
            public,
            private: PrivateHeader::new(sequence_no, 0),
            checksum: 0,
        })
    }

    /// Protocol identifier from the public header.
    pub fn proto(&self) -> u32 {
        self.public.proto()
    }

    /// Whether the protocol identifier matches [`PROTOCOL_ID`].
    pub fn has_valid_proto(&self) -> bool {
        self.proto() == PROTOCOL_ID
    }

    /// Sending peer.
    pub fn sender(&self) -> PeerId {
        self.public.sender()
    }

    /// Receiving peer.
    pub fn recipient(&self) -> PeerId {
        self.public.recipient()
    }

    /// Channel this packet belongs to.
    pub fn channel(&self) -> ChannelId {
        self.public.channel()
    }

    /// Flag bits.
    pub fn flags(&self) -> Flags {
        self.public.flags()
    }

    /// Total packet size, envelope included.
    pub fn packet_size(&self) -> u16 {
        self.public.packet_size()
    }

    /// Sequence number from the private header.
    pub fn sequence_no(&self) -> u16 {
        self.private.sequence_no()
    }

    /// Non-padding payload size.
    pub fn payload_size(&self) -> u16 {
        self.private.payload_size()
    }

    /// Checksum read from (or written to) the footer.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Update the payload size.
    pub fn set_payload_size(&mut self, payload_size: u16) {
        self.private.set_payload_size(payload_size);
    }

    /// Byte offset where the payload starts.
    pub fn payload_offset() -> usize {
        PublicHeader::SIZE + PrivateHeader::SIZE
    }

    /// Payload capacity of a `buffer_len`-byte buffer.
    pub fn max_payload_size(buffer_len: usize) -> usize {
        buffer_len.saturating_sub(ENVELOPE_SIZE)
    }

    /// The non-padding payload bytes within `buf`.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` is shorter than the headers
    /// claim.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8]> {
        let start = Self::payload_offset();
        let end = start + usize::from(self.payload_size());
        buf.get(start..end).ok_or(ProtocolError::InsufficientBufferSize {
            needed: end,
            available: buf.len(),
        })
    }

    /// Iterate over the messages in this packet's payload.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` is shorter than the headers
    /// claim.
    pub fn messages<'a>(&self, buf: &'a [u8]) -> Result<MessageIter<'a>> {
        Ok(MessageIter::new(self.payload(buf)?))
    }

    /// Compute the footer checksum for the packet bytes in `buf`.
    ///
    /// The checksum covers `buf[0 .. packet_size - FOOTER_SIZE]`.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` is shorter than the packet
    /// size.
    pub fn compute_checksum(&self, buf: &[u8]) -> Result<u32> {
        let end = usize::from(self.packet_size());
        if buf.len() < end {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: end,
                available: buf.len(),
            });
        }
        Ok(crc32c::crc32c(&buf[..end - FOOTER_SIZE]))
    }

    /// Whether the footer checksum matches the packet bytes.
    pub fn has_valid_checksum(&self, buf: &[u8]) -> bool {
        self.compute_checksum(buf).is_ok_and(|computed| computed == self.checksum)
    }

    /// Write both headers into `buf`.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` cannot hold the headers.
    pub fn write_headers(&self, buf: &mut [u8]) -> Result<()> {
        let needed = PublicHeader::SIZE + PrivateHeader::SIZE;
        if buf.len() < needed {
            return Err(ProtocolError::InsufficientBufferSize {
                needed,
                available: buf.len(),
            });
        }
        buf[..PublicHeader::SIZE].copy_from_slice(&self.public.to_bytes());
        buf[PublicHeader::SIZE..needed].copy_from_slice(&self.private.to_bytes());
        Ok(())
    }

    /// Fill the padding region of `buf` between payload and footer.
    ///
    /// Each padding byte is `padding_len % 255` in the spirit of PKCS#7.
    /// The value carries no semantics (the headers encode all lengths),
    /// but the bytes must never leak uninitialized memory.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` is shorter than the packet
    /// size.
    pub fn write_padding(&self, buf: &mut [u8]) -> Result<()> {
        let end = usize::from(self.packet_size());
        if buf.len() < end {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: end,
                available: buf.len(),
            });
        }
        let start = Self::payload_offset() + usize::from(self.payload_size());
        let padding = &mut buf[start..end - FOOTER_SIZE];
        let value = (padding.len() % 255) as u8;
        padding.fill(value);
        Ok(())
    }

    /// Compute the checksum over `buf` and write it into the footer,
    /// recording it on the packet.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` is shorter than the packet
    /// size.
    pub fn write_checksum(&mut self, buf: &mut [u8]) -> Result<u32> {
        let checksum = self.compute_checksum(buf)?;
        let end = usize::from(self.packet_size());
        buf[end - FOOTER_SIZE..end].copy_from_slice(&checksum.to_be_bytes());
        self.checksum = checksum;
        Ok(checksum)
    }
}
