//! Packet header structures with zero-copy parsing.
//!
//! A packet opens with a fixed 44-byte public header that is never
//! encrypted, followed by a 4-byte private header that may be covered by
//! encryption once that layer exists. Both are raw big-endian binary so
//! that routing decisions need no deserialization pass.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::channel_id::ChannelId;
use crate::errors::{ProtocolError, Result};
use crate::peer::PeerId;

bitflags::bitflags! {
    /// Per-packet flag bits, LSB-first.
    ///
    /// No flag is acted upon yet; both defined bits are placeholders for
    /// future development. Undefined bits must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        /// The private header and payload are encrypted.
        const ENCRYPTED = 1 << 0;
        /// QUIC-style latency spin bit.
        const SPIN_BIT = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Per-channel capability bits negotiated during finalization.
    ///
    /// Currently informational only; the bit positions are fixed so that
    /// future message-compatible peers are not broken.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        /// Resend lost packets.
        const RESEND = 1 << 0;
        /// Strict packet ordering.
        const ORDERED = 1 << 1;
        /// Close the channel when loss becomes final.
        const CLOSE_ON_LOSS = 1 << 2;
    }
}

/// Fixed 44-byte public packet header (big-endian network byte order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues; typed
/// access goes through the accessor methods.
///
/// # Invariants
///
/// - `packet_size` counts the entire packet including this header, the
///   private header and the footer. It never exceeds the backing buffer.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PublicHeader {
    proto: [u8; 4],
    sender: [u8; PeerId::SIZE],
    recipient: [u8; PeerId::SIZE],
    channel: [u8; 4],
    flags: [u8; 2],
    packet_size: [u8; 2],
}

impl PublicHeader {
    /// Size of the serialized public header (44 bytes).
    pub const SIZE: usize = 44;

    /// Create a header with the given endpoints and channel; flags clear,
    /// packet size zero.
    pub fn new(proto: u32, sender: &PeerId, recipient: &PeerId, channel: ChannelId) -> Self {
        Self {
            proto: proto.to_be_bytes(),
            sender: *sender.as_bytes(),
            recipient: *recipient.as_bytes(),
            channel: channel.full().to_be_bytes(),
            flags: [0; 2],
            packet_size: [0; 2],
        }
    }

    /// Parse a header from the front of `bytes` (zero-copy).
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if fewer than [`PublicHeader::SIZE`]
    /// bytes are available. No field validation happens here; protocol
    /// and checksum checks belong to the validation stage.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::InsufficientBufferSize {
                needed: Self::SIZE,
                available: bytes.len(),
            })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }

    /// Protocol identifier.
    pub fn proto(&self) -> u32 {
        u32::from_be_bytes(self.proto)
    }

    /// Sending peer.
    pub fn sender(&self) -> PeerId {
        PeerId::from(self.sender)
    }

    /// Receiving peer.
    pub fn recipient(&self) -> PeerId {
        PeerId::from(self.recipient)
    }

    /// Channel this packet belongs to.
    pub fn channel(&self) -> ChannelId {
        ChannelId::from_full(u32::from_be_bytes(self.channel))
    }

    /// Flag bits. Undefined bits are preserved as seen on the wire.
    pub fn flags(&self) -> Flags {
        Flags::from_bits_retain(u16::from_be_bytes(self.flags))
    }

    /// Total packet size in bytes, envelope included.
    pub fn packet_size(&self) -> u16 {
        u16::from_be_bytes(self.packet_size)
    }

    /// Update the sender.
    pub fn set_sender(&mut self, sender: &PeerId) {
        self.sender = *sender.as_bytes();
    }

    /// Update the recipient.
    pub fn set_recipient(&mut self, recipient: &PeerId) {
        self.recipient = *recipient.as_bytes();
    }

    /// Update the channel identifier.
    pub fn set_channel(&mut self, channel: ChannelId) {
        self.channel = channel.full().to_be_bytes();
    }

    /// Update the flag bits.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags.bits().to_be_bytes();
    }

    /// Update the total packet size.
    pub fn set_packet_size(&mut self, size: u16) {
        self.packet_size = size.to_be_bytes();
    }
}

impl std::fmt::Debug for PublicHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicHeader")
            .field("proto", &format_args!("{:#010x}", self.proto()))
            .field("sender", &self.sender())
            .field("recipient", &self.recipient())
            .field("channel", &self.channel())
            .field("flags", &self.flags())
            .field("packet_size", &self.packet_size())
            .finish()
    }
}

impl PartialEq for PublicHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicHeader {}

/// 4-byte private packet header (potentially encrypted in future).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Default)]
pub struct PrivateHeader {
    sequence_no: [u8; 2],
    payload_size: [u8; 2],
}

impl PrivateHeader {
    /// Size of the serialized private header (4 bytes).
    pub const SIZE: usize = 4;

    /// Construct from field values.
    pub fn new(sequence_no: u16, payload_size: u16) -> Self {
        Self {
            sequence_no: sequence_no.to_be_bytes(),
            payload_size: payload_size.to_be_bytes(),
        }
    }

    /// Parse a private header from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if fewer than [`PrivateHeader::SIZE`]
    /// bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::InsufficientBufferSize {
                needed: Self::SIZE,
                available: bytes.len(),
            })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }

    /// Per-channel monotonic sequence number; wraps explicitly.
    pub fn sequence_no(&self) -> u16 {
        u16::from_be_bytes(self.sequence_no)
    }

    /// Bytes of non-padding payload.
    pub fn payload_size(&self) -> u16 {
        u16::from_be_bytes(self.payload_size)
    }

    /// Update the sequence number.
    pub fn set_sequence_no(&mut self, sequence_no: u16) {
        self.sequence_no = sequence_no.to_be_bytes();
    }

    /// Update the payload size.
    pub fn set_payload_size(&mut self, payload_size: u16) {
        self.payload_size = payload_size.to_be_bytes();
    }
}

impl std::fmt::Debug for PrivateHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateHeader")
            .field("sequence_no", &self.sequence_no())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}

impl PartialEq for PrivateHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PrivateHeader {}
