//! Wire format for the Strand channel multiplexing protocol.
//!
//! Strand lets two peers establish multiple logically independent,
//! bidirectional channels over an arbitrary datagram or stream transport.
//! This crate defines the bit-exact wire layer shared by both endpoints:
//!
//! - [`PeerId`]: opaque 16-byte peer identifiers
//! - [`ChannelId`]: the two-half channel identifier algebra
//! - [`Cookie`]: keyed handshake cookies for stateless admission control
//! - [`PublicHeader`], [`PrivateHeader`], [`Packet`]: the packet envelope
//! - [`Message`], [`MessageIter`]: the messages nested in packet payloads
//!
//! All multi-byte integers on the wire are big-endian; varints use the
//! 7-bit continuation encoding. The crate performs no I/O and allocates
//! only where message payloads must be owned.

pub mod channel_id;
pub mod cookie;
pub mod errors;
pub mod header;
pub mod message;
pub mod packet;
pub mod peer;
pub mod varint;

pub use channel_id::ChannelId;
pub use cookie::{
    Cookie, initiator_cookie, responder_cookie, validate_initiator_cookie,
    validate_responder_cookie,
};
pub use errors::{ProtocolError, Result};
pub use header::{Capabilities, Flags, PrivateHeader, PublicHeader};
pub use message::{Message, MessageIter, MessageKind};
pub use packet::Packet;
pub use peer::PeerId;

/// Protocol identifier carried in every packet's public header.
///
/// Packets with a different value are invalid and dropped during
/// validation.
pub const PROTOCOL_ID: u32 = 0x0C22_9D94;
