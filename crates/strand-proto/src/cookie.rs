//! Handshake cookies.
//!
//! Cookies let the responder validate that a finalize message corresponds
//! to an acknowledgement it actually issued, without keeping per-pending-
//! channel state. A cookie is a keyed checksum over the current secret,
//! both peer identifiers, and the negotiated part of the channel
//! identifier.
//!
//! The checksum is currently a CRC-32, which provides no cryptographic
//! strength. The interface stays keyed so that substituting an HMAC is a
//! local change.

use std::fmt;

use crate::channel_id::ChannelId;
use crate::peer::PeerId;

/// A 32-bit keyed checksum exchanged during channel establishment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cookie(u32);

impl Cookie {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4;

    /// Wrap a raw wire value.
    pub fn from_wire(value: u32) -> Self {
        Self(value)
    }

    /// The raw wire value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({:#010x})", self.0)
    }
}

fn keyed_checksum(secret: &[u8], initiator: &PeerId, responder: &PeerId, part: &[u8]) -> Cookie {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(secret);
    hasher.update(initiator.as_bytes());
    hasher.update(responder.as_bytes());
    hasher.update(part);
    Cookie(hasher.finalize())
}

/// Cookie for the first half of the handshake, when only the initiator
/// half of the channel identifier is known.
pub fn initiator_cookie(
    secret: &[u8],
    initiator: &PeerId,
    responder: &PeerId,
    initiator_half: u16,
) -> Cookie {
    keyed_checksum(secret, initiator, responder, &initiator_half.to_be_bytes())
}

/// Cookie for the second half of the handshake, over the full channel
/// identifier.
pub fn responder_cookie(
    secret: &[u8],
    initiator: &PeerId,
    responder: &PeerId,
    id: ChannelId,
) -> Cookie {
    keyed_checksum(secret, initiator, responder, &id.full().to_be_bytes())
}

/// Validate an initiator cookie against the inputs it claims to cover.
pub fn validate_initiator_cookie(
    cookie: Cookie,
    secret: &[u8],
    initiator: &PeerId,
    responder: &PeerId,
    initiator_half: u16,
) -> bool {
    cookie == initiator_cookie(secret, initiator, responder, initiator_half)
}

/// Validate a responder cookie against the inputs it claims to cover.
pub fn validate_responder_cookie(
    cookie: Cookie,
    secret: &[u8],
    initiator: &PeerId,
    responder: &PeerId,
    id: ChannelId,
) -> bool {
    cookie == responder_cookie(secret, initiator, responder, id)
}
