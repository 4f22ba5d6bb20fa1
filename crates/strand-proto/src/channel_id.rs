//! Channel identifiers.
//!
//! A channel identifier is a 32-bit value split into two 16-bit halves.
//! The initiating side picks the (most significant) initiator half when
//! it requests a new channel; the responding side fills in the responder
//! half. There is no fixed client or server role; either peer may
//! initiate any given channel.
//!
//! The half value `0xF0F0` is a sentinel meaning "absent". An identifier
//! with both halves absent is the *default channel*, which requires no
//! negotiation and carries handshake messages.

use std::fmt;

use rand::Rng;

use crate::errors::{ProtocolError, Result};

/// 32-bit channel identifier composed of an initiator and responder half.
///
/// Equality, ordering and hashing all operate on the full 32-bit value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId {
    initiator: u16,
    responder: u16,
}

impl ChannelId {
    /// Sentinel half value denoting "absent".
    pub const SENTINEL_HALF: u16 = 0xF0F0;

    /// The default channel: both halves absent, no negotiation required.
    pub const DEFAULT: Self =
        Self { initiator: Self::SENTINEL_HALF, responder: Self::SENTINEL_HALF };

    /// Serialized size in bytes.
    pub const SIZE: usize = 4;

    /// Construct from explicit halves.
    pub fn new(initiator: u16, responder: u16) -> Self {
        Self { initiator, responder }
    }

    /// Construct a partial identifier holding only an initiator half.
    pub fn from_initiator(initiator: u16) -> Self {
        Self { initiator, responder: Self::SENTINEL_HALF }
    }

    /// Reconstruct from the full 32-bit wire value.
    pub fn from_full(full: u32) -> Self {
        Self { initiator: (full >> 16) as u16, responder: full as u16 }
    }

    /// The full 32-bit wire value; the initiator half occupies the most
    /// significant bits.
    pub fn full(&self) -> u32 {
        u32::from(self.initiator) << 16 | u32::from(self.responder)
    }

    /// Initiator half.
    pub fn initiator(&self) -> u16 {
        self.initiator
    }

    /// Responder half.
    pub fn responder(&self) -> u16 {
        self.responder
    }

    /// Whether the initiator half is set.
    pub fn has_initiator(&self) -> bool {
        self.initiator != Self::SENTINEL_HALF
    }

    /// Whether the responder half is set.
    pub fn has_responder(&self) -> bool {
        self.responder != Self::SENTINEL_HALF
    }

    /// Whether both halves are set.
    pub fn is_complete(&self) -> bool {
        self.has_initiator() && self.has_responder()
    }

    /// This identifier with the responder half cleared.
    pub fn partial(&self) -> Self {
        Self { initiator: self.initiator, responder: Self::SENTINEL_HALF }
    }

    /// Create a partial identifier with a fresh random initiator half.
    pub fn new_partial() -> Self {
        Self::from_initiator(random_half())
    }

    /// Fill in a fresh random responder half.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` unless the initiator half is set and the
    /// responder half is not.
    pub fn complete(&mut self) -> Result<()> {
        if !self.has_initiator() || self.has_responder() {
            return Err(ProtocolError::InvalidChannelId);
        }
        self.responder = random_half();
        Ok(())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:04x}:{:04x}]", self.initiator, self.responder)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Draw a random half from the full 16-bit range, rejecting the sentinel.
fn random_half() -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let half: u16 = rng.r#gen();
        if half != ChannelId::SENTINEL_HALF {
            return half;
        }
    }
}
