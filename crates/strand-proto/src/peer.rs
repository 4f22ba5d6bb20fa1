//! Peer identifiers.
//!
//! A peer identifier is a fixed-length byte string that is opaque to the
//! protocol: it is compared bytewise and never interpreted. Until a key
//! derivation mechanism replaces them, fresh identifiers are drawn from
//! the process RNG.

use std::fmt;

use rand::RngCore;

use crate::errors::{ProtocolError, Result};

/// Opaque 16-byte peer identifier.
///
/// Identifiers compare and hash bytewise. Display renders the identifier
/// as `0x`-prefixed lowercase hex, which [`PeerId::from_hex`] accepts
/// back.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId {
    bytes: [u8; Self::SIZE],
}

impl PeerId {
    /// Size of a peer identifier in bytes.
    pub const SIZE: usize = 16;

    /// Generate a random peer identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; Self::SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Copy a peer identifier out of `buf`.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if `buf` holds fewer than
    /// [`PeerId::SIZE`] bytes. Extra bytes are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let Some(head) = buf.get(..Self::SIZE) else {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: Self::SIZE,
                available: buf.len(),
            });
        };
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(head);
        Ok(Self { bytes })
    }

    /// Parse a peer identifier from hex, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// `InsufficientBufferSize` if the input is shorter than 32 hex
    /// digits, `Decode` if it is not valid hex.
    pub fn from_hex(input: &str) -> Result<Self> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.len() < Self::SIZE * 2 {
            return Err(ProtocolError::InsufficientBufferSize {
                needed: Self::SIZE * 2,
                available: digits.len(),
            });
        }

        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(&digits[..Self::SIZE * 2], &mut bytes)
            .map_err(|_| ProtocolError::Decode { what: "peer identifier" })?;
        Ok(Self { bytes })
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.bytes
    }
}

impl From<[u8; PeerId::SIZE]> for PeerId {
    fn from(bytes: [u8; PeerId::SIZE]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<pid/{}>", hex::encode(self.bytes))
    }
}
