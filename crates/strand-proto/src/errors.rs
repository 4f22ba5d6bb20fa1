//! Error types for the wire layer.
//!
//! Every error maps to a stable integer code so that hosts embedding the
//! runtime behind an FFI or RPC boundary can report failures without
//! string matching. Code 0 is reserved for success (represented by `Ok`
//! here), codes 1000 and above are reserved for users.

use thiserror::Error;

/// Convenience alias for wire-layer results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A buffer was too small for the requested operation.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    InsufficientBufferSize {
        /// Bytes the operation required.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// A buffer could not be decoded.
    #[error("could not decode {what}")]
    Decode {
        /// What was being decoded when the failure occurred.
        what: &'static str,
    },

    /// A value could not be encoded into the output buffer.
    #[error("could not encode {what}")]
    Encode {
        /// What was being encoded when the failure occurred.
        what: &'static str,
    },

    /// A channel identifier was malformed for the attempted operation.
    #[error("channel identifier is invalid")]
    InvalidChannelId,

    /// An unknown message type code was encountered.
    #[error("unknown message type code {0}")]
    InvalidMessageType(u64),
}

impl ProtocolError {
    /// Stable integer code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::InsufficientBufferSize { .. } => 2,
            Self::Decode { .. } => 3,
            Self::Encode { .. } => 4,
            Self::InvalidChannelId => 5,
            Self::InvalidMessageType(_) => 8,
        }
    }
}

/// First error code available for user-defined errors.
pub const USER_ERROR_RANGE_START: u32 = 1000;
