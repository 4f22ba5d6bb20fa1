//! Error types for the protocol runtime.
//!
//! Runtime errors are kept separate from wire errors
//! ([`strand_proto::ProtocolError`]) so that each layer's failure modes
//! stay visible, with a lossless conversion between them. Every error
//! carries the stable integer code of the original taxonomy.

use thiserror::Error;

use strand_proto::ProtocolError;

/// Convenience alias for runtime results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the protocol runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A logic error; an impossible state was reached.
    #[error("unexpected state: {0}")]
    Unexpected(&'static str),

    /// A buffer was too small for the requested operation.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    InsufficientBufferSize {
        /// Bytes the operation required.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// A wire-layer failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A channel identifier was malformed or in the wrong state.
    #[error("channel identifier is invalid")]
    InvalidChannelId,

    /// A pool slot was empty or belongs to a different pool.
    #[error("reference does not resolve to a valid object")]
    InvalidReference,

    /// A filter received an event type it does not consume.
    #[error("filter cannot handle this event type")]
    InvalidPipeEvent,

    /// A channel write was rejected.
    #[error("channel write rejected")]
    Write,

    /// A state machine or pipe could not make progress.
    #[error("state machine could not progress")]
    State,
}

impl Error {
    /// Stable integer code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::Unexpected(_) => 1,
            Self::InsufficientBufferSize { .. } => 2,
            Self::Protocol(inner) => inner.code(),
            Self::InvalidChannelId => 5,
            Self::InvalidReference => 6,
            Self::InvalidPipeEvent => 7,
            Self::Write => 9,
            Self::State => 10,
        }
    }
}
