//! Actions percolating up the filter pipes.
//!
//! Where events travel down a pipe, actions travel back up as each
//! filter returns: requests to ban a peer or transport address,
//! notifications of protocol milestones, and errors for the API user.
//! Filters may consume actions on the way (the route filter absorbs
//! peer filter requests into its ban lists) or let them bubble to the
//! connection API.

use strand_proto::{ChannelId, PeerId};

use crate::error::Error;

/// One action, with its type-dependent payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<A> {
    /// Request to filter a peer out of further processing.
    FilterPeer {
        /// The peer to filter.
        peer: PeerId,
        /// Whether the filter applies to ingress (sender) or egress
        /// (recipient) traffic.
        ingress: bool,
    },

    /// Request to filter a transport address; handling is left to the
    /// host, which owns the transport.
    FilterTransport {
        /// The address to filter.
        address: A,
        /// Whether the filter applies to ingress or egress traffic.
        ingress: bool,
    },

    /// A channel finished establishment.
    NotifyChannelEstablished {
        /// The established channel.
        channel: ChannelId,
    },

    /// An error to surface to the API user.
    Error {
        /// The error.
        error: Error,
    },
}

/// Actions returned by one filter or state machine invocation.
pub type Actions<A> = Vec<Action<A>>;
