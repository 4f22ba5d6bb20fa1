//! Events flowing through the filter pipes and state machines.
//!
//! Events travel *down* a pipe, from filter to filter, changing shape at
//! each stage; state machines consume them at the end and emit new
//! outbound events. Every event belongs to a [`EventCategory`] that the
//! state-handling stage uses to route FSM output to the right consumer:
//! egress events feed the egress pipe, user events surface as
//! notifications, and so on.
//!
//! The generic parameter `A` is the host transport's address type; the
//! runtime never interprets addresses, it only hands them to the
//! pluggable failure policies.

use bytes::Bytes;

use strand_proto::{ChannelId, Message, Packet, PeerId, PublicHeader};

use crate::channel::ChannelHandle;
use crate::pool::Slot;
use crate::timeout::TimeoutKey;

/// Routing category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Packet-borne events travelling down the ingress pipe.
    Ingress,
    /// Events producing or carrying outgoing packets.
    Egress,
    /// Events surfaced to the API user.
    User,
    /// Events injected by the host or the runtime itself.
    System,
    /// Notifications about protocol state changes.
    Notification,
}

/// One event, with its type-dependent payload.
#[derive(Debug, Clone)]
pub enum Event<A> {
    /// Raw bytes arrived from the transport.
    RawBuffer {
        /// Transport source address.
        source: A,
        /// Transport destination address.
        destination: A,
        /// Slot holding the raw bytes.
        slot: Slot,
    },

    /// The public header has been parsed off a raw buffer.
    ParsedHeader {
        /// Transport source address.
        source: A,
        /// Transport destination address.
        destination: A,
        /// The parsed public header.
        header: PublicHeader,
        /// Slot holding the raw bytes.
        slot: Slot,
    },

    /// The full envelope has been parsed (and, once an encryption layer
    /// exists, decrypted).
    Packet {
        /// Transport source address.
        source: A,
        /// Transport destination address.
        destination: A,
        /// The parsed packet envelope.
        packet: Packet,
        /// Slot holding the packet bytes.
        slot: Slot,
    },

    /// The packet has been assigned to a channel.
    EnqueuedPacket {
        /// Transport source address.
        source: A,
        /// Transport destination address.
        destination: A,
        /// The parsed packet envelope.
        packet: Packet,
        /// Slot holding the packet bytes.
        slot: Slot,
        /// The established channel, or `None` while the channel is
        /// still pending.
        channel: Option<ChannelHandle>,
    },

    /// One message extracted from a packet payload.
    Message {
        /// Transport source address.
        source: A,
        /// Transport destination address.
        destination: A,
        /// The enclosing packet's envelope.
        packet: Packet,
        /// Slot holding the packet bytes.
        slot: Slot,
        /// The established channel, or `None` while pending.
        channel: Option<ChannelHandle>,
        /// The parsed message.
        message: Message,
    },

    /// A timeout registered with the connection's timeout collection
    /// expired.
    Timeout {
        /// The expired timeout's key.
        key: TimeoutKey,
    },

    /// The user asked for a new channel to `recipient`.
    NewChannel {
        /// Our own peer identifier.
        sender: PeerId,
        /// The peer to establish the channel with.
        recipient: PeerId,
    },

    /// A state machine produced a message for the wire.
    MessageOut {
        /// Channel the message belongs to.
        channel: ChannelId,
        /// The message to send.
        message: Message,
    },

    /// A message joined a channel's egress queue.
    MessageOutEnqueued {
        /// The channel whose queue grew.
        channel: ChannelId,
    },

    /// A fully bundled packet, ready for checksumming.
    PacketOut {
        /// The packet envelope.
        packet: Packet,
        /// Slot holding the packet bytes.
        slot: Slot,
    },

    /// A finished packet joined a channel's egress buffer.
    PacketOutEnqueued {
        /// The channel whose buffer grew.
        channel: ChannelId,
    },

    /// The user wrote data to a channel.
    UserDataWritten {
        /// The channel written to.
        channel: ChannelId,
        /// The data written.
        data: Bytes,
    },

    /// A channel has queued data that should be bundled and sent.
    UserDataToSend {
        /// The channel with queued data.
        channel: ChannelId,
    },

    /// Received data is ready for the user.
    UserDataToRead {
        /// The channel the data arrived on.
        channel: ChannelId,
        /// The data payload.
        data: Bytes,
    },
}

impl<A> Event<A> {
    /// The routing category of this event.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::RawBuffer { .. }
            | Self::ParsedHeader { .. }
            | Self::Packet { .. }
            | Self::EnqueuedPacket { .. }
            | Self::Message { .. } => EventCategory::Ingress,

            Self::MessageOut { .. }
            | Self::MessageOutEnqueued { .. }
            | Self::PacketOut { .. }
            | Self::PacketOutEnqueued { .. }
            | Self::UserDataToSend { .. } => EventCategory::Egress,

            Self::UserDataWritten { .. } | Self::UserDataToRead { .. } => EventCategory::User,

            Self::Timeout { .. } | Self::NewChannel { .. } => EventCategory::System,
        }
    }
}
