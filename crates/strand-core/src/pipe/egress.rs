//! The egress pipe: from outbound messages to finished packets.
//!
//! Stages, in order:
//!
//! 1. [`EgressState`] dispatches user writes and new-channel requests
//!    to the state machines and forwards the resulting egress events.
//! 2. [`EnqueueMessage`] places outbound messages on the target
//!    channel's egress queue (draining queued user data into DATA
//!    messages on the way).
//! 3. [`MessageBundling`] packs queued messages greedily into
//!    fixed-size packets from the pool.
//! 4. [`AddChecksum`] computes the footer checksum.
//! 5. [`OutBuffer`] deposits the finished packet in the channel's
//!    egress buffer.
//! 6. [`Callback`] hands the terminal event to the host-provided sink.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use strand_proto::{Message, Packet, PeerId, ProtocolError};

use crate::action::{Action, Actions};
use crate::channel::Channels;
use crate::error::{Error, Result};
use crate::event::{Event, EventCategory};
use crate::fsm::Registry;
use crate::pipe::{Filter, RouteFn};
use crate::pool::PacketPool;

/// Supplies a peer identifier at bundling time.
pub type PeerIdFn = Box<dyn Fn() -> PeerId>;

/// Stage 1: state machine dispatch for outbound traffic.
///
/// Accepts ready egress events ([`Event::MessageOut`],
/// [`Event::UserDataToSend`]) and passes them through; dispatches
/// [`Event::UserDataWritten`] and [`Event::NewChannel`] to the
/// registry first and forwards whatever egress events the machines
/// emit. The machines produce no user-facing events on this path, so
/// anything else coming out of them is a wiring error and is dropped
/// with a log line.
pub struct EgressState<A, N> {
    registry: Rc<RefCell<Registry<A>>>,
    next: N,
}

impl<A, N> EgressState<A, N> {
    /// Build the entry stage over the connection's registry.
    pub fn new(registry: Rc<RefCell<Registry<A>>>, next: N) -> Self {
        Self { registry, next }
    }
}

impl<A, N: Filter<A>> Filter<A> for EgressState<A, N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        match &event {
            Event::MessageOut { .. } | Event::UserDataToSend { .. } => {
                return self.next.consume(event);
            },
            Event::UserDataWritten { .. } | Event::NewChannel { .. } => {},
            _ => return Err(Error::InvalidPipeEvent),
        }

        let mut actions = Vec::new();
        let mut events = Vec::new();
        self.registry.borrow_mut().process(&event, &mut actions, &mut events);

        for outbound in events {
            if outbound.category() == EventCategory::Egress {
                actions.extend(self.next.consume(outbound)?);
            } else {
                warn!(category = ?outbound.category(), "dropping non-egress event on egress pipe");
            }
        }
        Ok(actions)
    }
}

/// Stage 2: place messages on the channel's egress queue.
pub struct EnqueueMessage<N> {
    next: N,
    channels: Rc<RefCell<Channels>>,
}

impl<N> EnqueueMessage<N> {
    /// Wrap the next filter over the connection's channel set.
    pub fn new(next: N, channels: Rc<RefCell<Channels>>) -> Self {
        Self { next, channels }
    }
}

impl<A, N: Filter<A>> Filter<A> for EnqueueMessage<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        match event {
            Event::MessageOut { channel, message } => {
                {
                    let channels = self.channels.borrow();
                    let Some(handle) = channels.get(channel) else {
                        warn!(channel = %channel, "no channel for outbound message");
                        return Ok(Vec::new());
                    };
                    handle.borrow_mut().enqueue_egress_message(message);
                }
                self.next.consume(Event::MessageOutEnqueued { channel })
            },

            Event::UserDataToSend { channel } => {
                let drained = {
                    let channels = self.channels.borrow();
                    let Some(handle) = channels.get(channel) else {
                        warn!(channel = %channel, "no channel for queued data");
                        return Ok(Vec::new());
                    };
                    let mut data = handle.borrow_mut();
                    let chunks = data.take_output();
                    for chunk in &chunks {
                        data.enqueue_egress_message(Message::Data { payload: chunk.clone() });
                    }
                    !chunks.is_empty() || data.has_egress_messages()
                };
                if !drained {
                    return Ok(Vec::new());
                }
                self.next.consume(Event::MessageOutEnqueued { channel })
            },

            _ => Err(Error::InvalidPipeEvent),
        }
    }
}

/// Stage 3: pack queued messages into packets.
///
/// Every packet is allocated at the pool's fixed size and filled
/// greedily: messages are dequeued while the next one fits in the
/// remaining payload budget. The loop continues until the channel's
/// queue is empty, so a single enqueue notification may produce several
/// packets.
pub struct MessageBundling<N> {
    next: N,
    channels: Rc<RefCell<Channels>>,
    pool: PacketPool,
    own_peerid: PeerIdFn,
    peer_peerid: PeerIdFn,
}

impl<N> MessageBundling<N> {
    /// Wrap the next filter over the channel set and packet pool.
    ///
    /// The sender and recipient of each bundled packet come from the
    /// host-supplied callbacks.
    pub fn new(
        next: N,
        channels: Rc<RefCell<Channels>>,
        pool: PacketPool,
        own_peerid: PeerIdFn,
        peer_peerid: PeerIdFn,
    ) -> Self {
        Self { next, channels, pool, own_peerid, peer_peerid }
    }
}

impl<A, N: Filter<A>> Filter<A> for MessageBundling<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::MessageOutEnqueued { channel } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        let Some(handle) = self.channels.borrow().get(channel) else {
            warn!(channel = %channel, "no channel to bundle messages for");
            return Ok(Vec::new());
        };

        let budget = Packet::max_payload_size(self.pool.packet_size());
        let mut actions = Vec::new();
        loop {
            {
                let mut data = handle.borrow_mut();
                if !data.has_egress_messages() {
                    break;
                }

                // A message that can never fit would stall the queue
                // forever; drop it and surface the failure.
                if data.next_egress_message_size() > budget {
                    data.dequeue_egress_message();
                    warn!(channel = %channel, "dropping oversized outbound message");
                    actions.push(Action::Error {
                        error: Error::Protocol(ProtocolError::Encode { what: "message" }),
                    });
                    continue;
                }
            }

            let slot = self.pool.allocate();

            // Build the packet envelope and fill the payload while the
            // channel borrow is held; the borrow ends before the event
            // moves on down the chain.
            let packet = {
                let mut data = handle.borrow_mut();
                let sequence_no = data.next_sequence_no();
                let mut packet = Packet::outgoing(
                    slot.len(),
                    &(self.own_peerid)(),
                    &(self.peer_peerid)(),
                    channel,
                    sequence_no,
                )?;

                let mut buf = slot.data_mut().ok_or(Error::InvalidReference)?;
                let mut offset = Packet::payload_offset();
                let mut remaining = budget;
                loop {
                    let next_size = data.next_egress_message_size();
                    if next_size == 0 || next_size > remaining {
                        break;
                    }
                    let Some(message) = data.dequeue_egress_message() else {
                        break;
                    };
                    let written = message.serialize(&mut buf[offset..])?;
                    offset += written;
                    remaining -= written;
                }

                packet.set_payload_size((budget - remaining) as u16);
                packet.write_headers(&mut buf)?;
                packet.write_padding(&mut buf)?;
                packet
            };

            debug!(channel = %channel, payload = packet.payload_size(), "bundled packet");
            actions.extend(self.next.consume(Event::PacketOut { packet, slot })?);
        }

        Ok(actions)
    }
}

/// Stage 4: compute and store the footer checksum.
///
/// Separate from bundling because checksumming may become part of an
/// encryption stage later.
pub struct AddChecksum<N> {
    next: N,
}

impl<N> AddChecksum<N> {
    /// Wrap the next filter.
    pub fn new(next: N) -> Self {
        Self { next }
    }
}

impl<A, N: Filter<A>> Filter<A> for AddChecksum<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::PacketOut { mut packet, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        {
            let mut data = slot.data_mut().ok_or(Error::InvalidReference)?;
            packet.write_checksum(&mut data)?;
        }

        self.next.consume(Event::PacketOut { packet, slot })
    }
}

/// Stage 5: deposit the finished packet in the channel's egress buffer.
pub struct OutBuffer<N> {
    next: N,
    channels: Rc<RefCell<Channels>>,
}

impl<N> OutBuffer<N> {
    /// Wrap the next filter over the connection's channel set.
    pub fn new(next: N, channels: Rc<RefCell<Channels>>) -> Self {
        Self { next, channels }
    }
}

impl<A, N: Filter<A>> Filter<A> for OutBuffer<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::PacketOut { packet, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        let channel = packet.channel();
        {
            let channels = self.channels.borrow();
            let Some(handle) = channels.get(channel) else {
                warn!(channel = %channel, "no channel for finished packet");
                return Ok(Vec::new());
            };
            handle.borrow_mut().egress_packet_push(packet, slot);
        }

        // The next stage only learns that the buffer grew; the buffer
        // itself decides output order when the host drains it.
        self.next.consume(Event::PacketOutEnqueued { channel })
    }
}

/// Stage 6: hand the terminal event to the host.
pub struct Callback<A> {
    callback: RouteFn<A>,
}

impl<A> Callback<A> {
    /// Wrap the host-provided sink.
    pub fn new(callback: RouteFn<A>) -> Self {
        Self { callback }
    }
}

impl<A> Filter<A> for Callback<A> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        (self.callback)(event)
    }
}

/// The default egress pipe, statically composed.
pub struct DefaultEgress<A> {
    chain: EgressState<
        A,
        EnqueueMessage<MessageBundling<AddChecksum<OutBuffer<Callback<A>>>>>,
    >,
}

impl<A> DefaultEgress<A> {
    /// Assemble the pipe.
    ///
    /// `callback` receives the terminal [`Event::PacketOutEnqueued`]
    /// events; the connection API uses it to fire the packet-to-send
    /// notification.
    pub fn new(
        registry: Rc<RefCell<Registry<A>>>,
        channels: Rc<RefCell<Channels>>,
        pool: PacketPool,
        own_peerid: PeerIdFn,
        peer_peerid: PeerIdFn,
        callback: RouteFn<A>,
    ) -> Self {
        let callback = Callback::new(callback);
        let out_buffer = OutBuffer::new(callback, Rc::clone(&channels));
        let add_checksum = AddChecksum::new(out_buffer);
        let bundling =
            MessageBundling::new(add_checksum, Rc::clone(&channels), pool, own_peerid, peer_peerid);
        let enqueue = EnqueueMessage::new(bundling, channels);
        let state = EgressState::new(registry, enqueue);
        Self { chain: state }
    }

    /// Run `event` through the pipe.
    pub fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        self.chain.consume(event)
    }
}
