//! The connection API.
//!
//! One [`Connection`] embeds the Strand runtime into an existing
//! connection management system. The host delivers raw packets through
//! [`Connection::received_packet`], drains outgoing packets after the
//! packet-to-send notification, and drives timeouts through
//! [`Connection::process_timeouts`]. No call blocks on I/O; the only
//! suspension point is the host's own sleep primitive inside timeout
//! processing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use strand_proto::{ChannelId, Message, Packet, PeerId};

use crate::action::{Action, Actions};
use crate::buffer::BufferEntry;
use crate::channel::Channels;
use crate::context::ConnectionContext;
use crate::error::{Error, Result};
use crate::event::{Event, EventCategory};
use crate::fsm::{standard_registry, Registry};
use crate::pipe::{DefaultEgress, DefaultIngress, EventRoutes};
use crate::policy::{NullPeerPolicy, NullTransportPolicy, PeerPolicy, TransportPolicy};
use crate::pool::Slot;

/// How [`Connection::channel_write`] treats data larger than one
/// packet's payload budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteChunking {
    /// Reject oversized writes with [`Error::Write`].
    #[default]
    Reject,
    /// Split oversized writes across multiple DATA messages.
    Split,
}

/// Callback reporting the outcome of channel establishment.
pub type EstablishmentCallback = Box<dyn FnMut(Result<ChannelId>)>;

/// Callback notifying that a channel has a packet ready to send.
pub type PacketToSendCallback = Box<dyn FnMut(ChannelId)>;

/// Callback notifying that data is available for reading.
pub type DataAvailableCallback = Box<dyn FnMut(ChannelId, usize)>;

/// The host-supplied callback bundle.
pub struct ConnectionCallbacks {
    /// Fired when a remote peer establishes a channel with us.
    pub on_remote_channel_established: EstablishmentCallback,
    /// Fired when a finished packet lands in a channel's egress buffer.
    pub on_packet_to_send: PacketToSendCallback,
    /// Fired when received data is available on a channel.
    pub on_data_available: DataAvailableCallback,
}

struct Shared {
    callbacks: ConnectionCallbacks,
    /// Establishment callbacks for channels we initiated, keyed by the
    /// pending initiator half.
    pending_establishments: HashMap<u16, EstablishmentCallback>,
}

/// Protocol endpoint for one connection to one peer.
///
/// `A` is the host transport's address type; the optional policy
/// parameters plug failure handling into the ingress pipe.
pub struct Connection<A, P = NullPeerPolicy, T = NullTransportPolicy> {
    context: ConnectionContext,
    registry: Rc<RefCell<Registry<A>>>,
    routes: Rc<RefCell<EventRoutes<A>>>,
    ingress: DefaultIngress<A, P, T>,
    egress: Rc<RefCell<DefaultEgress<A>>>,
    shared: Rc<RefCell<Shared>>,
    chunking: WriteChunking,
}

impl<A, P, T> Connection<A, P, T>
where
    A: Clone + 'static,
    P: PeerPolicy + 'static,
    T: TransportPolicy<A> + 'static,
{
    /// Build a connection endpoint over `context`.
    pub fn new(
        context: ConnectionContext,
        callbacks: ConnectionCallbacks,
        chunking: WriteChunking,
        peer_policy: Option<Rc<P>>,
        transport_policy: Option<Rc<T>>,
    ) -> Self {
        let registry = standard_registry(&context);
        let routes = Rc::new(RefCell::new(EventRoutes::new()));
        let shared =
            Rc::new(RefCell::new(Shared { callbacks, pending_establishments: HashMap::new() }));

        let own_id = context.node().id();
        let peer_id = context.peer();
        let egress_shared = Rc::clone(&shared);
        let egress = Rc::new(RefCell::new(DefaultEgress::new(
            Rc::clone(&registry),
            context.channels(),
            context.node().pool().clone(),
            Box::new(move || own_id),
            Box::new(move || peer_id),
            Box::new(move |event| {
                if let Event::PacketOutEnqueued { channel } = event {
                    debug!(channel = %channel, "packet ready to send");
                    (egress_shared.borrow_mut().callbacks.on_packet_to_send)(channel);
                }
                Ok(Vec::new())
            }),
        )));

        {
            let mut route_map = routes.borrow_mut();

            let egress_handle = Rc::clone(&egress);
            route_map.set(
                EventCategory::Egress,
                Box::new(move |event| egress_handle.borrow_mut().consume(event)),
            );

            let user_shared = Rc::clone(&shared);
            route_map.set(
                EventCategory::User,
                Box::new(move |event| {
                    if let Event::UserDataToRead { channel, data } = event {
                        (user_shared.borrow_mut().callbacks.on_data_available)(
                            channel,
                            data.len(),
                        );
                    }
                    Ok(Vec::new())
                }),
            );
        }

        let ingress = DefaultIngress::new(
            Rc::clone(&registry),
            Rc::clone(&routes),
            context.channels(),
            peer_policy,
            transport_policy,
        );

        Self { context, registry, routes, ingress, egress, shared, chunking }
    }

    /// The connection context.
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Initiate a channel to `peer`.
    ///
    /// Success means the establishment message was produced and queued;
    /// the overall outcome arrives through `on_established` once the
    /// handshake completes (or not at all if it times out - the timeout
    /// cancels the pending channel silently).
    ///
    /// # Errors
    ///
    /// `State` if the state machines did not produce the expected
    /// outgoing message.
    pub fn establish_channel(
        &mut self,
        peer: PeerId,
        on_established: EstablishmentCallback,
    ) -> Result<()> {
        // Establishment runs over the default channel; make sure it
        // exists.
        self.channels().borrow_mut().add(ChannelId::DEFAULT)?;

        let event = Event::NewChannel { sender: self.context.node().id(), recipient: peer };
        let mut actions = Vec::new();
        let mut events = Vec::new();
        let processed = self.registry.borrow_mut().process(&event, &mut actions, &mut events);
        if !processed || events.is_empty() {
            return Err(Error::State);
        }

        // The initiator must lead with the CHANNEL_NEW message; its
        // half keys the establishment callback.
        match events.first() {
            Some(Event::MessageOut {
                message: Message::ChannelNew { initiator, .. }, ..
            }) => {
                self.shared
                    .borrow_mut()
                    .pending_establishments
                    .insert(*initiator, on_established);
            },
            _ => return Err(Error::State),
        }

        let mut followup = Vec::new();
        for outbound in events {
            followup.extend(self.egress.borrow_mut().consume(outbound)?);
        }
        followup.extend(actions);
        self.handle_actions(followup)
    }

    /// Write application data to an established or pending channel.
    ///
    /// Returns the number of bytes accepted. With
    /// [`WriteChunking::Reject`] (the default), data larger than one
    /// packet's payload budget is rejected with [`Error::Write`]; with
    /// [`WriteChunking::Split`] it is spread across multiple DATA
    /// messages.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` for the default channel, incomplete
    /// identifiers, or unknown channels; `Write` for oversized writes
    /// under the reject policy.
    pub fn channel_write(&mut self, id: ChannelId, data: &[u8]) -> Result<usize> {
        if id == ChannelId::DEFAULT || !id.is_complete() {
            return Err(Error::InvalidChannelId);
        }

        let budget = self.write_budget();
        if data.len() > budget && self.chunking == WriteChunking::Reject {
            return Err(Error::Write);
        }

        let chunks: Vec<Bytes> = if data.is_empty() {
            vec![Bytes::new()]
        } else {
            data.chunks(budget.max(1)).map(Bytes::copy_from_slice).collect()
        };

        for chunk in chunks {
            let actions = self
                .egress
                .borrow_mut()
                .consume(Event::UserDataWritten { channel: id, data: chunk })?;
            self.handle_actions(actions)?;
        }
        Ok(data.len())
    }

    /// Read received application data from a channel into `buf`.
    ///
    /// Drains the channel's ingress buffer packet by packet, copying
    /// DATA payloads until the buffer is exhausted or the next packet's
    /// data no longer fits.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` for channels that are not established;
    /// `InsufficientBufferSize` if `buf` cannot hold even the first
    /// pending packet's data.
    pub fn channel_read(&mut self, id: ChannelId, buf: &mut [u8]) -> Result<usize> {
        let Some(handle) = self.channels().borrow().get(id) else {
            return Err(Error::InvalidChannelId);
        };

        let mut read = 0;
        loop {
            // Measure the next packet's data before committing to it.
            let pending = {
                let channel = handle.borrow();
                let Some(entry) = channel.ingress_peek() else {
                    break;
                };
                data_payload_size(entry)?
            };

            let Some(pending) = pending else {
                // No data messages in this packet (handshake traffic on
                // the default channel, say); consume and move on.
                handle.borrow_mut().ingress_pop();
                continue;
            };

            if read + pending > buf.len() {
                if read == 0 {
                    return Err(Error::InsufficientBufferSize {
                        needed: pending,
                        available: buf.len(),
                    });
                }
                break;
            }

            let Some(entry) = handle.borrow_mut().ingress_pop() else {
                break;
            };
            read += copy_data_payloads(&entry, &mut buf[read..])?;
        }

        Ok(read)
    }

    /// Deliver a received packet to the ingress pipe.
    ///
    /// The slot should have been obtained from [`Connection::allocate`]
    /// and filled with the raw bytes. Channel establishment
    /// notifications fire from inside this call.
    pub fn received_packet(&mut self, source: A, destination: A, slot: Slot) -> Result<()> {
        debug!(len = slot.len(), "received packet");
        let actions =
            self.ingress.consume(Event::RawBuffer { source, destination, slot })?;
        self.handle_actions(actions)
    }

    /// Dequeue the next finished packet for `channel`, if any.
    pub fn packet_to_send(&mut self, channel: ChannelId) -> Option<BufferEntry> {
        let handle = self.channels().borrow().get(channel)?;
        let entry = handle.borrow_mut().egress_packet_pop();
        entry
    }

    /// Allocate a packet slot from the node's pool.
    pub fn allocate(&self) -> Slot {
        self.context.node().pool().allocate()
    }

    /// Drive the timeout collection: sleep for at most `amount` via the
    /// host's sleep primitive and feed expired timeouts to the state
    /// machines.
    pub fn process_timeouts(&mut self, amount: Duration) -> Result<()> {
        let expired = self.context.timeouts().borrow_mut().wait(amount);

        let mut all_actions = Vec::new();
        for key in expired {
            let event = Event::Timeout { key };
            let mut actions = Vec::new();
            let mut events = Vec::new();
            self.registry.borrow_mut().process(&event, &mut actions, &mut events);
            for outbound in events {
                actions.extend(self.routes.borrow_mut().route(outbound)?);
            }
            all_actions.extend(actions);
        }
        self.handle_actions(all_actions)
    }

    fn channels(&self) -> Rc<RefCell<Channels>> {
        self.context.channels()
    }

    /// Largest write accepted into a single DATA message.
    fn write_budget(&self) -> usize {
        let max_payload = Packet::max_payload_size(self.context.node().packet_size());
        let mut budget = max_payload.saturating_sub(Message::data_overhead(max_payload));
        while budget > 0 && budget + Message::data_overhead(budget) > max_payload {
            budget -= 1;
        }
        budget
    }

    fn handle_actions(&mut self, actions: Actions<A>) -> Result<()> {
        let mut first_error = None;
        for action in actions {
            match action {
                Action::NotifyChannelEstablished { channel } => {
                    let pending = self
                        .shared
                        .borrow_mut()
                        .pending_establishments
                        .remove(&channel.initiator());
                    if let Some(mut callback) = pending {
                        callback(Ok(channel));
                    } else {
                        (self
                            .shared
                            .borrow_mut()
                            .callbacks
                            .on_remote_channel_established)(Ok(channel));
                    }
                },
                Action::Error { error } => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                },
                Action::FilterPeer { peer, ingress } => {
                    // Already absorbed into the route filter's ban
                    // lists on the way up.
                    debug!(%peer, ingress, "peer filter request");
                },
                Action::FilterTransport { ingress, .. } => {
                    // Transport banning belongs to the host, which owns
                    // the transport.
                    warn!(ingress, "transport filter requested");
                },
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Total DATA payload bytes in a buffered packet, or `None` if the
/// packet carries no data message.
fn data_payload_size(entry: &BufferEntry) -> Result<Option<usize>> {
    let data = entry.slot.data().ok_or(Error::InvalidReference)?;
    let payload = entry.packet.payload(&data).map_err(Error::from)?;
    let mut total = None;
    for message in strand_proto::MessageIter::new(payload) {
        if let Message::Data { payload } = message {
            *total.get_or_insert(0) += payload.len();
        }
    }
    Ok(total)
}

/// Copy every DATA payload in a buffered packet into `out`.
fn copy_data_payloads(entry: &BufferEntry, out: &mut [u8]) -> Result<usize> {
    let data = entry.slot.data().ok_or(Error::InvalidReference)?;
    let payload = entry.packet.payload(&data).map_err(Error::from)?;
    let mut copied = 0;
    for message in strand_proto::MessageIter::new(payload) {
        if let Message::Data { payload } = message {
            out[copied..copied + payload.len()].copy_from_slice(&payload);
            copied += payload.len();
        }
    }
    Ok(copied)
}
