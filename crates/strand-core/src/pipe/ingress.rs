//! The ingress pipe: from raw bytes to state machine events.
//!
//! Stages, in order:
//!
//! 1. [`DeEnvelope`] parses the public header off the raw buffer.
//! 2. [`Route`] drops packets from banned senders or to banned
//!    recipients, and absorbs peer filter requests bubbling up from
//!    later stages into its ban lists.
//! 3. [`Validate`] checks the footer checksum and the protocol
//!    identifier, consulting the failure policies on rejection.
//! 4. [`ChannelAssign`] looks the channel up, buffers the packet on
//!    established channels, and lets early data on pending channels
//!    through without a channel handle.
//! 5. [`MessageParsing`] fans the payload out into one event per
//!    message.
//! 6. [`StateHandling`] dispatches each message to the state machine
//!    registry and routes the resulting outbound events by category.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, warn};

use strand_proto::{ChannelId, Packet, PeerId, PublicHeader};

use crate::action::{Action, Actions};
use crate::channel::Channels;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fsm::Registry;
use crate::pipe::{EventRoutes, Filter};
use crate::policy::{Classifier, PeerPolicy, TransportPolicy};

/// Stage 1: parse the public header out of a raw buffer.
pub struct DeEnvelope<N> {
    next: N,
}

impl<N> DeEnvelope<N> {
    /// Wrap the next filter.
    pub fn new(next: N) -> Self {
        Self { next }
    }
}

impl<A, N: Filter<A>> Filter<A> for DeEnvelope<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::RawBuffer { source, destination, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        let header = {
            let data = slot.data().ok_or(Error::InvalidReference)?;
            match PublicHeader::from_bytes(&data) {
                Ok(header) => *header,
                Err(error) => {
                    debug!(%error, "dropping undersized buffer");
                    return Ok(Vec::new());
                },
            }
        };

        self.next.consume(Event::ParsedHeader { source, destination, header, slot })
    }
}

/// Stage 2: drop packets involving banned peers.
pub struct Route<N> {
    next: N,
    sender_bans: HashSet<PeerId>,
    recipient_bans: HashSet<PeerId>,
}

impl<N> Route<N> {
    /// Wrap the next filter with empty ban lists.
    pub fn new(next: N) -> Self {
        Self { next, sender_bans: HashSet::new(), recipient_bans: HashSet::new() }
    }

    /// Whether `peer` is banned as a sender.
    pub fn sender_banned(&self, peer: &PeerId) -> bool {
        self.sender_bans.contains(peer)
    }

    /// Whether `peer` is banned as a recipient.
    pub fn recipient_banned(&self, peer: &PeerId) -> bool {
        self.recipient_bans.contains(peer)
    }
}

impl<A, N: Filter<A>> Filter<A> for Route<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::ParsedHeader { source, destination, header, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };
        if slot.is_empty() {
            return Err(Error::InvalidReference);
        }

        if self.sender_bans.contains(&header.sender())
            || self.recipient_bans.contains(&header.recipient())
        {
            debug!(sender = %header.sender(), "dropping packet from banned peer");
            return Ok(Vec::new());
        }

        // The next stage works on full packets; parse the rest of the
        // envelope. Malformed packets are dropped, not errored.
        let packet = {
            let data = slot.data().ok_or(Error::InvalidReference)?;
            match Packet::parse(&data) {
                Ok(packet) => packet,
                Err(error) => {
                    debug!(%error, "dropping malformed packet");
                    return Ok(Vec::new());
                },
            }
        };

        let actions = self.next.consume(Event::Packet { source, destination, packet, slot })?;

        // Peer filter requests from later stages land in our ban
        // lists; they keep bubbling up as well so the host can observe
        // them.
        for action in &actions {
            if let Action::FilterPeer { peer, ingress } = action {
                if *ingress {
                    self.sender_bans.insert(*peer);
                } else {
                    self.recipient_bans.insert(*peer);
                }
            }
        }

        Ok(actions)
    }
}

/// Stage 3: checksum and protocol validation.
pub struct Validate<A, N, P, T> {
    next: N,
    classifier: Classifier<A, P, T>,
}

impl<A, N, P, T> Validate<A, N, P, T>
where
    A: Clone,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    /// Wrap the next filter with the given failure policies.
    pub fn new(next: N, peer_policy: Option<Rc<P>>, transport_policy: Option<Rc<T>>) -> Self {
        Self { next, classifier: Classifier::new(peer_policy, transport_policy) }
    }
}

impl<A, N, P, T> Filter<A> for Validate<A, N, P, T>
where
    A: Clone,
    N: Filter<A>,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::Packet { source, destination, packet, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        let checksum_ok = {
            let data = slot.data().ok_or(Error::InvalidReference)?;
            packet.has_valid_checksum(&data)
        };
        if !checksum_ok {
            debug!(channel = %packet.channel(), "dropping packet with bad checksum");
            return Ok(self.classifier.process(&source, &destination, &packet));
        }

        if !packet.has_valid_proto() {
            debug!(proto = packet.proto(), "dropping packet with wrong protocol");
            return Ok(self.classifier.process(&source, &destination, &packet));
        }

        self.next.consume(Event::Packet { source, destination, packet, slot })
    }
}

/// Stage 4: map the packet onto a channel.
pub struct ChannelAssign<A, N, P, T> {
    next: N,
    channels: Rc<RefCell<Channels>>,
    classifier: Classifier<A, P, T>,
}

impl<A, N, P, T> ChannelAssign<A, N, P, T>
where
    A: Clone,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    /// Wrap the next filter over the connection's channel set.
    pub fn new(
        next: N,
        channels: Rc<RefCell<Channels>>,
        peer_policy: Option<Rc<P>>,
        transport_policy: Option<Rc<T>>,
    ) -> Self {
        Self { next, channels, classifier: Classifier::new(peer_policy, transport_policy) }
    }
}

impl<A, N, P, T> Filter<A> for ChannelAssign<A, N, P, T>
where
    A: Clone,
    N: Filter<A>,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::Packet { source, destination, packet, slot } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        let id = packet.channel();

        // Channels are created by the handshake machines; only the
        // default channel is added lazily here.
        if id == ChannelId::DEFAULT {
            if self.channels.borrow_mut().add(id).is_err() {
                return Ok(self.classifier.process(&source, &destination, &packet));
            }
        }

        let channel = {
            let channels = self.channels.borrow();
            match channels.get(id) {
                Some(handle) => Some(handle),
                None if channels.has_pending_channel(id) => {
                    // Early data on a channel we initiated: the
                    // responder clearly accepted it, but until the
                    // handshake completes later stages see no handle.
                    None
                },
                None => {
                    debug!(channel = %id, "dropping packet for unknown channel");
                    drop(channels);
                    return Ok(self.classifier.process(&source, &destination, &packet));
                },
            }
        };

        if let Some(handle) = &channel {
            handle.borrow_mut().ingress_push(packet.clone(), slot.clone());
        }

        self.next.consume(Event::EnqueuedPacket { source, destination, packet, slot, channel })
    }
}

/// Stage 5: fan the payload out into one event per message.
pub struct MessageParsing<N> {
    next: N,
}

impl<N> MessageParsing<N> {
    /// Wrap the next filter.
    pub fn new(next: N) -> Self {
        Self { next }
    }
}

impl<A: Clone, N: Filter<A>> Filter<A> for MessageParsing<N> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let Event::EnqueuedPacket { source, destination, packet, slot, channel } = event else {
            return Err(Error::InvalidPipeEvent);
        };

        // Copy the payload out so no borrow of the slot is held while
        // the state machines run.
        let payload = {
            let data = slot.data().ok_or(Error::InvalidReference)?;
            Bytes::copy_from_slice(packet.payload(&data).map_err(Error::from)?)
        };

        // Zero messages or trailing junk is not an error; whatever
        // parses is dispatched, the rest is ignored. Each message event
        // holds its own slot reference.
        let mut actions = Vec::new();
        let mut iter = strand_proto::MessageIter::new(&payload);
        for message in iter.by_ref() {
            let result = self.next.consume(Event::Message {
                source: source.clone(),
                destination: destination.clone(),
                packet: packet.clone(),
                slot: slot.clone(),
                channel: channel.clone(),
                message,
            })?;
            actions.extend(result);
        }

        Ok(actions)
    }
}

/// Stage 6: dispatch messages to the state machines.
pub struct StateHandling<A> {
    registry: Rc<RefCell<Registry<A>>>,
    routes: Rc<RefCell<EventRoutes<A>>>,
}

impl<A> StateHandling<A> {
    /// Build the terminal stage over the registry and route map.
    pub fn new(registry: Rc<RefCell<Registry<A>>>, routes: Rc<RefCell<EventRoutes<A>>>) -> Self {
        Self { registry, routes }
    }
}

impl<A> Filter<A> for StateHandling<A> {
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        if !matches!(event, Event::Message { .. }) {
            return Err(Error::InvalidPipeEvent);
        }

        let mut actions = Vec::new();
        let mut events = Vec::new();
        let processed = self.registry.borrow_mut().process(&event, &mut actions, &mut events);
        if !processed {
            if let Event::Message { message, .. } = &event {
                warn!(kind = ?message.kind(), "message not processed by any state machine");
            }
        }

        for outbound in events {
            let routed = self.routes.borrow_mut().route(outbound)?;
            actions.extend(routed);
        }

        Ok(actions)
    }
}

/// The default ingress pipe, statically composed.
pub struct DefaultIngress<A, P, T> {
    chain: DeEnvelope<
        Route<Validate<A, ChannelAssign<A, MessageParsing<StateHandling<A>>, P, T>, P, T>>,
    >,
}

impl<A, P, T> DefaultIngress<A, P, T>
where
    A: Clone,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    /// Assemble the pipe over the connection's registry, route map and
    /// channel set. The failure policies are shared by the validation
    /// and channel-assignment stages.
    pub fn new(
        registry: Rc<RefCell<Registry<A>>>,
        routes: Rc<RefCell<EventRoutes<A>>>,
        channels: Rc<RefCell<Channels>>,
        peer_policy: Option<Rc<P>>,
        transport_policy: Option<Rc<T>>,
    ) -> Self {
        let state_handling = StateHandling::new(registry, routes);
        let message_parsing = MessageParsing::new(state_handling);
        let channel_assign = ChannelAssign::new(
            message_parsing,
            channels,
            peer_policy.clone(),
            transport_policy.clone(),
        );
        let validate = Validate::new(channel_assign, peer_policy, transport_policy);
        let route = Route::new(validate);
        let de_envelope = DeEnvelope::new(route);
        Self { chain: de_envelope }
    }

    /// Run `event` through the pipe.
    pub fn consume(&mut self, event: Event<A>) -> Result<Actions<A>> {
        self.chain.consume(event)
    }
}
