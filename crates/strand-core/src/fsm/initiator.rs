//! Channel initiator state machine.
//!
//! Drives channel negotiation from the requesting side. Per channel the
//! conceptual states are: idle (no pending entry), pending (a
//! `CHANNEL_NEW` is in flight), established, and failed (the pending
//! entry was removed). The states live in the channel set rather than
//! in this type, so the machine itself stays stateless across channels.
//!
//! Besides messages, the machine consumes the user's new-channel
//! request and timeout expirations: a pending channel whose
//! acknowledgement never arrives is cancelled. Retrying with
//! exponential backoff is a designated extension point.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use strand_proto::{
    initiator_cookie, Capabilities, ChannelId, Message, PeerId,
};

use crate::action::{Action, Actions};
use crate::channel::Channels;
use crate::context::SecretGenerator;
use crate::event::Event;
use crate::fsm::Fsm;
use crate::timeout::{TimeoutKey, Timeouts};

/// Timeout scope for pending `CHANNEL_NEW` requests.
pub const CHANNEL_NEW_TIMEOUT_TAG: u16 = 0xC411;

/// Timeout scope for established channel lifetime.
pub const CHANNEL_TIMEOUT_TAG: u16 = 0x114C;

/// Timing configuration for the initiator.
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// How long to wait for a `CHANNEL_ACKNOWLEDGE`.
    pub channel_new_timeout: Duration,
    /// Lifetime granted to an established channel.
    pub channel_timeout: Duration,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            channel_new_timeout: Duration::from_millis(200),
            channel_timeout: Duration::from_secs(60),
        }
    }
}

/// The channel initiator machine.
pub struct ChannelInitiator {
    timeouts: Rc<RefCell<Timeouts>>,
    channels: Rc<RefCell<Channels>>,
    secret_generator: SecretGenerator,
    config: InitiatorConfig,
}

impl ChannelInitiator {
    /// Create an initiator over the connection's channel set and
    /// timeout collection.
    pub fn new(
        timeouts: Rc<RefCell<Timeouts>>,
        channels: Rc<RefCell<Channels>>,
        secret_generator: SecretGenerator,
        config: InitiatorConfig,
    ) -> Self {
        Self { timeouts, channels, secret_generator, config }
    }

    fn initiate<A>(
        &mut self,
        sender: &PeerId,
        recipient: &PeerId,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        // Create the pending entry first; its half goes into the
        // message and keys the retry timeout.
        let half = self.channels.borrow_mut().new_pending_channel();

        let secret = (self.secret_generator)();
        let cookie1 = initiator_cookie(&secret, sender, recipient, half);

        debug!(half, "initiating channel");
        events.push(Event::MessageOut {
            channel: ChannelId::DEFAULT,
            message: Message::ChannelNew { initiator: half, cookie1 },
        });

        self.timeouts.borrow_mut().add(
            TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, half),
            self.config.channel_new_timeout,
        );
        true
    }

    fn handle_acknowledge<A>(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        let Event::Message { packet, message, .. } = event else {
            return false;
        };
        let Message::ChannelAcknowledge { id, cookie1, cookie2 } = message else {
            return false;
        };

        if !self.channels.borrow().has_pending_channel(*id) {
            // Either unknown, or an acknowledgement for a channel that
            // is already established; a well-behaving responder does
            // not produce these.
            debug!(channel = %id, "acknowledge for non-pending channel");
            return false;
        }

        // The packet travels responder -> initiator, so its recipient
        // is us and its sender is the responder.
        let secret = (self.secret_generator)();
        let expected =
            initiator_cookie(&secret, &packet.recipient(), &packet.sender(), id.initiator());
        if expected != *cookie1 {
            // Possibly a secret rotation mid-handshake; either way we
            // cannot tie this acknowledgement to a request of ours.
            warn!(channel = %id, "acknowledge cookie mismatch; cancelling channel");
            self.channels.borrow_mut().remove(*id);
            self.timeouts
                .borrow_mut()
                .remove(TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, id.initiator()));
            return true;
        }

        if self.channels.borrow_mut().make_full(*id).is_err() {
            // Bookkeeping went wrong; drop the channel and give up.
            warn!(channel = %id, "could not promote channel");
            self.channels.borrow_mut().remove(*id);
            return true;
        }

        // From our point of view the channel is now established; swap
        // the establishment timeout for the channel lifetime timeout.
        {
            let mut timeouts = self.timeouts.borrow_mut();
            timeouts.remove(TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, id.initiator()));
            timeouts.add(
                TimeoutKey::new(CHANNEL_TIMEOUT_TAG, id.initiator()),
                self.config.channel_timeout,
            );
        }

        let has_queued_output = self
            .channels
            .borrow()
            .get(*id)
            .is_some_and(|channel| channel.borrow().has_pending_output());

        if has_queued_output {
            // Data was written while the channel was pending; the
            // cookie form of the confirmation lets it ride along.
            events.push(Event::MessageOut {
                channel: ChannelId::DEFAULT,
                message: Message::ChannelCookie {
                    cookie: *cookie2,
                    capabilities: Capabilities::empty(),
                },
            });
            events.push(Event::UserDataToSend { channel: *id });
        } else {
            events.push(Event::MessageOut {
                channel: ChannelId::DEFAULT,
                message: Message::ChannelFinalize {
                    id: *id,
                    cookie2: *cookie2,
                    capabilities: Capabilities::empty(),
                },
            });
        }

        debug!(channel = %id, "channel established");
        actions.push(Action::NotifyChannelEstablished { channel: *id });
        true
    }

    fn handle_timeout(&mut self, key: TimeoutKey) -> bool {
        if key.scope != CHANNEL_NEW_TIMEOUT_TAG && key.scope != CHANNEL_TIMEOUT_TAG {
            return false;
        }

        let half = key.tag;
        let mut channels = self.channels.borrow_mut();
        if channels.has_pending_half(half) || channels.established_id_for(half).is_some() {
            debug!(half, scope = key.scope, "timeout cancels channel");
            channels.remove_half(half);
            return true;
        }
        false
    }
}

impl<A> Fsm<A> for ChannelInitiator {
    fn process(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        match event {
            Event::NewChannel { sender, recipient } => {
                let sender = *sender;
                let recipient = *recipient;
                self.initiate(&sender, &recipient, events)
            },
            Event::Message { .. } => self.handle_acknowledge(event, actions, events),
            Event::Timeout { key } => self.handle_timeout(*key),
            _ => false,
        }
    }
}
