//! Channel responder state machine.
//!
//! The responder keeps no per-handshake state: all admission is cookie
//! based. When a `CHANNEL_NEW` arrives it answers with a cookie derived
//! from the current secret; when a `CHANNEL_FINALIZE` arrives it
//! recomputes that cookie and admits the channel only on a match. A
//! malicious initiator therefore cannot make the responder allocate
//! anything before proving it saw the acknowledgement.
//!
//! Two pieces of shared state still influence behavior: an already
//! established channel with the same identifier turns a repeated
//! handshake into an idempotent refresh, and a locally pending channel
//! with the same initiator half means both sides picked the same half
//! (wires crossed) - the pending entry is dropped so the local
//! initiator can retry with a fresh half.
//!
//! The secret may rotate between acknowledge and finalize; the check
//! then fails and the message is dropped silently. The initiator's
//! timeout handles the retry, so no recovery protocol is needed here.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use strand_proto::{
    responder_cookie, Capabilities, ChannelId, Message, Packet,
};

use crate::action::{Action, Actions};
use crate::channel::Channels;
use crate::context::SecretGenerator;
use crate::event::Event;
use crate::fsm::Fsm;

/// The channel responder machine.
pub struct ChannelResponder {
    channels: Rc<RefCell<Channels>>,
    secret_generator: SecretGenerator,
}

impl ChannelResponder {
    /// Create a responder over the connection's channel set.
    pub fn new(channels: Rc<RefCell<Channels>>, secret_generator: SecretGenerator) -> Self {
        Self { channels, secret_generator }
    }

    fn handle_new<A>(
        &mut self,
        initiator_half: u16,
        cookie1: strand_proto::Cookie,
        packet: &Packet,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        if self.channels.borrow().has_pending_half(initiator_half) {
            // We sent a CHANNEL_NEW with this half ourselves; both
            // sides initiating with the same half cannot proceed. Drop
            // our pending entry so our initiator retries afresh.
            warn!(half = initiator_half, "crossed channel initiation; dropping pending entry");
            self.channels.borrow_mut().drop_pending(initiator_half);
            return false;
        }

        // Reuse the established identifier if this is a refresh;
        // otherwise complete the partial with a fresh responder half.
        let full_id = match self.channels.borrow().established_id_for(initiator_half) {
            Some(id) => id,
            None => {
                let mut id = ChannelId::from_initiator(initiator_half);
                if id.complete().is_err() {
                    warn!(half = initiator_half, "could not complete channel identifier");
                    return false;
                }
                id
            },
        };

        // We are answering the initiator, so the packet sender is the
        // initiator and the recipient is us.
        let secret = (self.secret_generator)();
        let cookie2 = responder_cookie(&secret, &packet.sender(), &packet.recipient(), full_id);

        let has_queued_output = self
            .channels
            .borrow()
            .get(full_id)
            .is_some_and(|channel| channel.borrow().has_pending_output());

        if has_queued_output {
            debug!(channel = %full_id, "answering refresh with cookie");
            events.push(Event::MessageOut {
                channel: ChannelId::DEFAULT,
                message: Message::ChannelCookie {
                    cookie: cookie2,
                    capabilities: Capabilities::empty(),
                },
            });
        } else {
            debug!(channel = %full_id, "acknowledging channel");
            events.push(Event::MessageOut {
                channel: ChannelId::DEFAULT,
                message: Message::ChannelAcknowledge { id: full_id, cookie1, cookie2 },
            });
        }
        true
    }

    fn handle_finalize<A>(
        &mut self,
        id: ChannelId,
        cookie2: strand_proto::Cookie,
        packet: &Packet,
        actions: &mut Actions<A>,
    ) -> bool {
        if self.channels.borrow().has_pending_half(id.initiator()) {
            // Same crossed-wires situation as in handle_new.
            warn!(channel = %id, "finalize for locally pending half; dropping pending entry");
            self.channels.borrow_mut().drop_pending(id.initiator());
            return false;
        }

        if self.channels.borrow().has_established_channel(id) {
            // Idempotent refresh. Capability bits that differ from the
            // established ones are discarded.
            debug!(channel = %id, "finalize for established channel ignored");
            return true;
        }

        // The finalize travels initiator -> responder, so the packet
        // sender is the initiator.
        let secret = (self.secret_generator)();
        let expected = responder_cookie(&secret, &packet.sender(), &packet.recipient(), id);
        if expected != cookie2 {
            // Either forged or a secret rotation straddled the
            // handshake; the initiator will retry.
            warn!(channel = %id, "finalize cookie mismatch");
            return false;
        }

        if let Err(error) = self.channels.borrow_mut().add(id) {
            warn!(channel = %id, %error, "could not add channel");
            return false;
        }

        debug!(channel = %id, "channel established");
        actions.push(Action::NotifyChannelEstablished { channel: id });
        true
    }
}

impl<A> Fsm<A> for ChannelResponder {
    fn process(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        let Event::Message { packet, message, .. } = event else {
            return false;
        };

        match message {
            Message::ChannelNew { initiator, cookie1 } => {
                self.handle_new(*initiator, *cookie1, packet, events)
            },
            Message::ChannelFinalize { id, cookie2, .. } => {
                self.handle_finalize(*id, *cookie2, packet, actions)
            },
            Message::ChannelCookie { .. } => {
                // Reserved: accepted and ignored until the cookie
                // refresh path is specified.
                debug!("channel cookie accepted and ignored");
                true
            },
            _ => false,
        }
    }
}
