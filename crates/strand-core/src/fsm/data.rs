//! Data transport state machine.
//!
//! Barely a state machine: it translates incoming DATA messages into
//! read notifications for the user, and user writes into queued output
//! plus a prompt for the egress pipe. It fits the machine contract, so
//! it lives here with the others.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use strand_proto::Message;

use crate::action::{Action, Actions};
use crate::channel::Channels;
use crate::error::Error;
use crate::event::Event;
use crate::fsm::Fsm;

/// The data transport machine.
pub struct DataFsm {
    channels: Rc<RefCell<Channels>>,
}

impl DataFsm {
    /// Create a data machine over the connection's channel set.
    pub fn new(channels: Rc<RefCell<Channels>>) -> Self {
        Self { channels }
    }
}

impl<A> Fsm<A> for DataFsm {
    fn process(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        match event {
            Event::Message { packet, message, .. } => {
                let Message::Data { payload } = message else {
                    return false;
                };

                let id = packet.channel();
                if !self.channels.borrow().has_established_channel(id) {
                    // Data on a pending or unknown channel is dropped;
                    // the channel-assignment filter already decided it
                    // may pass this far.
                    debug!(channel = %id, "dropping data for non-established channel");
                    return true;
                }

                events.push(Event::UserDataToRead { channel: id, data: payload.clone() });
                true
            },

            Event::UserDataWritten { channel, data } => {
                let id = *channel;
                let channels = self.channels.borrow();
                if !channels.has_channel(id) {
                    drop(channels);
                    actions.push(Action::Error { error: Error::InvalidChannelId });
                    return true;
                }

                if let Some(handle) = channels.get(id) {
                    // Established: queue and prompt the egress pipe.
                    handle.borrow_mut().queue_output(data.clone());
                    drop(channels);
                    events.push(Event::UserDataToSend { channel: id });
                } else {
                    // Pending: the data stays queued until the
                    // handshake completes.
                    drop(channels);
                    let queued = self
                        .channels
                        .borrow_mut()
                        .queue_pending_data(id.initiator(), data.clone());
                    if queued.is_err() {
                        actions.push(Action::Error { error: Error::InvalidChannelId });
                    }
                }
                true
            },

            _ => false,
        }
    }
}
