//! State machine behavior, exercised directly against the machine
//! contract without the pipes in between.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use strand_core::channel::Channels;
use strand_core::context::SecretGenerator;
use strand_core::fsm::{
    ChannelInitiator, ChannelResponder, DataFsm, Fsm, InitiatorConfig, CHANNEL_NEW_TIMEOUT_TAG,
    CHANNEL_TIMEOUT_TAG,
};
use strand_core::pool::{PacketPool, Slot};
use strand_core::timeout::{TimeoutKey, Timeouts};
use strand_core::{Action, Error, Event};
use strand_proto::{
    initiator_cookie, responder_cookie, Capabilities, ChannelId, Cookie, Message, Packet, PeerId,
};

const PACKET_SIZE: usize = 512;

type Addr = u8;

struct Fixture {
    channels: Rc<RefCell<Channels>>,
    timeouts: Rc<RefCell<Timeouts>>,
    secret: SecretGenerator,
    pool: PacketPool,
    local: PeerId,
    remote: PeerId,
}

impl Fixture {
    fn new() -> Self {
        Self {
            channels: Rc::new(RefCell::new(Channels::new(PACKET_SIZE))),
            timeouts: Rc::new(RefCell::new(Timeouts::new(Box::new(|amount| amount)))),
            secret: Rc::new(|| b"fixture secret".to_vec()),
            pool: PacketPool::new(PACKET_SIZE, 8),
            local: PeerId::random(),
            remote: PeerId::random(),
        }
    }

    fn secret(&self) -> Vec<u8> {
        (self.secret)()
    }

    fn initiator(&self) -> ChannelInitiator {
        ChannelInitiator::new(
            Rc::clone(&self.timeouts),
            Rc::clone(&self.channels),
            Rc::clone(&self.secret),
            InitiatorConfig::default(),
        )
    }

    fn responder(&self) -> ChannelResponder {
        ChannelResponder::new(Rc::clone(&self.channels), Rc::clone(&self.secret))
    }

    fn data_fsm(&self) -> DataFsm {
        DataFsm::new(Rc::clone(&self.channels))
    }

    /// A message event as the ingress pipe would deliver it: the packet
    /// arrives from `remote`, addressed to `local`.
    fn message_event(&self, channel: ChannelId, message: Message) -> Event<Addr> {
        let slot = self.pool.allocate();
        let packet =
            Packet::outgoing(slot.len(), &self.remote, &self.local, channel, 1).unwrap();
        Event::Message {
            source: 1,
            destination: 2,
            packet,
            slot,
            channel: None,
            message,
        }
    }
}

fn run(fsm: &mut dyn Fsm<Addr>, event: &Event<Addr>) -> (bool, Vec<Action<Addr>>, Vec<Event<Addr>>) {
    let mut actions = Vec::new();
    let mut events = Vec::new();
    let handled = fsm.process(event, &mut actions, &mut events);
    (handled, actions, events)
}

mod initiator {
    use super::*;

    #[test]
    fn new_channel_event_starts_negotiation() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();

        let event =
            Event::NewChannel { sender: fixture.local, recipient: fixture.remote };
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(actions.is_empty());
        assert_eq!(events.len(), 1);

        let Event::MessageOut { channel, message: Message::ChannelNew { initiator, cookie1 } } =
            &events[0]
        else {
            panic!("expected CHANNEL_NEW on the default channel, got {events:?}");
        };
        assert_eq!(*channel, ChannelId::DEFAULT);

        // The pending channel and its retry timeout both exist.
        assert!(fixture.channels.borrow().has_pending_half(*initiator));
        assert!(fixture
            .timeouts
            .borrow()
            .contains(TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, *initiator)));

        // The cookie covers (secret, us, them, half).
        let expected =
            initiator_cookie(&fixture.secret(), &fixture.local, &fixture.remote, *initiator);
        assert_eq!(*cookie1, expected);
    }

    #[test]
    fn valid_acknowledge_establishes_and_finalizes() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();

        let event = Event::NewChannel { sender: fixture.local, recipient: fixture.remote };
        let (_, _, events) = run(&mut fsm, &event);
        let Event::MessageOut { message: Message::ChannelNew { initiator, cookie1 }, .. } =
            &events[0]
        else {
            panic!("expected CHANNEL_NEW");
        };

        let id = ChannelId::new(*initiator, 0xD00D);
        let cookie2 =
            responder_cookie(&fixture.secret(), &fixture.local, &fixture.remote, id);
        let ack = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelAcknowledge { id, cookie1: *cookie1, cookie2 },
        );
        let (handled, actions, events) = run(&mut fsm, &ack);

        assert!(handled);
        assert!(fixture.channels.borrow().has_established_channel(id));
        assert!(!fixture.channels.borrow().has_pending_half(id.initiator()));

        // Establishment timeout swapped for the lifetime timeout.
        let timeouts = fixture.timeouts.borrow();
        assert!(!timeouts.contains(TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, id.initiator())));
        assert!(timeouts.contains(TimeoutKey::new(CHANNEL_TIMEOUT_TAG, id.initiator())));
        drop(timeouts);

        // No queued data, so the response is a finalize echoing
        // cookie2.
        assert_eq!(events.len(), 1);
        let Event::MessageOut {
            channel,
            message: Message::ChannelFinalize { id: fin_id, cookie2: fin_cookie, .. },
        } = &events[0]
        else {
            panic!("expected CHANNEL_FINALIZE, got {events:?}");
        };
        assert_eq!(*channel, ChannelId::DEFAULT);
        assert_eq!(fin_id, &id);
        assert_eq!(fin_cookie, &cookie2);

        // Our own side learns about the establishment through an
        // action.
        assert!(actions
            .iter()
            .any(|action| *action == Action::NotifyChannelEstablished { channel: id }));
    }

    #[test]
    fn acknowledge_with_wrong_cookie_cancels_the_channel() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();

        let event = Event::NewChannel { sender: fixture.local, recipient: fixture.remote };
        let (_, _, events) = run(&mut fsm, &event);
        let Event::MessageOut { message: Message::ChannelNew { initiator, .. }, .. } = &events[0]
        else {
            panic!("expected CHANNEL_NEW");
        };

        let id = ChannelId::new(*initiator, 0xD00D);
        let ack = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelAcknowledge {
                id,
                cookie1: Cookie::from_wire(0xBAD_C0DE),
                cookie2: Cookie::from_wire(1),
            },
        );
        let (handled, actions, events) = run(&mut fsm, &ack);

        assert!(handled);
        assert!(events.is_empty());
        assert!(actions.is_empty());
        assert!(!fixture.channels.borrow().has_channel(id));
    }

    #[test]
    fn acknowledge_for_unknown_channel_is_not_handled() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();

        let ack = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelAcknowledge {
                id: ChannelId::new(0x1234, 0x5678),
                cookie1: Cookie::from_wire(1),
                cookie2: Cookie::from_wire(2),
            },
        );
        let (handled, actions, events) = run(&mut fsm, &ack);
        assert!(!handled);
        assert!(actions.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn timeout_removes_the_pending_channel() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();

        let event = Event::NewChannel { sender: fixture.local, recipient: fixture.remote };
        let (_, _, events) = run(&mut fsm, &event);
        let Event::MessageOut { message: Message::ChannelNew { initiator, .. }, .. } = &events[0]
        else {
            panic!("expected CHANNEL_NEW");
        };
        let half = *initiator;

        let timeout =
            Event::Timeout { key: TimeoutKey::new(CHANNEL_NEW_TIMEOUT_TAG, half) };
        let (handled, _, _) = run(&mut fsm, &timeout);
        assert!(handled);
        assert!(!fixture.channels.borrow().has_pending_half(half));
        assert!(!fixture.channels.borrow().has_channel(ChannelId::from_initiator(half)));
    }

    #[test]
    fn foreign_timeout_scopes_are_ignored() {
        let fixture = Fixture::new();
        let mut fsm = fixture.initiator();
        let timeout = Event::Timeout { key: TimeoutKey::new(0x9999, 42) };
        let (handled, _, _) = run(&mut fsm, &timeout);
        assert!(!handled);
    }
}

mod responder {
    use super::*;

    #[test]
    fn channel_new_is_acknowledged_statelessly() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        let cookie1 = Cookie::from_wire(0xBEEF_B4BE);
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelNew { initiator: 0xBEEF, cookie1 },
        );
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(actions.is_empty());
        assert_eq!(events.len(), 1);

        let Event::MessageOut {
            channel,
            message: Message::ChannelAcknowledge { id, cookie1: echoed, cookie2 },
        } = &events[0]
        else {
            panic!("expected CHANNEL_ACKNOWLEDGE, got {events:?}");
        };
        assert_eq!(*channel, ChannelId::DEFAULT);
        assert_eq!(id.initiator(), 0xBEEF);
        assert!(id.is_complete());
        assert_eq!(*echoed, cookie1);

        // The message travelled remote -> local, so the cookie binds
        // (initiator=remote, responder=local).
        let expected =
            responder_cookie(&fixture.secret(), &fixture.remote, &fixture.local, *id);
        assert_eq!(*cookie2, expected);

        // Stateless: no channel state was created.
        assert!(!fixture.channels.borrow().has_channel(*id));
    }

    #[test]
    fn crossed_initiation_drops_the_local_pending_entry() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        fixture.channels.borrow_mut().add(ChannelId::from_initiator(0xBEEF)).unwrap();
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelNew { initiator: 0xBEEF, cookie1: Cookie::from_wire(1) },
        );
        let (handled, _, events) = run(&mut fsm, &event);

        assert!(!handled);
        assert!(events.is_empty());
        assert!(!fixture.channels.borrow().has_pending_half(0xBEEF));
    }

    #[test]
    fn repeated_channel_new_reuses_the_established_id() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        fixture.channels.borrow_mut().add(id).unwrap();

        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelNew { initiator: 0xBEEF, cookie1: Cookie::from_wire(1) },
        );
        let (handled, _, events) = run(&mut fsm, &event);

        assert!(handled);
        let Event::MessageOut { message: Message::ChannelAcknowledge { id: acked, .. }, .. } =
            &events[0]
        else {
            panic!("expected CHANNEL_ACKNOWLEDGE");
        };
        assert_eq!(acked, &id);
    }

    #[test]
    fn valid_finalize_establishes_the_channel() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        let cookie2 =
            responder_cookie(&fixture.secret(), &fixture.remote, &fixture.local, id);
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelFinalize { id, cookie2, capabilities: Capabilities::empty() },
        );
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(events.is_empty());
        assert!(fixture.channels.borrow().has_established_channel(id));
        assert_eq!(actions, vec![Action::NotifyChannelEstablished { channel: id }]);
    }

    #[test]
    fn finalize_with_wrong_cookie_is_dropped() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelFinalize {
                id,
                cookie2: Cookie::from_wire(0xBAD_C0DE),
                capabilities: Capabilities::empty(),
            },
        );
        let (handled, actions, _) = run(&mut fsm, &event);

        assert!(!handled);
        assert!(actions.is_empty());
        assert!(!fixture.channels.borrow().has_channel(id));
    }

    #[test]
    fn finalize_for_established_channel_is_idempotent() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        fixture.channels.borrow_mut().add(id).unwrap();

        // Different capability bits are discarded, not applied.
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelFinalize {
                id,
                cookie2: Cookie::from_wire(0),
                capabilities: Capabilities::RESEND,
            },
        );
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(actions.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn channel_cookie_is_accepted_and_ignored() {
        let fixture = Fixture::new();
        let mut fsm = fixture.responder();
        let event = fixture.message_event(
            ChannelId::DEFAULT,
            Message::ChannelCookie {
                cookie: Cookie::from_wire(1),
                capabilities: Capabilities::empty(),
            },
        );
        let (handled, actions, events) = run(&mut fsm, &event);
        assert!(handled);
        assert!(actions.is_empty());
        assert!(events.is_empty());
    }
}

mod data {
    use super::*;

    #[test]
    fn inbound_data_on_established_channel_reaches_the_user() {
        let fixture = Fixture::new();
        let mut fsm = fixture.data_fsm();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        fixture.channels.borrow_mut().add(id).unwrap();

        let event = fixture.message_event(
            id,
            Message::Data { payload: Bytes::from_static(b"Test #1") },
        );
        let (handled, _, events) = run(&mut fsm, &event);

        assert!(handled);
        assert_eq!(events.len(), 1);
        let Event::UserDataToRead { channel, data } = &events[0] else {
            panic!("expected UserDataToRead, got {events:?}");
        };
        assert_eq!(channel, &id);
        assert_eq!(data.as_ref(), b"Test #1");
    }

    #[test]
    fn inbound_data_on_unknown_channel_is_dropped() {
        let fixture = Fixture::new();
        let mut fsm = fixture.data_fsm();

        let event = fixture.message_event(
            ChannelId::new(0x1234, 0x5678),
            Message::Data { payload: Bytes::from_static(b"ignored") },
        );
        let (handled, actions, events) = run(&mut fsm, &event);
        assert!(handled);
        assert!(actions.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn write_to_unknown_channel_errors() {
        let fixture = Fixture::new();
        let mut fsm = fixture.data_fsm();

        let event = Event::UserDataWritten {
            channel: ChannelId::new(0x1234, 0x5678),
            data: Bytes::from_static(b"nope"),
        };
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(events.is_empty());
        assert_eq!(actions, vec![Action::Error { error: Error::InvalidChannelId }]);
    }

    #[test]
    fn write_to_established_channel_queues_and_prompts() {
        let fixture = Fixture::new();
        let mut fsm = fixture.data_fsm();

        let id = ChannelId::new(0xBEEF, 0xD00D);
        fixture.channels.borrow_mut().add(id).unwrap();

        let event =
            Event::UserDataWritten { channel: id, data: Bytes::from_static(b"payload") };
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(actions.is_empty());
        assert!(matches!(events[0], Event::UserDataToSend { channel } if channel == id));

        let handle = fixture.channels.borrow().get(id).unwrap();
        assert!(handle.borrow().has_pending_output());
    }

    #[test]
    fn write_to_pending_channel_stays_queued() {
        let fixture = Fixture::new();
        let mut fsm = fixture.data_fsm();

        let half = fixture.channels.borrow_mut().new_pending_channel();
        let id = ChannelId::new(half, 0xD00D);

        let event =
            Event::UserDataWritten { channel: id, data: Bytes::from_static(b"early") };
        let (handled, actions, events) = run(&mut fsm, &event);

        assert!(handled);
        assert!(actions.is_empty());
        // No prompt: nothing can be sent until the handshake is done.
        assert!(events.is_empty());

        // The data surfaces once the channel is promoted.
        fixture.channels.borrow_mut().make_full(id).unwrap();
        let handle = fixture.channels.borrow().get(id).unwrap();
        assert!(handle.borrow().has_pending_output());
    }
}

#[test]
fn message_events_hold_a_slot_reference() {
    let fixture = Fixture::new();
    let event = fixture.message_event(ChannelId::DEFAULT, Message::Data { payload: Bytes::new() });
    let Event::Message { slot, .. } = &event else {
        panic!("expected message event");
    };
    let _: &Slot = slot;
    assert_eq!(fixture.pool.size(), 1);
    drop(event);
    assert_eq!(fixture.pool.size(), 0);
}
