//! End-to-end scenarios: two connection endpoints wired back to back
//! through an in-memory transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use strand_core::api::{Connection, ConnectionCallbacks, WriteChunking};
use strand_core::context::{ConnectionContext, NodeContext};
use strand_core::policy::{NullPeerPolicy, NullTransportPolicy};
use strand_core::Error;
use strand_proto::{ChannelId, Message, MessageIter, Packet, PeerId};

const PACKET_SIZE: usize = 512;

type Addr = u8;
type Endpoint = Connection<Addr, NullPeerPolicy, NullTransportPolicy>;

/// Observable side effects of one endpoint.
#[derive(Default)]
struct Observed {
    to_send: VecDeque<ChannelId>,
    established: Vec<ChannelId>,
    data_available: Vec<(ChannelId, usize)>,
}

struct Peer {
    connection: Endpoint,
    observed: Rc<RefCell<Observed>>,
    id: PeerId,
    address: Addr,
}

impl Peer {
    fn new(id: PeerId, remote: PeerId, address: Addr, secret: Vec<u8>) -> Self {
        let node = Rc::new(NodeContext::new(id, PACKET_SIZE, Rc::new(move || secret.clone())));
        let context = ConnectionContext::new(node, remote, Box::new(|amount| amount));

        let observed = Rc::new(RefCell::new(Observed::default()));
        let established = Rc::clone(&observed);
        let to_send = Rc::clone(&observed);
        let available = Rc::clone(&observed);
        let callbacks = ConnectionCallbacks {
            on_remote_channel_established: Box::new(move |result| {
                if let Ok(channel) = result {
                    established.borrow_mut().established.push(channel);
                }
            }),
            on_packet_to_send: Box::new(move |channel| {
                to_send.borrow_mut().to_send.push_back(channel);
            }),
            on_data_available: Box::new(move |channel, size| {
                available.borrow_mut().data_available.push((channel, size));
            }),
        };

        let connection =
            Connection::new(context, callbacks, WriteChunking::Reject, None, None);
        Self { connection, observed, id, address }
    }
}

/// Shuttle queued packets between the two peers until neither has
/// anything left to send. Returns the raw packets that were delivered.
fn pump(a: &mut Peer, b: &mut Peer) -> Vec<Vec<u8>> {
    let mut delivered = Vec::new();
    loop {
        let mut progressed = false;
        progressed |= drain(a, b, &mut delivered);
        progressed |= drain(b, a, &mut delivered);
        if !progressed {
            return delivered;
        }
    }
}

/// Move every packet `from` has queued over to `to`. Returns whether
/// anything moved.
fn drain(from: &mut Peer, to: &mut Peer, delivered: &mut Vec<Vec<u8>>) -> bool {
    let mut moved = false;
    loop {
        let Some(channel) = from.observed.borrow_mut().to_send.pop_front() else {
            break;
        };
        while let Some(entry) = from.connection.packet_to_send(channel) {
            let bytes = {
                let data = entry.slot.data().unwrap();
                data[..usize::from(entry.packet.packet_size())].to_vec()
            };
            delivered.push(bytes.clone());

            let slot = to.connection.allocate();
            slot.fill(&bytes).unwrap();
            to.connection
                .received_packet(from.address, to.address, slot)
                .unwrap();
            moved = true;
        }
    }
    moved
}

fn peers() -> (Peer, Peer) {
    let id_a = PeerId::random();
    let id_b = PeerId::random();
    let a = Peer::new(id_a, id_b, 1, b"shared secret".to_vec());
    let b = Peer::new(id_b, id_a, 2, b"shared secret".to_vec());
    (a, b)
}

/// Run the full channel establishment handshake and return the
/// negotiated channel id.
fn establish(a: &mut Peer, b: &mut Peer) -> ChannelId {
    let initiated: Rc<RefCell<Vec<ChannelId>>> = Rc::default();
    let sink = Rc::clone(&initiated);
    a.connection
        .establish_channel(
            b.id,
            Box::new(move |result| {
                sink.borrow_mut().push(result.unwrap());
            }),
        )
        .unwrap();

    pump(a, b);

    let established = initiated.borrow();
    assert_eq!(established.len(), 1, "initiator callback fired once");
    established[0]
}

#[test]
fn handshake_completes_in_two_round_trips() {
    let (mut a, mut b) = peers();

    let initiated: Rc<RefCell<Vec<ChannelId>>> = Rc::default();
    let sink = Rc::clone(&initiated);
    a.connection
        .establish_channel(
            b.id,
            Box::new(move |result| {
                sink.borrow_mut().push(result.unwrap());
            }),
        )
        .unwrap();

    let delivered = pump(&mut a, &mut b);

    // Three messages cross the wire: NEW, ACKNOWLEDGE, FINALIZE.
    let kinds: Vec<_> = delivered
        .iter()
        .flat_map(|bytes| {
            let packet = Packet::parse(bytes).unwrap();
            let payload = packet.payload(bytes).unwrap().to_vec();
            MessageIter::new(&payload).map(|message| message.kind()).collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            strand_proto::MessageKind::ChannelNew,
            strand_proto::MessageKind::ChannelAcknowledge,
            strand_proto::MessageKind::ChannelFinalize,
        ]
    );

    // Both sides report the same established channel.
    let initiator_seen = initiated.borrow();
    assert_eq!(initiator_seen.len(), 1);
    let id = initiator_seen[0];
    assert!(id.is_complete());
    assert_eq!(b.observed.borrow().established, vec![id]);

    let a_channels = a.connection.context().channels();
    let b_channels = b.connection.context().channels();
    assert!(a_channels.borrow().has_established_channel(id));
    assert!(b_channels.borrow().has_established_channel(id));
}

#[test]
fn data_flows_both_ways_after_the_handshake() {
    let (mut a, mut b) = peers();
    let id = establish(&mut a, &mut b);

    // A -> B
    let written = a.connection.channel_write(id, b"Test #1").unwrap();
    assert_eq!(written, 7);
    pump(&mut a, &mut b);

    assert_eq!(b.observed.borrow().data_available, vec![(id, 7)]);
    let mut buf = [0u8; 64];
    let read = b.connection.channel_read(id, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"Test #1");

    // B -> A
    b.connection.channel_write(id, b"Test #2").unwrap();
    pump(&mut a, &mut b);

    assert_eq!(a.observed.borrow().data_available, vec![(id, 7)]);
    let read = a.connection.channel_read(id, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"Test #2");
}

#[test]
fn write_rejects_default_and_incomplete_channels() {
    let (mut a, _b) = peers();
    assert_eq!(
        a.connection.channel_write(ChannelId::DEFAULT, b"x"),
        Err(Error::InvalidChannelId)
    );
    assert_eq!(
        a.connection.channel_write(ChannelId::from_initiator(0xBEEF), b"x"),
        Err(Error::InvalidChannelId)
    );
}

#[test]
fn oversized_writes_are_rejected_by_default() {
    let (mut a, mut b) = peers();
    let id = establish(&mut a, &mut b);

    let big = vec![0x42u8; PACKET_SIZE * 2];
    assert_eq!(a.connection.channel_write(id, &big), Err(Error::Write));
}

#[test]
fn split_chunking_carries_large_writes() {
    let id_a = PeerId::random();
    let id_b = PeerId::random();
    let mut a = Peer::new(id_a, id_b, 1, b"shared secret".to_vec());
    let mut b = Peer::new(id_b, id_a, 2, b"shared secret".to_vec());

    // Rebuild A with split chunking.
    let node = Rc::new(NodeContext::new(
        id_a,
        PACKET_SIZE,
        Rc::new(|| b"shared secret".to_vec()),
    ));
    let context = ConnectionContext::new(node, id_b, Box::new(|amount| amount));
    let observed = Rc::clone(&a.observed);
    let to_send = Rc::clone(&a.observed);
    let available = Rc::clone(&a.observed);
    a.connection = Connection::new(
        context,
        ConnectionCallbacks {
            on_remote_channel_established: Box::new({
                let observed = Rc::clone(&observed);
                move |result| {
                    if let Ok(channel) = result {
                        observed.borrow_mut().established.push(channel);
                    }
                }
            }),
            on_packet_to_send: Box::new(move |channel| {
                to_send.borrow_mut().to_send.push_back(channel);
            }),
            on_data_available: Box::new(move |channel, size| {
                available.borrow_mut().data_available.push((channel, size));
            }),
        },
        WriteChunking::Split,
        None,
        None,
    );

    let id = establish(&mut a, &mut b);

    let big: Vec<u8> = (0..PACKET_SIZE * 2).map(|i| (i % 251) as u8).collect();
    let written = a.connection.channel_write(id, &big).unwrap();
    assert_eq!(written, big.len());
    pump(&mut a, &mut b);

    let total: usize =
        b.observed.borrow().data_available.iter().map(|(_, size)| size).sum();
    assert_eq!(total, big.len());

    let mut buf = vec![0u8; big.len() + PACKET_SIZE];
    let mut read = 0;
    loop {
        let n = b.connection.channel_read(id, &mut buf[read..]).unwrap();
        if n == 0 {
            break;
        }
        read += n;
    }
    assert_eq!(&buf[..read], &big[..]);
}

#[test]
fn cookie_mismatch_aborts_the_handshake() {
    let id_a = PeerId::random();
    let id_b = PeerId::random();

    // A's secret generator returns a fresh value on every call, so the
    // cookie in its CHANNEL_NEW can never validate against the echo in
    // the acknowledgement.
    let counter = Rc::new(Cell::new(0u8));
    let node = Rc::new(NodeContext::new(
        id_a,
        PACKET_SIZE,
        Rc::new(move || {
            counter.set(counter.get() + 1);
            vec![counter.get(); 16]
        }),
    ));
    let context = ConnectionContext::new(node, id_b, Box::new(|amount| amount));
    let observed: Rc<RefCell<Observed>> = Rc::default();
    let established = Rc::clone(&observed);
    let to_send = Rc::clone(&observed);
    let available = Rc::clone(&observed);
    let mut a = Peer {
        connection: Connection::new(
            context,
            ConnectionCallbacks {
                on_remote_channel_established: Box::new(move |result| {
                    if let Ok(channel) = result {
                        established.borrow_mut().established.push(channel);
                    }
                }),
                on_packet_to_send: Box::new(move |channel| {
                    to_send.borrow_mut().to_send.push_back(channel);
                }),
                on_data_available: Box::new(move |channel, size| {
                    available.borrow_mut().data_available.push((channel, size));
                }),
            },
            WriteChunking::Reject,
            None,
            None,
        ),
        observed,
        id: id_a,
        address: 1,
    };
    let mut b = Peer::new(id_b, id_a, 2, b"responder secret".to_vec());

    let fired: Rc<Cell<bool>> = Rc::default();
    let fired_probe = Rc::clone(&fired);
    a.connection
        .establish_channel(b.id, Box::new(move |_| fired_probe.set(true)))
        .unwrap();

    let delivered = pump(&mut a, &mut b);

    // The acknowledge arrived but no finalize followed.
    let kinds: Vec<_> = delivered
        .iter()
        .flat_map(|bytes| {
            let packet = Packet::parse(bytes).unwrap();
            let payload = packet.payload(bytes).unwrap().to_vec();
            MessageIter::new(&payload).map(|message| message.kind()).collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            strand_proto::MessageKind::ChannelNew,
            strand_proto::MessageKind::ChannelAcknowledge,
        ]
    );

    // The pending channel is gone on A, nothing was established
    // anywhere, and no establishment callback fired.
    let half = extract_new_channel_half(&delivered[0]);
    let a_channels = a.connection.context().channels();
    assert!(!a_channels.borrow().has_pending_half(half));
    assert!(!fired.get());
    assert!(b.observed.borrow().established.is_empty());
}

#[test]
fn timeout_cancels_a_pending_channel() {
    let (mut a, b) = peers();

    a.connection
        .establish_channel(b.id, Box::new(|_| {}))
        .unwrap();

    // Capture the half from the CHANNEL_NEW packet without delivering
    // it anywhere.
    let channel = a.observed.borrow_mut().to_send.pop_front().unwrap();
    let entry = a.connection.packet_to_send(channel).unwrap();
    let bytes = {
        let data = entry.slot.data().unwrap();
        data[..usize::from(entry.packet.packet_size())].to_vec()
    };
    let half = extract_new_channel_half(&bytes);

    let a_channels = a.connection.context().channels();
    assert!(a_channels.borrow().has_pending_half(half));

    // The establishment timeout defaults to 200ms; sleeping past it
    // expires the pending entry.
    a.connection.process_timeouts(Duration::from_millis(250)).unwrap();

    assert!(!a_channels.borrow().has_pending_half(half));
    assert!(!a_channels.borrow().has_channel(ChannelId::from_initiator(half)));
}

/// Pull the initiator half out of a raw CHANNEL_NEW packet.
fn extract_new_channel_half(bytes: &[u8]) -> u16 {
    let packet = Packet::parse(bytes).unwrap();
    let payload = packet.payload(bytes).unwrap().to_vec();
    for message in MessageIter::new(&payload) {
        if let Message::ChannelNew { initiator, .. } = message {
            return initiator;
        }
    }
    panic!("no CHANNEL_NEW in packet");
}
