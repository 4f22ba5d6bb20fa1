//! Literal wire vectors exercising the packet and message codecs.
//!
//! The byte strings here are fixed test vectors; the checksums embedded
//! in them are part of the vector and must not be recomputed.

use bytes::Bytes;
use strand_proto::{
    Capabilities, ChannelId, Cookie, Message, MessageIter, Packet, PublicHeader,
};

/// An empty packet on the default channel, followed by four bytes of
/// trailing garbage as a stream transport might deliver.
const PACKET_DEFAULT_CHANNEL_TRAILING: [u8; 56] = [
    // public header: proto
    0xDE, 0xAD, 0xD0, 0x0D,
    // sender
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x11, 0xC3,
    // recipient
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0B, 0x0B,
    // channel identifier (default channel)
    0xF0, 0xF0, 0xF0, 0xF0,
    // flags
    0xA0, 0x0A,
    // packet size, envelope included
    0x00, 0x34,
    // private header: sequence number
    0x01, 0xFA,
    // payload size
    0x00, 0x00,
    // footer: checksum
    0x32, 0xBF, 0xF5, 0x02,
    // trailing bytes, not part of the packet
    0xDE, 0xAD, 0xBE, 0xEF,
];

/// Three messages back to back, followed by four bytes of junk.
const MESSAGE_BLOCK: [u8; 26] = [
    // DATA, total size 8, six payload bytes
    0x14, 0x08, 0xBE, 0xEF, 0xB4, 0xBE, 0x00, 0x00,
    // CHANNEL_NEW: half 0xBEEF, cookie 0xBEEFB4BE
    0x0A, 0xBE, 0xEF, 0xBE, 0xEF, 0xB4, 0xBE,
    // CHANNEL_COOKIE: cookie 0xBEEFB4BE, no capabilities
    0x0D, 0xBE, 0xEF, 0xB4, 0xBE, 0x00, 0x00,
    // junk
    0xBE, 0xEF, 0xB4, 0xBE,
];

#[test]
fn trailing_bytes_are_not_part_of_the_packet() {
    let packet = Packet::parse(&PACKET_DEFAULT_CHANNEL_TRAILING).unwrap();

    assert_eq!(packet.packet_size(), 0x34);
    assert_eq!(packet.channel(), ChannelId::DEFAULT);
    assert_eq!(packet.sequence_no(), 0x01FA);
    assert_eq!(packet.payload_size(), 0);
    assert_eq!(packet.checksum(), 0x32BF_F502);

    // The checksum covers exactly the packet, so the trailing garbage
    // does not disturb validation.
    assert!(packet.has_valid_checksum(&PACKET_DEFAULT_CHANNEL_TRAILING));
}

#[test]
fn truncated_packet_still_parses() {
    // Same vector without the trailing garbage.
    let exact = &PACKET_DEFAULT_CHANNEL_TRAILING[..0x34];
    let packet = Packet::parse(exact).unwrap();
    assert!(packet.has_valid_checksum(exact));
}

#[test]
fn header_parse_sees_the_vector_fields() {
    let header = PublicHeader::from_bytes(&PACKET_DEFAULT_CHANNEL_TRAILING).unwrap();
    assert_eq!(header.proto(), 0xDEAD_D00D);
    assert_eq!(header.packet_size(), 0x34);
    assert_eq!(header.channel(), ChannelId::DEFAULT);
    assert_eq!(header.sender().as_bytes()[13..], [0x0A, 0x11, 0xC3]);
    assert_eq!(header.recipient().as_bytes()[14..], [0x0B, 0x0B]);
}

#[test]
fn message_block_yields_three_messages_and_junk() {
    let mut iter = MessageIter::new(&MESSAGE_BLOCK);

    assert_eq!(
        iter.next(),
        Some(Message::Data {
            payload: Bytes::from_static(&[0xBE, 0xEF, 0xB4, 0xBE, 0x00, 0x00])
        })
    );
    assert_eq!(
        iter.next(),
        Some(Message::ChannelNew {
            initiator: 0xBEEF,
            cookie1: Cookie::from_wire(0xBEEF_B4BE),
        })
    );
    assert_eq!(
        iter.next(),
        Some(Message::ChannelCookie {
            cookie: Cookie::from_wire(0xBEEF_B4BE),
            capabilities: Capabilities::empty(),
        })
    );
    assert_eq!(iter.next(), None);
    assert_eq!(iter.remaining(), 4);
}

#[test]
fn empty_block_yields_nothing() {
    let mut iter = MessageIter::new(&[]);
    assert_eq!(iter.next(), None);
    assert_eq!(iter.remaining(), 0);
}

#[test]
fn pure_junk_block_yields_nothing() {
    let junk = [0xBE, 0xEF, 0xB4, 0xBE];
    let mut iter = MessageIter::new(&junk);
    assert_eq!(iter.next(), None);
    assert_eq!(iter.remaining(), 4);
}

#[test]
fn reserialized_block_matches_the_vector() {
    let messages = [
        Message::Data {
            payload: Bytes::from_static(&[0xBE, 0xEF, 0xB4, 0xBE, 0x00, 0x00]),
        },
        Message::ChannelNew { initiator: 0xBEEF, cookie1: Cookie::from_wire(0xBEEF_B4BE) },
        Message::ChannelCookie {
            cookie: Cookie::from_wire(0xBEEF_B4BE),
            capabilities: Capabilities::empty(),
        },
    ];

    let mut out = Vec::new();
    for message in &messages {
        let mut buf = vec![0u8; message.wire_size()];
        let written = message.serialize(&mut buf).unwrap();
        out.extend_from_slice(&buf[..written]);
    }
    assert_eq!(out, MESSAGE_BLOCK[..MESSAGE_BLOCK.len() - 4]);
}
