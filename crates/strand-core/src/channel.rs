//! Channel state: per-channel data and the channel set.
//!
//! A channel is in one of three states: absent, pending (only the
//! initiator half of its identifier is known), or established (the full
//! identifier is negotiated and a [`ChannelData`] instance exists).
//! The [`Channels`] set owns this state for one connection and enforces
//! that identifiers are never duplicated across states.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use rand::Rng;

use strand_proto::{ChannelId, Message, Packet};

use crate::buffer::{BufferEntry, PacketBuffer};
use crate::error::{Error, Result};
use crate::pool::Slot;

/// Shared handle onto one channel's data.
pub type ChannelHandle = Rc<RefCell<ChannelData>>;

/// Buffers and counters for one established channel.
#[derive(Debug)]
pub struct ChannelData {
    id: ChannelId,
    packet_size: usize,
    ingress: PacketBuffer,
    egress_messages: std::collections::VecDeque<Message>,
    egress_packets: PacketBuffer,
    /// User data written before it is packed into messages, keyed by a
    /// monotonic output index.
    pending_output: std::collections::BTreeMap<u64, Bytes>,
    next_output: u64,
    next_sequence: u16,
}

impl ChannelData {
    fn new(id: ChannelId, packet_size: usize) -> Self {
        Self {
            id,
            packet_size,
            ingress: PacketBuffer::new(),
            egress_messages: std::collections::VecDeque::new(),
            egress_packets: PacketBuffer::new(),
            pending_output: std::collections::BTreeMap::new(),
            next_output: 0,
            // Sequence numbers start at a random point per channel.
            next_sequence: rand::thread_rng().r#gen(),
        }
    }

    /// This channel's identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The fixed packet size packets on this channel use.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Queue a received packet; O(1).
    pub fn ingress_push(&mut self, packet: Packet, slot: Slot) {
        self.ingress.push(packet, slot);
    }

    /// Dequeue the oldest received packet.
    pub fn ingress_pop(&mut self) -> Option<BufferEntry> {
        self.ingress.pop()
    }

    /// Look at the oldest received packet without dequeuing it.
    pub fn ingress_peek(&self) -> Option<&BufferEntry> {
        self.ingress.peek()
    }

    /// Number of buffered received packets.
    pub fn ingress_len(&self) -> usize {
        self.ingress.len()
    }

    /// Queue a message for bundling into an outgoing packet.
    pub fn enqueue_egress_message(&mut self, message: Message) {
        self.egress_messages.push_back(message);
    }

    /// Wire size of the next queued message, or zero if none is queued.
    pub fn next_egress_message_size(&self) -> usize {
        self.egress_messages.front().map_or(0, Message::wire_size)
    }

    /// Dequeue the next message for bundling.
    pub fn dequeue_egress_message(&mut self) -> Option<Message> {
        self.egress_messages.pop_front()
    }

    /// Whether messages are waiting to be bundled.
    pub fn has_egress_messages(&self) -> bool {
        !self.egress_messages.is_empty()
    }

    /// Queue a finished outgoing packet for the host to drain.
    pub fn egress_packet_push(&mut self, packet: Packet, slot: Slot) {
        self.egress_packets.push(packet, slot);
    }

    /// Dequeue the next finished outgoing packet.
    pub fn egress_packet_pop(&mut self) -> Option<BufferEntry> {
        self.egress_packets.pop()
    }

    /// Queue user data for output, returning its output index.
    pub fn queue_output(&mut self, data: Bytes) -> u64 {
        let index = self.next_output;
        self.next_output += 1;
        self.pending_output.insert(index, data);
        index
    }

    /// Take all queued user data in output order.
    pub fn take_output(&mut self) -> Vec<Bytes> {
        let drained = std::mem::take(&mut self.pending_output);
        drained.into_values().collect()
    }

    /// Whether user data or unbundled messages are waiting to go out.
    pub fn has_pending_output(&self) -> bool {
        !self.pending_output.is_empty() || !self.egress_messages.is_empty()
    }

    /// Next sequence number for this channel; wraps explicitly.
    pub fn next_sequence_no(&mut self) -> u16 {
        let sequence_no = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence_no
    }
}

/// The set of channels for one connection.
///
/// Tracks pending initiator halves (with any user data written early)
/// and established channels. The default channel is treated like any
/// established channel once added, which happens implicitly when
/// handshake traffic arrives.
#[derive(Debug)]
pub struct Channels {
    packet_size: usize,
    pending: HashMap<u16, Vec<Bytes>>,
    established: HashMap<ChannelId, ChannelHandle>,
}

impl Channels {
    /// Create an empty set whose channels use `packet_size`-byte
    /// packets.
    pub fn new(packet_size: usize) -> Self {
        Self { packet_size, pending: HashMap::new(), established: HashMap::new() }
    }

    /// Whether `id` is known, pending or established.
    pub fn has_channel(&self, id: ChannelId) -> bool {
        self.has_established_channel(id) || self.has_pending_channel(id)
    }

    /// Whether `id` refers to an established channel.
    pub fn has_established_channel(&self, id: ChannelId) -> bool {
        self.established.contains_key(&id)
    }

    /// Whether `id`'s initiator half is pending establishment.
    pub fn has_pending_channel(&self, id: ChannelId) -> bool {
        self.pending.contains_key(&id.initiator())
    }

    /// Whether `half` is pending establishment.
    pub fn has_pending_half(&self, half: u16) -> bool {
        self.pending.contains_key(&half)
    }

    /// Add a channel.
    ///
    /// Complete identifiers (and the default identifier) become
    /// established channels, idempotently. Partial identifiers join the
    /// pending set.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` for identifiers with only a responder half or
    /// with neither half (other than the default).
    pub fn add(&mut self, id: ChannelId) -> Result<()> {
        if id == ChannelId::DEFAULT || id.is_complete() {
            self.established
                .entry(id)
                .or_insert_with(|| Rc::new(RefCell::new(ChannelData::new(id, self.packet_size))));
            return Ok(());
        }

        if id.has_initiator() {
            self.pending.entry(id.initiator()).or_default();
            return Ok(());
        }

        Err(Error::InvalidChannelId)
    }

    /// Promote `id` from pending to established.
    ///
    /// Removes the matching pending entry if one exists and creates the
    /// channel data; user data queued on the pending entry carries over.
    /// Idempotent for already established identifiers.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` if `id` is not complete.
    pub fn make_full(&mut self, id: ChannelId) -> Result<()> {
        if !id.is_complete() {
            return Err(Error::InvalidChannelId);
        }

        if self.established.contains_key(&id) {
            self.pending.remove(&id.initiator());
            return Ok(());
        }

        let queued = self.pending.remove(&id.initiator()).unwrap_or_default();
        let mut data = ChannelData::new(id, self.packet_size);
        for bytes in queued {
            data.queue_output(bytes);
        }
        self.established.insert(id, Rc::new(RefCell::new(data)));
        Ok(())
    }

    /// The channel data for `id`, if established.
    pub fn get(&self, id: ChannelId) -> Option<ChannelHandle> {
        self.established.get(&id).cloned()
    }

    /// The established identifier using `half` as its initiator half,
    /// if any.
    pub fn established_id_for(&self, half: u16) -> Option<ChannelId> {
        self.established
            .keys()
            .find(|id| id.initiator() == half && **id != ChannelId::DEFAULT)
            .copied()
    }

    /// Create a pending channel with a fresh random initiator half and
    /// return that half.
    pub fn new_pending_channel(&mut self) -> u16 {
        loop {
            let id = ChannelId::new_partial();
            let half = id.initiator();
            if !self.pending.contains_key(&half) && self.established_id_for(half).is_none() {
                self.pending.insert(half, Vec::new());
                return half;
            }
        }
    }

    /// Queue user data on a pending channel.
    ///
    /// # Errors
    ///
    /// `InvalidChannelId` if `half` is not pending.
    pub fn queue_pending_data(&mut self, half: u16, data: Bytes) -> Result<()> {
        self.pending
            .get_mut(&half)
            .map(|queued| queued.push(data))
            .ok_or(Error::InvalidChannelId)
    }

    /// Remove the channel `id` refers to, pending or established.
    pub fn remove(&mut self, id: ChannelId) {
        self.pending.remove(&id.initiator());
        self.established.remove(&id);
    }

    /// Remove every channel whose initiator half is `half`.
    pub fn remove_half(&mut self, half: u16) {
        self.pending.remove(&half);
        self.established.retain(|id, _| id.initiator() != half || *id == ChannelId::DEFAULT);
    }

    /// Drop a pending entry without touching established channels.
    pub fn drop_pending(&mut self, half: u16) {
        self.pending.remove(&half);
    }
}
