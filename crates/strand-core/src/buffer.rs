//! Per-channel packet buffering.
//!
//! Received packets wait here until the application consumes them, and
//! finished outgoing packets wait here until the host transport drains
//! them. The buffer stores the parsed envelope next to the pool slot
//! holding the raw bytes, so no packet data is copied on the way
//! through.
//!
//! This is an unbounded FIFO. A bounded variant with an explicit
//! overflow policy is a future extension; [`PacketBuffer`] is the
//! extension point where loss and reordering behavior would live, since
//! both relate to the order packets leave the buffer.

use std::collections::VecDeque;

use strand_proto::Packet;

use crate::pool::Slot;

/// One buffered packet: the parsed envelope and the slot that backs it.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    /// Parsed packet envelope.
    pub packet: Packet,
    /// Pool slot holding the packet bytes.
    pub slot: Slot,
}

/// Unbounded FIFO of `(packet, slot)` pairs.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    entries: VecDeque<BufferEntry>,
}

impl PacketBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet; O(1).
    pub fn push(&mut self, packet: Packet, slot: Slot) {
        self.entries.push_back(BufferEntry { packet, slot });
    }

    /// Remove and return the oldest entry; O(1).
    pub fn pop(&mut self) -> Option<BufferEntry> {
        self.entries.pop_front()
    }

    /// Look at the oldest entry without removing it.
    pub fn peek(&self) -> Option<&BufferEntry> {
        self.entries.front()
    }

    /// Number of buffered packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no packets.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
