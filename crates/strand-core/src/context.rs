//! Node and connection contexts.
//!
//! The node context is instantiated once per process and holds what all
//! connections share: our peer identifier, the packet pool, the fixed
//! packet size, and the cookie secret generator. The connection context
//! is instantiated per peer and holds the channel set and timeout
//! collection for that connection.

use std::cell::RefCell;
use std::rc::Rc;

use strand_proto::PeerId;

use crate::channel::Channels;
use crate::pool::PacketPool;
use crate::timeout::{SleepFn, Timeouts};

/// Produces the current cookie secret.
///
/// The secret may change over time; rotation is deliberately racy. A
/// handshake whose request and response straddle a rotation fails its
/// cookie check silently and the initiator retries.
pub type SecretGenerator = Rc<dyn Fn() -> Vec<u8>>;

/// Per-process state shared by all connections.
pub struct NodeContext {
    id: PeerId,
    packet_size: usize,
    pool: PacketPool,
    secret_generator: SecretGenerator,
}

impl NodeContext {
    /// Default number of slots per pool block.
    pub const POOL_BLOCK_CAPACITY: usize = 32;

    /// Create a node context.
    ///
    /// `packet_size` fixes the size of every packet this node sends and
    /// the slot size of the packet pool.
    pub fn new(id: PeerId, packet_size: usize, secret_generator: SecretGenerator) -> Self {
        Self {
            id,
            packet_size,
            pool: PacketPool::new(packet_size, Self::POOL_BLOCK_CAPACITY),
            secret_generator,
        }
    }

    /// This node's peer identifier.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The fixed packet size.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// The node's packet pool.
    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    /// The cookie secret generator.
    pub fn secret_generator(&self) -> SecretGenerator {
        Rc::clone(&self.secret_generator)
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("id", &self.id)
            .field("packet_size", &self.packet_size)
            .finish()
    }
}

/// Per-connection state.
pub struct ConnectionContext {
    node: Rc<NodeContext>,
    peer: PeerId,
    channels: Rc<RefCell<Channels>>,
    timeouts: Rc<RefCell<Timeouts>>,
}

impl ConnectionContext {
    /// Create a connection context for traffic with `peer`, driven by
    /// the host's `sleep` primitive.
    pub fn new(node: Rc<NodeContext>, peer: PeerId, sleep: SleepFn) -> Self {
        let channels = Rc::new(RefCell::new(Channels::new(node.packet_size())));
        let timeouts = Rc::new(RefCell::new(Timeouts::new(sleep)));
        Self { node, peer, channels, timeouts }
    }

    /// The owning node context.
    pub fn node(&self) -> &Rc<NodeContext> {
        &self.node
    }

    /// The remote peer of this connection.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// The connection's channel set.
    pub fn channels(&self) -> Rc<RefCell<Channels>> {
        Rc::clone(&self.channels)
    }

    /// The connection's timeout collection.
    pub fn timeouts(&self) -> Rc<RefCell<Timeouts>> {
        Rc::clone(&self.timeouts)
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("node", &self.node)
            .field("peer", &self.peer)
            .finish()
    }
}
