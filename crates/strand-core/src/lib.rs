//! Sans-I/O runtime for the Strand channel multiplexing protocol.
//!
//! Strand lets two peers establish multiple logically independent,
//! bidirectional channels over an arbitrary datagram or stream
//! transport, with cryptographically scoped admission control. This
//! crate is the protocol engine: it performs no I/O and owns no
//! threads. The host delivers received bytes, drains finished packets,
//! and supplies a sleep primitive; everything in between - parsing,
//! validation, channel handshakes, bundling - happens synchronously
//! inside those calls.
//!
//! The moving parts:
//!
//! - [`pool::PacketPool`] / [`pool::Slot`]: reference-counted,
//!   fixed-size packet buffers backing zero-copy packet handling
//! - [`channel::Channels`]: per-connection channel state (absent,
//!   pending, established)
//! - [`timeout::Timeouts`]: cooperative timers driven by the host's
//!   sleep
//! - [`fsm`]: the channel initiator, responder, and data transport
//!   state machines behind a dynamic registry
//! - [`pipe`]: statically composed ingress and egress filter chains
//! - [`api::Connection`]: the host-facing surface tying it together
//!
//! Scheduling is single-threaded cooperative within one connection;
//! cross-thread use requires the host to serialize calls per
//! connection. The packet pool optionally takes a lock handle for
//! hosts that share it across connections on different threads.

pub mod action;
pub mod api;
pub mod buffer;
pub mod channel;
pub mod context;
pub mod error;
pub mod event;
pub mod fsm;
pub mod pipe;
pub mod policy;
pub mod pool;
pub mod timeout;

pub use action::{Action, Actions};
pub use api::{Connection, ConnectionCallbacks, WriteChunking};
pub use buffer::{BufferEntry, PacketBuffer};
pub use channel::{ChannelData, ChannelHandle, Channels};
pub use context::{ConnectionContext, NodeContext, SecretGenerator};
pub use error::{Error, Result};
pub use event::{Event, EventCategory};
pub use fsm::{Fsm, FsmHandle, Registry};
pub use policy::{NullPeerPolicy, NullTransportPolicy, PeerPolicy, TransportPolicy};
pub use pool::{LockPolicy, PacketPool, Slot};
pub use timeout::{SleepFn, TimeoutKey, Timeouts};
