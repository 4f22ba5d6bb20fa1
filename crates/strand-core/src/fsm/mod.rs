//! Finite state machines for the channel sub-protocols.
//!
//! Every machine implements the same contract: it is offered an event,
//! decides whether it handles it, and appends any resulting actions and
//! outbound events to the caller's lists. Machines do not consume the
//! event; several machines may process the same event for different
//! purposes.
//!
//! The [`Registry`] fans events out to all registered machines in
//! insertion order. Composition is dynamic, unlike the statically
//! composed filter pipes, so that protocol extensions can add machines
//! without touching the pipe types.

mod data;
mod initiator;
mod responder;

pub use data::DataFsm;
pub use initiator::{
    ChannelInitiator, InitiatorConfig, CHANNEL_NEW_TIMEOUT_TAG, CHANNEL_TIMEOUT_TAG,
};
pub use responder::ChannelResponder;

use std::cell::RefCell;
use std::rc::Rc;

use crate::action::Actions;
use crate::context::ConnectionContext;
use crate::event::Event;

/// Contract shared by all protocol state machines.
pub trait Fsm<A> {
    /// Offer `event` to this machine.
    ///
    /// Returns whether the machine handled the event. Side effects are
    /// appended to `actions` (travelling up the pipe) and `events`
    /// (outbound, routed by category).
    fn process(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool;
}

/// Opaque handle identifying a registered machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsmHandle(usize);

/// Run-time registry of state machines.
pub struct Registry<A> {
    fsms: Vec<Box<dyn Fsm<A>>>,
}

impl<A> Registry<A> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { fsms: Vec::new() }
    }

    /// Register a machine; machines cannot be removed, as the protocol
    /// composition does not change at run time.
    pub fn add(&mut self, fsm: Box<dyn Fsm<A>>) -> FsmHandle {
        self.fsms.push(fsm);
        FsmHandle(self.fsms.len() - 1)
    }

    /// Offer `event` to every machine in insertion order.
    ///
    /// Returns true if at least one machine handled it; all actions and
    /// outbound events are concatenated in machine order.
    pub fn process(
        &mut self,
        event: &Event<A>,
        actions: &mut Actions<A>,
        events: &mut Vec<Event<A>>,
    ) -> bool {
        let mut processed = false;
        for fsm in &mut self.fsms {
            if fsm.process(event, actions, events) {
                processed = true;
            }
        }
        processed
    }

    /// Number of registered machines.
    pub fn len(&self) -> usize {
        self.fsms.len()
    }

    /// Whether the registry holds no machines.
    pub fn is_empty(&self) -> bool {
        self.fsms.is_empty()
    }
}

impl<A> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("fsms", &self.fsms.len()).finish()
    }
}

/// The standard registry: channel initiator, channel responder, and
/// data transport, wired to one connection's state.
pub fn standard_registry<A: 'static>(context: &ConnectionContext) -> Rc<RefCell<Registry<A>>> {
    let mut registry = Registry::new();
    registry.add(Box::new(ChannelInitiator::new(
        context.timeouts(),
        context.channels(),
        context.node().secret_generator(),
        InitiatorConfig::default(),
    )));
    registry.add(Box::new(ChannelResponder::new(
        context.channels(),
        context.node().secret_generator(),
    )));
    registry.add(Box::new(DataFsm::new(context.channels())));
    Rc::new(RefCell::new(registry))
}
