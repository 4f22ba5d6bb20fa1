//! Filter pipes: staged transformation pipelines for packets.
//!
//! A pipe is a statically composed chain of filters. Each filter
//! consumes one event type, performs its stage of work, and hands a new
//! event to the next filter; actions travel back up the chain as each
//! call returns. Composition happens at compile time through generic
//! `next` parameters, keeping dispatch monomorphic, while the state
//! machine registry at the end of the ingress pipe stays dynamic.
//!
//! A filter that receives an event type it does not consume reports
//! `InvalidPipeEvent`: wiring the wrong event into a pipe is a
//! programmer error, not a recoverable protocol condition. Malformed
//! *input*, by contrast, never errors out of a pipe; bad packets are
//! dropped, possibly with filter-request actions.

pub mod egress;
pub mod ingress;

pub use egress::DefaultEgress;
pub use ingress::DefaultIngress;

use std::collections::HashMap;

use tracing::error;

use crate::action::Actions;
use crate::error::Result;
use crate::event::{Event, EventCategory};

/// One stage of a pipe.
pub trait Filter<A> {
    /// Consume `event`, returning the actions the rest of the chain
    /// produced.
    fn consume(&mut self, event: Event<A>) -> Result<Actions<A>>;
}

/// Handler for events routed out of a pipe by category.
pub type RouteFn<A> = Box<dyn FnMut(Event<A>) -> Result<Actions<A>>>;

/// Mapping of event categories to their consumers.
///
/// The state-handling stage routes the state machines' outbound events
/// through this map: egress events into the egress pipe, user events to
/// the API's notification handling, and so on. Routed events may
/// produce further actions, which merge into the pipe's return value.
pub struct EventRoutes<A> {
    map: HashMap<EventCategory, RouteFn<A>>,
}

impl<A> EventRoutes<A> {
    /// Create an empty route map.
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Install the handler for `category`, replacing any previous one.
    pub fn set(&mut self, category: EventCategory, handler: RouteFn<A>) {
        self.map.insert(category, handler);
    }

    /// Route `event` to its category's handler.
    ///
    /// Events without a handler are dropped with a log line; an
    /// unrouteable event means the connection wiring is incomplete, not
    /// that the peer misbehaved.
    pub fn route(&mut self, event: Event<A>) -> Result<Actions<A>> {
        let category = event.category();
        match self.map.get_mut(&category) {
            Some(handler) => handler(event),
            None => {
                error!(?category, "no route for event category");
                Ok(Vec::new())
            },
        }
    }
}

impl<A> Default for EventRoutes<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for EventRoutes<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRoutes").field("categories", &self.map.len()).finish()
    }
}
