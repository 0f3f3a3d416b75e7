/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The closed set of events that drive a replica.
//!
//! Everything that happens to a replica happens here: inbound wire messages, clock ticks, local
//! timer expiries, and view changes all become [`Event`]s processed one at a time by the
//! [event loop](crate::event_loop::EventLoop). Because the set is a sealed sum type, handlers and
//! observers dispatch on the [`EventKind`] tag; the same tags name message types in the twins
//! simulator's drop set.

use crate::messages::{NewViewMessage, ProposeMessage, TimeoutMessage, VoteMessage};
use crate::types::ViewNumber;

/// One unit of work for a replica's event loop.
#[derive(Clone)]
pub enum Event {
    /// The clock advanced. In production a tick fires periodically; in simulation the network
    /// injects one tick per simulated round.
    Tick,
    /// The local view timer for `view` expired.
    TimeoutElapsed(TimeoutElapsedEvent),
    /// The replica entered `view`, by observing a certificate (`timeout == false`) or by
    /// assembling/observing a timeout certificate (`timeout == true`).
    ViewChange(ViewChangeEvent),
    /// A proposal arrived.
    Propose(ProposeMessage),
    /// A vote arrived.
    Vote(VoteMessage),
    /// A timeout message arrived.
    Timeout(TimeoutMessage),
    /// A new-view message arrived.
    NewView(NewViewMessage),
}

#[derive(Clone, Copy)]
pub struct TimeoutElapsedEvent {
    pub view: ViewNumber,
}

#[derive(Clone, Copy)]
pub struct ViewChangeEvent {
    pub view: ViewNumber,
    pub timeout: bool,
}

/// The tag of an [`Event`] variant.
///
/// `Fetch` tags no event: fetches are synchronous quorum calls, but the twins simulator still
/// needs a name for them in its drop set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EventKind {
    Tick,
    TimeoutElapsed,
    ViewChange,
    Propose,
    Vote,
    Timeout,
    NewView,
    Fetch,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Tick => EventKind::Tick,
            Event::TimeoutElapsed(_) => EventKind::TimeoutElapsed,
            Event::ViewChange(_) => EventKind::ViewChange,
            Event::Propose(_) => EventKind::Propose,
            Event::Vote(_) => EventKind::Vote,
            Event::Timeout(_) => EventKind::Timeout,
            Event::NewView(_) => EventKind::NewView,
        }
    }
}
