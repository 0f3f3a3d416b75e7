/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single-threaded cooperative scheduler for [`Event`]s.
//!
//! Every state transition of a replica happens inside its event loop: inbound messages and timer
//! expiries are enqueued as events, and [`tick`](EventLoop::tick) dequeues and dispatches exactly
//! one of them. This serialization is what makes the protocol's invariants local state-machine
//! properties, provable without reasoning about locks.
//!
//! Ordering guarantees:
//! - Events are processed in FIFO order. Events emitted by a handler (through its [`EventSink`])
//!   join the queue *after* everything already enqueued.
//! - Exactly one handler is registered per [`EventKind`]; registering a second one is a wiring
//!   bug and panics.
//! - Observers of an event run after its handler returns, in registration order.
//! - An event deferred with [`delay_until`](EventLoop::delay_until) is not processed before some
//!   later event of the awaited kind has been processed.

use std::collections::{HashMap, VecDeque};

use crate::events::{Event, EventKind};

/// Where handlers and observers put the events they emit. Drained into the main queue after the
/// emitting callback returns.
#[derive(Default)]
pub struct EventSink {
    events: VecDeque<Event>,
}

impl EventSink {
    pub fn new() -> EventSink {
        EventSink::default()
    }

    /// Enqueue `event` for processing after everything currently queued.
    pub fn add_event(&mut self, event: Event) {
        self.events.push_back(event);
    }
}

pub type Handler<S> = Box<dyn FnMut(&mut S, Event, &mut EventSink)>;
pub type Observer = Box<dyn FnMut(&Event, &mut EventSink)>;

pub struct EventLoop<S> {
    queue: VecDeque<Event>,
    handlers: HashMap<EventKind, Handler<S>>,
    observers: HashMap<EventKind, Vec<Observer>>,
    delayed: HashMap<EventKind, Vec<Event>>,
}

impl<S> EventLoop<S> {
    pub fn new() -> EventLoop<S> {
        EventLoop {
            queue: VecDeque::new(),
            handlers: HashMap::new(),
            observers: HashMap::new(),
            delayed: HashMap::new(),
        }
    }

    /// Enqueue `event` at the back of the queue.
    pub fn add_event(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Register the handler for `kind`.
    ///
    /// # Panics
    /// Panics if a handler for `kind` is already registered.
    pub fn register_handler(&mut self, kind: EventKind, handler: Handler<S>) {
        if self.handlers.insert(kind, handler).is_some() {
            panic!("two handlers registered for {:?}", kind);
        }
    }

    /// Register an observer for `kind`. Observers run after the handler, in registration order.
    pub fn register_observer(&mut self, kind: EventKind, observer: Observer) {
        self.observers.entry(kind).or_default().push(observer);
    }

    /// Defer `event` until after an event of kind `until` has been processed.
    pub fn delay_until(&mut self, until: EventKind, event: Event) {
        self.delayed.entry(until).or_default().push(event);
    }

    /// Dequeue and dispatch one event. Returns whether the queue was non-empty.
    ///
    /// The handler runs to completion, then the observers, and only then do the events they
    /// emitted (and any events previously deferred on this kind) join the queue.
    pub fn tick(&mut self, state: &mut S) -> bool {
        let Some(event) = self.queue.pop_front() else {
            return false;
        };
        let kind = event.kind();
        let mut sink = EventSink::new();

        if let Some(handler) = self.handlers.get_mut(&kind) {
            handler(state, event.clone(), &mut sink);
        }
        if let Some(observers) = self.observers.get_mut(&kind) {
            for observer in observers {
                observer(&event, &mut sink);
            }
        }

        self.queue.append(&mut sink.events);
        if let Some(released) = self.delayed.remove(&kind) {
            self.queue.extend(released);
        }
        true
    }

    /// Process events until the queue is empty.
    pub fn drain(&mut self, state: &mut S) {
        while self.tick(state) {}
    }
}

impl<S> Default for EventLoop<S> {
    fn default() -> Self {
        EventLoop::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::events::{TimeoutElapsedEvent, ViewChangeEvent};
    use crate::types::ViewNumber;

    use super::*;

    fn view_change(view: u64) -> Event {
        Event::ViewChange(ViewChangeEvent {
            view: ViewNumber::new(view),
            timeout: false,
        })
    }

    fn timeout_elapsed(view: u64) -> Event {
        Event::TimeoutElapsed(TimeoutElapsedEvent {
            view: ViewNumber::new(view),
        })
    }

    #[test]
    fn handler_emissions_follow_previously_queued_events() {
        let mut el: EventLoop<Vec<String>> = EventLoop::new();
        el.register_handler(
            EventKind::ViewChange,
            Box::new(|log, event, sink| {
                if let Event::ViewChange(e) = event {
                    log.push(format!("view {}", e.view));
                    if e.view == ViewNumber::new(1) {
                        sink.add_event(view_change(10));
                    }
                }
            }),
        );
        el.register_handler(
            EventKind::Tick,
            Box::new(|log, _, _| log.push("tick".to_string())),
        );

        el.add_event(view_change(1));
        el.add_event(Event::Tick);

        let mut log = Vec::new();
        el.drain(&mut log);
        // the event emitted while handling view 1 runs after the already-queued tick
        assert_eq!(log, vec!["view 1", "tick", "view 10"]);
    }

    #[test]
    fn observers_run_after_the_handler_in_registration_order() {
        let trace = Rc::new(RefCell::new(Vec::new()));

        let mut el: EventLoop<()> = EventLoop::new();
        let t = trace.clone();
        el.register_handler(
            EventKind::Tick,
            Box::new(move |_, _, _| t.borrow_mut().push("handler")),
        );
        let t = trace.clone();
        el.register_observer(
            EventKind::Tick,
            Box::new(move |_, _| t.borrow_mut().push("observer 1")),
        );
        let t = trace.clone();
        el.register_observer(
            EventKind::Tick,
            Box::new(move |_, _| t.borrow_mut().push("observer 2")),
        );

        el.add_event(Event::Tick);
        el.drain(&mut ());
        assert_eq!(*trace.borrow(), vec!["handler", "observer 1", "observer 2"]);
    }

    #[test]
    fn delayed_events_wait_for_their_trigger_kind() {
        let mut el: EventLoop<Vec<String>> = EventLoop::new();
        el.register_handler(
            EventKind::ViewChange,
            Box::new(|log, event, _| {
                if let Event::ViewChange(e) = event {
                    log.push(format!("view {}", e.view));
                }
            }),
        );
        el.register_handler(
            EventKind::TimeoutElapsed,
            Box::new(|log, _, _| log.push("timeout".to_string())),
        );
        el.register_handler(
            EventKind::Tick,
            Box::new(|log, _, _| log.push("tick".to_string())),
        );

        el.delay_until(EventKind::TimeoutElapsed, view_change(2));
        el.add_event(Event::Tick);
        el.add_event(timeout_elapsed(1));

        let mut log = Vec::new();
        el.drain(&mut log);
        assert_eq!(log, vec!["tick", "timeout", "view 2"]);
    }

    #[test]
    #[should_panic(expected = "two handlers")]
    fn duplicate_handler_registration_panics() {
        let mut el: EventLoop<()> = EventLoop::new();
        el.register_handler(EventKind::Tick, Box::new(|_, _, _| {}));
        el.register_handler(EventKind::Tick, Box::new(|_, _, _| {}));
    }
}
