/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Observers that log protocol events.
//!
//! This crate logs through the [log](https://docs.rs/log/latest/log/) facade. To get these
//! messages printed onto a terminal or into a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! Enabled via [`ReplicaBuilder::log_events`](crate::replica::ReplicaBuilder::log_events), the
//! observers registered here turn each processed event into one terse CSV line: the event name in
//! PascalCase, the replica, and a few event-specific values. Hashes are printed as the first
//! seven characters of their Base64 encoding.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;

use crate::event_loop::EventLoop;
use crate::events::{Event, EventKind};
use crate::replica::ReplicaCore;
use crate::types::ReplicaID;

// Names of each event in PascalCase for printing:
pub const START_VIEW: &str = "StartView";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";
pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_TIMEOUT: &str = "ReceiveTimeout";
pub const RECEIVE_NEW_VIEW: &str = "ReceiveNewView";

/// Get a more readable representation of a bytesequence by base64-encoding it and taking the
/// first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

/// Register one logging observer per protocol event kind.
pub(crate) fn register_logging_observers(event_loop: &mut EventLoop<ReplicaCore>, id: ReplicaID) {
    event_loop.register_observer(
        EventKind::ViewChange,
        Box::new(move |event, _| {
            if let Event::ViewChange(e) = event {
                log::info!("{}, {}, {}, {}", START_VIEW, id, e.view, e.timeout);
            }
        }),
    );
    event_loop.register_observer(
        EventKind::TimeoutElapsed,
        Box::new(move |event, _| {
            if let Event::TimeoutElapsed(e) = event {
                log::info!("{}, {}, {}", VIEW_TIMEOUT, id, e.view);
            }
        }),
    );
    event_loop.register_observer(
        EventKind::Propose,
        Box::new(move |event, _| {
            if let Event::Propose(msg) = event {
                log::info!(
                    "{}, {}, {}, {}, {}",
                    RECEIVE_PROPOSAL,
                    id,
                    msg.id,
                    first_seven_base64_chars(&msg.block.hash.bytes()),
                    msg.block.view
                );
            }
        }),
    );
    event_loop.register_observer(
        EventKind::Vote,
        Box::new(move |event, _| {
            if let Event::Vote(msg) = event {
                log::info!(
                    "{}, {}, {}, {}, {}",
                    RECEIVE_VOTE,
                    id,
                    msg.id,
                    first_seven_base64_chars(&msg.cert.block_hash.bytes()),
                    msg.cert.view
                );
            }
        }),
    );
    event_loop.register_observer(
        EventKind::Timeout,
        Box::new(move |event, _| {
            if let Event::Timeout(msg) = event {
                log::info!("{}, {}, {}, {}", RECEIVE_TIMEOUT, id, msg.id, msg.view);
            }
        }),
    );
    event_loop.register_observer(
        EventKind::NewView,
        Box::new(move |event, _| {
            if let Event::NewView(msg) = event {
                log::info!(
                    "{}, {}, {}, {}",
                    RECEIVE_NEW_VIEW,
                    id,
                    msg.id,
                    msg.sync_info.high_qc_view()
                );
            }
        }),
    );
}
