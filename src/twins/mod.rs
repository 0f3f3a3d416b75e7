/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The twins simulator: deterministic, adversarial, in-process networks.
//!
//! Twins-style testing runs several simulated nodes inside one process on a simulated clock,
//! while a scripted partition plan decides which messages survive each view. Some of the nodes
//! may be *twins*: two nodes sharing a replica ID and signing key, which therefore equivocate.
//! Because delivery, execution order and randomness are all deterministic, a scenario that finds
//! a safety violation finds it on every run.
//!
//! A scenario is an ordered [view plan](scenario::ViewSpec): for each view, the leader and the
//! partitions. At every simulated tick the network first delivers the messages queued during the
//! previous tick, then injects a [`Tick`](crate::events::Event::Tick) into every node and drains
//! each node's event loop to empty. After the configured number of ticks, the executed logs of
//! all non-twin replicas are compared index by index; any disagreement fails the scenario.

pub mod network;

pub mod scenario;

pub use network::{NetworkID, NodeID, Partition};
pub use scenario::{
    execute_scenario, Scenario, ScenarioOptions, ScenarioResult, ViewSpec,
};
