/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Byzantine fault tolerant state machine replication core in the chained-leader (HotStuff)
//! protocol family, with a deterministic twins test harness.
//!
//! The crate replicates an ordered log of opaque commands across `n` replicas, tolerating up to
//! `f = (n - 1) / 3` Byzantine faults: safe under any adversarial message schedule, live under
//! partial synchrony. One replica is a composition of named modules built leaves-first by the
//! [`ReplicaBuilder`](replica::ReplicaBuilder):
//!
//! 1. [`crypto`]: the quorum signature primitive, its LRU verification cache, and the
//!    certificate-level [`Signer`](crypto::Signer);
//! 2. [`block_chain`]: the in-memory content-addressed block store;
//! 3. [`configuration`]: the peer set and the transport send surface;
//! 4. [`leader_rotation`]: round-robin and carousel view-to-leader policies;
//! 5. [`rules`]: the pure vote/commit rule variants (three-chain and two-chain);
//! 6. [`synchronizer`]: the pacemaker, owning views, timeouts, and the timeout estimator;
//! 7. [`consensus`]: the driver that ties rules, synchronizer, configuration and crypto
//!    together;
//! 8. [`event_loop`]: the single-threaded serializer everything above runs inside.
//!
//! Commands come from a [`CommandSource`](app::CommandSource); committed blocks go to an
//! [`Executor`](app::Executor). The [`twins`] module runs whole configurations of replicas
//! (possibly including equivocating twins) inside one process under scripted network partitions,
//! and checks that no two of them ever commit different blocks at the same log position.

pub mod app;

pub mod block_chain;

pub mod configuration;

pub mod consensus;

pub mod crypto;

pub mod event_loop;

pub mod events;

pub mod leader_rotation;

pub mod logging;

pub mod messages;

pub mod replica;

pub mod rules;

pub mod synchronizer;

pub mod twins;

pub mod types;

// Re-exports
pub use app::{CommandSource, Executor};
pub use replica::{Replica, ReplicaBuilder, ReplicaConfig};
