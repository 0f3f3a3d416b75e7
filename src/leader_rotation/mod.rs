/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Leader rotation: the pure mapping from views to leaders.
//!
//! A rotation policy reads the visible block tree and the current view, and never mutates
//! consensus state. Two policies are provided: a stable [round-robin](round_robin::RoundRobin)
//! over the configuration, and the reputation-based [carousel](carousel::Carousel), which keeps
//! recently inactive replicas out of the leader seat.

pub mod carousel;

pub mod round_robin;

use crate::block_chain::BlockChain;
use crate::types::{CryptoHash, ReplicaID, ViewNumber};

/// What a rotation policy is allowed to see.
pub struct RotationContext<'a> {
    /// The replica IDs of the configuration, in ascending order.
    pub replicas: &'a [ReplicaID],
    /// The block tree.
    pub chain: &'a BlockChain,
    /// The hash of the highest executed block.
    pub committed: CryptoHash,
    /// The commit-chain length of the active rule variant.
    pub chain_length: u64,
}

/// A leader rotation policy: a pure function from view to replica ID.
pub trait LeaderRotation {
    fn leader(&self, view: ViewNumber, ctx: &RotationContext) -> ReplicaID;
}

/// The rotation policies known to this crate, constructible by name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RotationChoice {
    RoundRobin,
    Carousel,
}

impl RotationChoice {
    /// Resolve a policy name from configuration.
    pub fn from_name(name: &str) -> Option<RotationChoice> {
        match name {
            "round-robin" => Some(RotationChoice::RoundRobin),
            "carousel" => Some(RotationChoice::Carousel),
            _ => None,
        }
    }

    pub fn build(&self) -> Box<dyn LeaderRotation> {
        match self {
            RotationChoice::RoundRobin => Box::new(round_robin::RoundRobin),
            RotationChoice::Carousel => Box::new(carousel::Carousel),
        }
    }
}
