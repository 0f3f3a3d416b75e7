/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus rule engine: pure vote and commit predicates.
//!
//! A [`Rules`] implementation inspects a block relative to the block tree and the replica's
//! safety state, and decides whether to vote for it and whether anything became committed. Rules
//! never mutate anything: the [consensus driver](crate::consensus) owns `last_voted_view`,
//! `b_lock` and `b_exec` and updates them around rule calls. This is what makes consensus
//! variants swappable: each variant substitutes just this module.
//!
//! Variants are resolved by name through [`RulesChoice`], the crate's replacement for
//! registration-by-string-and-reflection: a closed enum and one constructor table.

pub mod chained;

pub mod fast;

use crate::block_chain::BlockChain;
use crate::types::{Block, CryptoHash, ViewNumber};

/// The safety-relevant state a correct replica carries between views. Owned and mutated by the
/// consensus driver; rules read it.
#[derive(Clone, Copy)]
pub struct SafetyState {
    /// The highest view this replica has voted in. At most one vote is ever emitted per view.
    pub last_voted_view: ViewNumber,
    /// The block this replica is locked on.
    pub b_lock: CryptoHash,
    /// The view of the locked block. Non-decreasing.
    pub b_lock_view: ViewNumber,
}

/// A consensus rule variant.
pub trait Rules {
    /// Whether to vote for `proposal`. Callers guarantee that the proposal's justify has been
    /// verified and that its parent is resolvable in `chain`.
    fn vote_rule(&self, proposal: &Block, chain: &BlockChain, state: &SafetyState) -> bool;

    /// The block (if any) that becomes committed now that `block` carries a quorum certificate
    /// for its parent chain.
    fn commit_rule(&self, block: &Block, chain: &BlockChain) -> Option<CryptoHash>;

    /// The commit-chain length of this variant: 3 for three-chain, 2 for two-chain. Informs the
    /// carousel rotation.
    fn chain_length(&self) -> u64;

    /// Whether proposals after a timeout must carry an [`AggregateQC`](crate::types::AggregateQC).
    fn uses_aggregate_qc(&self) -> bool {
        false
    }
}

/// The consensus variants known to this crate, constructible by name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RulesChoice {
    Chained,
    Fast,
}

impl RulesChoice {
    /// Resolve a variant name from configuration.
    pub fn from_name(name: &str) -> Option<RulesChoice> {
        match name {
            "chained" => Some(RulesChoice::Chained),
            "fast" => Some(RulesChoice::Fast),
            _ => None,
        }
    }

    pub fn build(&self) -> Box<dyn Rules> {
        match self {
            RulesChoice::Chained => Box::new(chained::ChainedRules),
            RulesChoice::Fast => Box::new(fast::FastRules),
        }
    }
}

/// Shared vote predicate: vote iff the proposal is for a view we have not voted in, and it either
/// extends the lock or carries a certificate from after the lock formed (the liveness clause).
pub(crate) fn safe_to_vote(proposal: &Block, chain: &BlockChain, state: &SafetyState) -> bool {
    if proposal.view <= state.last_voted_view {
        return false;
    }
    chain.extends(&proposal.hash, &state.b_lock) || proposal.justify.view > state.b_lock_view
}
