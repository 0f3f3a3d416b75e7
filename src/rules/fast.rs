/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A two-chain variant in the Fast-HotStuff style.
//!
//! Committing needs only two contiguous links: certifying `b'` commits its parent `b` when
//! `b.view + 1 == b'.view`. The shortened chain is paid for after timeouts: the first proposal of
//! a recovered view must carry an [`AggregateQC`](crate::types::AggregateQC) proving the highest
//! certificate a quorum knew, and must justify its block with exactly that certificate. The
//! driver enforces the aggregate check; this module only states the shape of the chain.

use crate::block_chain::BlockChain;
use crate::types::{Block, CryptoHash};

use super::{safe_to_vote, Rules, SafetyState};

pub struct FastRules;

impl Rules for FastRules {
    fn vote_rule(&self, proposal: &Block, chain: &BlockChain, state: &SafetyState) -> bool {
        safe_to_vote(proposal, chain, state)
    }

    fn commit_rule(&self, block: &Block, chain: &BlockChain) -> Option<CryptoHash> {
        let b1 = chain.local_get(&block.justify.block_hash)?;
        let b0 = chain.local_get(&b1.parent)?;

        if b0.view.next() == b1.view {
            Some(b0.hash)
        } else {
            None
        }
    }

    fn chain_length(&self) -> u64 {
        2
    }

    fn uses_aggregate_qc(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Command, MultiSignature, QuorumCertificate, ReplicaID, ViewNumber};

    use super::*;

    fn extend(chain: &mut BlockChain, parent: CryptoHash, view: u64) -> Block {
        let parent_block = chain.local_get(&parent).unwrap().clone();
        let justify = QuorumCertificate {
            block_hash: parent_block.hash,
            view: parent_block.view,
            signature: MultiSignature::new(),
        };
        let block = Block::new(
            parent,
            justify,
            Command::default(),
            ViewNumber::new(view),
            ReplicaID::new(1),
        );
        chain.store(block.clone());
        block
    }

    #[test]
    fn two_contiguous_links_commit_the_parent() {
        let mut chain = BlockChain::new();
        let rules = FastRules;
        let genesis = chain.genesis_hash();

        let b0 = extend(&mut chain, genesis, 1);
        let b1 = extend(&mut chain, b0.hash, 2);
        let b2 = extend(&mut chain, b1.hash, 3);

        assert_eq!(rules.commit_rule(&b2, &chain), Some(b0.hash));
    }

    #[test]
    fn a_view_gap_defers_the_commit() {
        let mut chain = BlockChain::new();
        let rules = FastRules;
        let genesis = chain.genesis_hash();

        let b0 = extend(&mut chain, genesis, 1);
        let b1 = extend(&mut chain, b0.hash, 3);
        let b2 = extend(&mut chain, b1.hash, 4);

        assert_eq!(rules.commit_rule(&b2, &chain), None);
        let b3 = extend(&mut chain, b2.hash, 5);
        assert_eq!(rules.commit_rule(&b3, &chain), Some(b1.hash));
    }
}
