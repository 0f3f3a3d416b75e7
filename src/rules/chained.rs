/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The canonical three-chain chained variant.
//!
//! A block is committed once it heads a parent-linked chain of three blocks with contiguous
//! views, the newest of which has just been certified: given `b <- b' <- b''` with
//! `b.view + 1 == b'.view` and `b'.view + 1 == b''.view`, certifying `b''` commits `b`.
//! Contiguity is what makes the rule safe across view changes: a timeout between two links resets
//! the count.

use crate::block_chain::BlockChain;
use crate::types::{Block, CryptoHash};

use super::{safe_to_vote, Rules, SafetyState};

pub struct ChainedRules;

impl Rules for ChainedRules {
    fn vote_rule(&self, proposal: &Block, chain: &BlockChain, state: &SafetyState) -> bool {
        safe_to_vote(proposal, chain, state)
    }

    fn commit_rule(&self, block: &Block, chain: &BlockChain) -> Option<CryptoHash> {
        // b'' is the block the new proposal certifies; b' and b are its parent and grandparent.
        let b2 = chain.local_get(&block.justify.block_hash)?;
        let b1 = chain.local_get(&b2.parent)?;
        let b0 = chain.local_get(&b1.parent)?;

        if b1.view.next() == b2.view && b0.view.next() == b1.view {
            Some(b0.hash)
        } else {
            None
        }
    }

    fn chain_length(&self) -> u64 {
        3
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
    fn three_contiguous_links_commit_the_tail() {
        let mut chain = BlockChain::new();
        let rules = ChainedRules;
        let genesis = chain.genesis_hash();

        let b0 = extend(&mut chain, genesis, 1);
        let b1 = extend(&mut chain, b0.hash, 2);
        let b2 = extend(&mut chain, b1.hash, 3);
        // b3 certifies b2, completing the chain b0 <- b1 <- b2
        let b3 = extend(&mut chain, b2.hash, 4);

        assert_eq!(rules.commit_rule(&b3, &chain), Some(b0.hash));
    }

    #[test]
    fn a_view_gap_resets_the_chain() {
        let mut chain = BlockChain::new();
        let rules = ChainedRules;
        let genesis = chain.genesis_hash();

        let b0 = extend(&mut chain, genesis, 1);
        let b1 = extend(&mut chain, b0.hash, 2);
        // view 3 timed out: the next block is at view 4
        let b2 = extend(&mut chain, b1.hash, 4);
        let b3 = extend(&mut chain, b2.hash, 5);

        assert_eq!(rules.commit_rule(&b3, &chain), None);

        // two more contiguous links commit b2
        let b4 = extend(&mut chain, b3.hash, 6);
        assert_eq!(rules.commit_rule(&b4, &chain), Some(b2.hash));
    }

    #[test]
    fn vote_rule_enforces_one_vote_per_view_and_the_lock() {
        let mut chain = BlockChain::new();
        let rules = ChainedRules;
        let genesis = chain.genesis_hash();

        let b0 = extend(&mut chain, genesis, 1);
        let b1 = extend(&mut chain, b0.hash, 2);

        let mut state = SafetyState {
            last_voted_view: ViewNumber::new(1),
            b_lock: b0.hash,
            b_lock_view: b0.view,
        };

        // b1 extends the lock and is for a fresh view
        assert!(rules.vote_rule(&b1, &chain, &state));

        // already voted in view 2: no second vote
        state.last_voted_view = ViewNumber::new(2);
        assert!(!rules.vote_rule(&b1, &chain, &state));

        // a conflicting proposal that does not extend the lock and carries an old certificate
        state.last_voted_view = ViewNumber::new(1);
        state.b_lock = b1.hash;
        state.b_lock_view = b1.view;
        let conflicting = Block::new(
            genesis,
            QuorumCertificate::genesis_qc(genesis),
            Command::default(),
            ViewNumber::new(3),
            ReplicaID::new(2),
        );
        chain.store(conflicting.clone());
        assert!(!rules.vote_rule(&conflicting, &chain, &state));

        // but a certificate newer than the lock unlocks (the liveness clause)
        let fresh = extend(&mut chain, b1.hash, 3);
        let unlocking = Block::new(
            fresh.hash,
            QuorumCertificate {
                block_hash: fresh.hash,
                view: fresh.view,
                signature: MultiSignature::new(),
            },
            Command::default(),
            ViewNumber::new(4),
            ReplicaID::new(2),
        );
        chain.store(unlocking.clone());
        assert!(rules.vote_rule(&unlocking, &chain, &state));
    }
}
