/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Collection of partial certificates into quorums.

use std::collections::{BTreeMap, HashMap};

use crate::types::{CryptoHash, PartialCertificate, ReplicaID, ViewNumber};

/// Accumulates verified votes per proposed block. When a block's tally reaches the quorum size,
/// the whole tally is handed back for combination into a quorum certificate.
///
/// Duplicate votes from the same replica for the same block are ignored, so each replica
/// contributes at most one signature per certificate.
#[derive(Default)]
pub(crate) struct VoteCollector {
    votes: HashMap<CryptoHash, BTreeMap<ReplicaID, PartialCertificate>>,
}

impl VoteCollector {
    pub(crate) fn new() -> VoteCollector {
        VoteCollector::default()
    }

    /// Record `cert` as `voter`'s vote. Returns the full set of votes once `quorum` of them have
    /// been collected for the block.
    pub(crate) fn collect(
        &mut self,
        voter: ReplicaID,
        cert: PartialCertificate,
        quorum: usize,
    ) -> Option<Vec<PartialCertificate>> {
        let block_hash = cert.block_hash;
        let tally = self.votes.entry(block_hash).or_default();
        if tally.contains_key(&voter) {
            return None;
        }
        tally.insert(voter, cert);
        if tally.len() >= quorum {
            let tally = self.votes.remove(&block_hash).unwrap();
            return Some(tally.into_values().collect());
        }
        None
    }

    /// Drop tallies for blocks whose view can no longer produce a useful certificate. Votes for
    /// view `v` stay relevant through view `v + 1`, because the certificate they form advances
    /// the replica out of `v + 1`.
    pub(crate) fn discard_stale(&mut self, current_view: ViewNumber) {
        self.votes.retain(|_, tally| {
            tally
                .values()
                .next()
                .map_or(false, |cert| cert.view.next() >= current_view)
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::types::MultiSignature;

    use super::*;

    fn vote(block: u8, view: u64) -> PartialCertificate {
        PartialCertificate {
            block_hash: CryptoHash::new([block; 32]),
            view: ViewNumber::new(view),
            signature: MultiSignature::new(),
        }
    }

    #[test]
    fn quorum_is_reached_once_per_block_and_duplicates_do_not_count() {
        let mut collector = VoteCollector::new();
        let quorum = 3;

        assert!(collector
            .collect(ReplicaID::new(1), vote(1, 1), quorum)
            .is_none());
        // a duplicate from the same voter changes nothing
        assert!(collector
            .collect(ReplicaID::new(1), vote(1, 1), quorum)
            .is_none());
        assert!(collector
            .collect(ReplicaID::new(2), vote(1, 1), quorum)
            .is_none());

        let full = collector
            .collect(ReplicaID::new(3), vote(1, 1), quorum)
            .expect("third distinct vote completes the quorum");
        assert_eq!(full.len(), 3);
    }

    #[test]
    fn stale_tallies_are_discarded() {
        let mut collector = VoteCollector::new();
        assert!(collector
            .collect(ReplicaID::new(1), vote(1, 1), 3)
            .is_none());
        assert!(collector
            .collect(ReplicaID::new(1), vote(2, 4), 3)
            .is_none());

        collector.discard_stale(ViewNumber::new(3));
        // the view-1 tally is gone; two fresh votes for block 1 no longer reach quorum
        assert!(collector
            .collect(ReplicaID::new(2), vote(1, 1), 3)
            .is_none());
        assert!(collector
            .collect(ReplicaID::new(3), vote(1, 1), 3)
            .is_none());
        // the view-4 tally survived
        assert!(collector
            .collect(ReplicaID::new(2), vote(2, 4), 3)
            .is_none());
        assert!(collector
            .collect(ReplicaID::new(3), vote(2, 4), 3)
            .is_some());
    }
}
