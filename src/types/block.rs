/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Block`] type: a leader's proposal, immutable once constructed.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use super::basic::{Command, CryptoHash, ReplicaID, ViewNumber};
use super::certificates::QuorumCertificate;

/// A proposal: a command, the view it was proposed in, the replica that proposed it, and a
/// justification that links it to its parent.
///
/// A block's `parent` always equals `justify.block_hash`: the quorum certificate a leader attaches
/// to its proposal certifies the block it extends. The genesis block is the one exception; its
/// parent is the all-zeroes hash and its justify is the (signature-less) genesis certificate.
///
/// A block's `hash` is a SHA256 digest over the borsh serialization of all other fields, computed
/// once at construction. Blocks are value types on the wire, but the
/// [block chain store](crate::block_chain::BlockChain) is the single owner of live blocks;
/// everything else refers to blocks by hash.
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Block {
    pub hash: CryptoHash,
    pub parent: CryptoHash,
    pub justify: QuorumCertificate,
    pub command: Command,
    pub view: ViewNumber,
    pub proposer: ReplicaID,
}

impl Block {
    /// Create a new block, computing its hash.
    pub fn new(
        parent: CryptoHash,
        justify: QuorumCertificate,
        command: Command,
        view: ViewNumber,
        proposer: ReplicaID,
    ) -> Block {
        let hash = Block::hash(&parent, &justify, &command, view, proposer);
        Block {
            hash,
            parent,
            justify,
            command,
            view,
            proposer,
        }
    }

    /// Compute the hash of a block with the given fields.
    pub fn hash(
        parent: &CryptoHash,
        justify: &QuorumCertificate,
        command: &Command,
        view: ViewNumber,
        proposer: ReplicaID,
    ) -> CryptoHash {
        let bytes = (parent, justify, command, view, proposer)
            .try_to_vec()
            .expect("serializing block fields is infallible");
        CryptoHash::new(Sha256::digest(&bytes).into())
    }

    /// Check whether this block's `hash` matches its contents. Blocks received from the network
    /// must pass this before they are stored.
    pub fn is_correct(&self) -> bool {
        self.hash
            == Block::hash(
                &self.parent,
                &self.justify,
                &self.command,
                self.view,
                self.proposer,
            )
    }

    /// Get the genesis block: view 0, empty command, zeroed parent, genesis certificate.
    pub fn genesis() -> Block {
        Block::new(
            CryptoHash::zero(),
            QuorumCertificate::genesis_qc(CryptoHash::zero()),
            Command::default(),
            ViewNumber::init(),
            ReplicaID::new(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hash_commits_to_every_field() {
        let genesis = Block::genesis();
        let justify = QuorumCertificate::genesis_qc(genesis.hash);

        let block = Block::new(
            genesis.hash,
            justify.clone(),
            Command::new(vec![1, 2, 3]),
            ViewNumber::new(1),
            ReplicaID::new(1),
        );
        assert!(block.is_correct());

        let other = Block::new(
            genesis.hash,
            justify,
            Command::new(vec![1, 2, 4]),
            ViewNumber::new(1),
            ReplicaID::new(1),
        );
        assert!(block.hash != other.hash);

        let mut tampered = block.clone();
        tampered.view = ViewNumber::new(2);
        assert!(!tampered.is_correct());
    }

    #[test]
    fn block_round_trips_through_borsh() {
        let block = Block::new(
            CryptoHash::new([9u8; 32]),
            QuorumCertificate::genesis_qc(CryptoHash::new([9u8; 32])),
            Command::new(b"transfer".to_vec()),
            ViewNumber::new(3),
            ReplicaID::new(2),
        );
        let bytes = block.try_to_vec().unwrap();
        let decoded = Block::deserialize(&mut bytes.as_slice()).unwrap();
        assert!(decoded == block);
        assert!(decoded.is_correct());
    }
}
