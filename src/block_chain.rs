/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory, content-addressed store of blocks.
//!
//! The store is the single owner of live blocks; every other part of the replica refers to blocks
//! by hash. It starts out containing the genesis block and grows as proposals arrive. Memory is
//! bounded by [`prune_to`](BlockChain::prune_to): once a block is executed, everything below its
//! view that is not an ancestor of it is garbage-collected (and reported, so the executor can be
//! told about abandoned forks).
//!
//! The store itself never touches the network. Fetching a missing block from peers is layered on
//! top by [`ReplicaCore::get_block`](crate::replica::ReplicaCore), which owns the configuration.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::types::{Block, CryptoHash, ViewNumber};

/// The block chain store, shared between the replica core and (in simulation) the network's fetch
/// path.
pub type SharedBlockChain = Rc<RefCell<BlockChain>>;

pub struct BlockChain {
    blocks: HashMap<CryptoHash, Block>,
    at_view: BTreeMap<ViewNumber, Vec<CryptoHash>>,
    genesis: CryptoHash,
    prune_view: ViewNumber,
}

impl BlockChain {
    /// Create a store containing only the genesis block.
    pub fn new() -> BlockChain {
        let genesis = Block::genesis();
        let genesis_hash = genesis.hash;
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);
        let mut at_view = BTreeMap::new();
        at_view.insert(ViewNumber::init(), vec![genesis_hash]);
        BlockChain {
            blocks,
            at_view,
            genesis: genesis_hash,
            prune_view: ViewNumber::init(),
        }
    }

    /// The hash of the genesis block.
    pub fn genesis_hash(&self) -> CryptoHash {
        self.genesis
    }

    /// Insert `block`. Idempotent: storing the same block twice is a no-op.
    ///
    /// # Panics
    /// Panics if a *different* block is already stored under the same hash. Two distinct blocks
    /// sharing a hash breaks the content-addressing the whole protocol rests on, so the replica
    /// must not continue.
    pub fn store(&mut self, block: Block) {
        if let Some(existing) = self.blocks.get(&block.hash) {
            if *existing != block {
                panic!("two distinct blocks share the hash {:?}", block.hash);
            }
            return;
        }
        self.at_view.entry(block.view).or_default().push(block.hash);
        self.blocks.insert(block.hash, block);
    }

    /// Look up `hash` locally. No network involved.
    pub fn local_get(&self, hash: &CryptoHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Whether the block named `descendant` extends the block named `ancestor`: equal to it, or
    /// reachable from it through parent links.
    ///
    /// The walk follows parents of `descendant` toward genesis and gives up as soon as it drops
    /// below `ancestor`'s view, so it never traverses more than the distance between the two.
    pub fn extends(&self, descendant: &CryptoHash, ancestor: &CryptoHash) -> bool {
        let Some(ancestor_block) = self.blocks.get(ancestor) else {
            return false;
        };
        let mut cursor = *descendant;
        loop {
            if cursor == *ancestor {
                return true;
            }
            let Some(block) = self.blocks.get(&cursor) else {
                return false;
            };
            if block.view <= ancestor_block.view {
                return false;
            }
            cursor = block.parent;
        }
    }

    /// Garbage-collect everything below `committed`'s view that is not one of its ancestors.
    /// Returns the abandoned (forked) blocks, oldest first.
    ///
    /// The committed chain itself survives: it is what `extends` walks and what block fetches are
    /// answered from.
    pub fn prune_to(&mut self, committed: &CryptoHash) -> Vec<Block> {
        let Some(committed_block) = self.blocks.get(committed) else {
            return Vec::new();
        };
        let committed_view = committed_block.view;
        if committed_view <= self.prune_view {
            return Vec::new();
        }

        // the committed block and its ancestors are kept
        let mut canonical = HashSet::new();
        let mut cursor = *committed;
        while let Some(block) = self.blocks.get(&cursor) {
            canonical.insert(cursor);
            if block.view == ViewNumber::init() {
                break;
            }
            cursor = block.parent;
        }

        let mut forked = Vec::new();
        let doomed_views: Vec<ViewNumber> = self
            .at_view
            .range(self.prune_view.next()..=committed_view)
            .map(|(view, _)| *view)
            .collect();
        for view in doomed_views {
            let hashes = self.at_view.remove(&view).unwrap_or_default();
            let mut kept = Vec::new();
            for hash in hashes {
                if canonical.contains(&hash) {
                    kept.push(hash);
                } else if let Some(block) = self.blocks.remove(&hash) {
                    forked.push(block);
                }
            }
            if !kept.is_empty() {
                self.at_view.insert(view, kept);
            }
        }

        self.prune_view = committed_view;
        forked
    }
}

impl Default for BlockChain {
    fn default() -> Self {
        BlockChain::new()
    }
}
