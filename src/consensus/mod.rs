/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus driver: proposals, votes, and commits.
//!
//! The driver binds the [rules](crate::rules), the [synchronizer](crate::synchronizer), the
//! [configuration](crate::configuration) and the [crypto](crate::crypto) together. It owns the
//! state the rules are stated over (`last_voted_view`, the lock, and the executed head) and is
//! the only place that mutates it:
//!
//! - on a successful vote, `last_voted_view` rises to the proposal's view (at most one vote per
//!   view, ever);
//! - on every verified proposal, the lock rises to the highest certified block seen;
//! - when the commit rule fires, every ancestor from the previously executed head up to the newly
//!   committed block is executed in ascending view order, exactly once, and abandoned forks are
//!   pruned and reported.
//!
//! Committing a block that does not extend the executed chain would mean two incompatible
//! commits, so it aborts the replica rather than propagate corrupt state.

pub(crate) mod votes;

use crate::event_loop::EventSink;
use crate::messages::{ProposeMessage, VoteMessage};
use crate::replica::ReplicaCore;
use crate::rules::SafetyState;
use crate::types::{Block, CryptoHash, SyncInfo, ViewNumber};

use votes::VoteCollector;

/// The driver's mutable state.
pub struct Consensus {
    pub(crate) safety: SafetyState,
    pub(crate) b_exec: CryptoHash,
    pub(crate) b_exec_view: ViewNumber,
    collector: VoteCollector,
}

impl Consensus {
    /// Fresh driver state: nothing voted, locked on genesis, genesis executed.
    pub fn new(genesis_hash: CryptoHash) -> Consensus {
        Consensus {
            safety: SafetyState {
                last_voted_view: ViewNumber::init(),
                b_lock: genesis_hash,
                b_lock_view: ViewNumber::init(),
            },
            b_exec: genesis_hash,
            b_exec_view: ViewNumber::init(),
            collector: VoteCollector::new(),
        }
    }

    pub fn last_voted_view(&self) -> ViewNumber {
        self.safety.last_voted_view
    }

    pub fn locked_view(&self) -> ViewNumber {
        self.safety.b_lock_view
    }

    pub fn executed(&self) -> CryptoHash {
        self.b_exec
    }

    pub fn executed_view(&self) -> ViewNumber {
        self.b_exec_view
    }

    pub(crate) fn discard_stale_votes(&mut self, current_view: ViewNumber) {
        self.collector.discard_stale(current_view);
    }
}

impl ReplicaCore {
    /// Build and broadcast the proposal for the current view, then process it like any other
    /// proposal. The leader's own vote is handed straight to the vote path rather than looping
    /// through the transport.
    pub(crate) fn propose(&mut self, sink: &mut EventSink) {
        let view = self.synchronizer.current_view();
        let high_qc = self.synchronizer.high_qc().clone();
        let command = self.commands.next_command().unwrap_or_default();
        let block = Block::new(high_qc.block_hash, high_qc, command, view, self.id);
        self.chain.borrow_mut().store(block.clone());

        let aggregate_qc = if self.rules.uses_aggregate_qc() {
            self.synchronizer.take_pending_agg_qc()
        } else {
            None
        };
        let msg = ProposeMessage {
            id: self.id,
            block,
            aggregate_qc,
        };
        log::debug!(
            "replica {}: proposing block {:?} in view {}",
            self.id,
            msg.block.hash,
            view
        );
        self.config.propose(msg.clone());
        self.on_propose(msg, sink);
    }

    /// Handler for [`Event::Propose`](crate::events::Event::Propose).
    ///
    /// The proposal is screened (right leader, intact hash, parent named by the justify, valid
    /// justify, aggregate check for variants that use one), its ancestry is resolved, fetching
    /// from peers if the parent is unknown, and then the vote and commit rules run. Whether or
    /// not the proposal earns a
    /// vote, its verified certificate still advances the view: rejecting a block is no reason to
    /// ignore the progress evidence it carries.
    pub(crate) fn on_propose(&mut self, msg: ProposeMessage, sink: &mut EventSink) {
        let block = msg.block;
        let current_view = self.synchronizer.current_view();
        if block.view.next() < current_view {
            log::debug!(
                "replica {}: stale proposal for view {} from {}",
                self.id,
                block.view,
                msg.id
            );
            return;
        }
        if msg.id != block.proposer || msg.id != self.leader_of(block.view) {
            log::debug!(
                "replica {}: proposal for view {} from invalid leader {}",
                self.id,
                block.view,
                msg.id
            );
            return;
        }
        if !block.is_correct() {
            log::debug!("replica {}: proposal with forged hash from {}", self.id, msg.id);
            return;
        }
        // the parent link and the certificate must name the same block, or the lock check
        // would walk a chain the certificate says nothing about
        if block.parent != block.justify.block_hash {
            log::debug!(
                "replica {}: proposal whose parent and justify disagree from {}",
                self.id,
                msg.id
            );
            return;
        }

        let quorum = self.config.quorum_size();
        if self.rules.uses_aggregate_qc() {
            if let Some(agg) = &msg.aggregate_qc {
                match self.signer.verify_aggregate_qc(agg, quorum) {
                    // the proposal must extend exactly what the aggregate proves
                    Some(high_qc) if block.justify == high_qc => {}
                    _ => {
                        log::debug!(
                            "replica {}: proposal with unusable aggregate qc from {}",
                            self.id,
                            msg.id
                        );
                        return;
                    }
                }
            }
        }
        if !self.signer.verify_quorum_cert(&block.justify, quorum) {
            log::debug!(
                "replica {}: proposal with invalid justify from {}",
                self.id,
                msg.id
            );
            return;
        }

        let parent_resolved = self.get_block(&block.parent).is_some();
        if parent_resolved {
            self.chain.borrow_mut().store(block.clone());

            // lock on the newest certified block
            if !block.justify.is_genesis_qc()
                && block.justify.view > self.consensus.safety.b_lock_view
            {
                self.consensus.safety.b_lock = block.justify.block_hash;
                self.consensus.safety.b_lock_view = block.justify.view;
            }

            let votable = self.commands.accept(&block.command) && {
                let chain = self.chain.borrow();
                self.rules.vote_rule(&block, &chain, &self.consensus.safety)
            };
            if votable {
                self.consensus.safety.last_voted_view = block.view;
                self.commands.proposed(&block.command);
                let cert = self.signer.create_partial_cert(&block);
                let vote = VoteMessage { id: self.id, cert };
                let next_leader = self.leader_of(block.view.next());
                if next_leader == self.id {
                    self.on_vote(vote, sink);
                } else {
                    self.config.vote(next_leader, vote);
                }
            }

            let committed = {
                let chain = self.chain.borrow();
                self.rules.commit_rule(&block, &chain)
            };
            if let Some(committed) = committed {
                self.commit(&committed);
            }
        } else {
            log::debug!(
                "replica {}: dropping proposal {:?}, parent unresolvable",
                self.id,
                block.hash
            );
        }

        self.advance_view(&SyncInfo::new().with_qc(block.justify.clone()), sink);
    }

    /// Handler for [`Event::Vote`](crate::events::Event::Vote): verify the partial certificate
    /// and tally it; a completed quorum becomes a quorum certificate and advances the view.
    pub(crate) fn on_vote(&mut self, msg: VoteMessage, sink: &mut EventSink) {
        let current_view = self.synchronizer.current_view();
        if msg.cert.view.next() < current_view {
            log::debug!(
                "replica {}: stale vote for view {} from {}",
                self.id,
                msg.cert.view,
                msg.id
            );
            return;
        }
        if !self.signer.verify_partial_cert(&msg.cert, msg.id) {
            log::debug!("replica {}: invalid vote signature from {}", self.id, msg.id);
            return;
        }

        let quorum = self.config.quorum_size();
        let Some(partials) = self
            .consensus
            .collector
            .collect(msg.id, msg.cert.clone(), quorum)
        else {
            return;
        };
        match self
            .signer
            .create_quorum_cert(msg.cert.block_hash, msg.cert.view, &partials)
        {
            Ok(qc) => {
                log::debug!(
                    "replica {}: collected qc for block {:?} in view {}",
                    self.id,
                    qc.block_hash,
                    qc.view
                );
                self.advance_view(&SyncInfo::new().with_qc(qc), sink);
            }
            Err(err) => log::debug!("replica {}: failed to combine votes: {}", self.id, err),
        }
    }

    /// Execute everything from the previously executed head up to (and including) `target`, then
    /// prune abandoned forks below it.
    pub(crate) fn commit(&mut self, target: &CryptoHash) {
        let (ancestors, reached_executed_head) = {
            let chain = self.chain.borrow();
            let Some(target_block) = chain.local_get(target) else {
                return;
            };
            if target_block.view <= self.consensus.b_exec_view {
                return;
            }

            let mut ancestors: Vec<Block> = Vec::new();
            let mut reached = false;
            let mut cursor = *target;
            while let Some(block) = chain.local_get(&cursor) {
                if cursor == self.consensus.b_exec {
                    reached = true;
                    break;
                }
                if block.view <= self.consensus.b_exec_view {
                    break;
                }
                ancestors.push(block.clone());
                cursor = block.parent;
            }
            (ancestors, reached)
        };
        if !reached_executed_head {
            panic!(
                "safety violation: committed block {:?} does not extend the executed chain",
                target
            );
        }

        for block in ancestors.iter().rev() {
            log::debug!(
                "replica {}: executing block {:?} from view {}",
                self.id,
                block.hash,
                block.view
            );
            self.executor.exec(block);
            self.consensus.b_exec = block.hash;
            self.consensus.b_exec_view = block.view;
        }

        let forked = self.chain.borrow_mut().prune_to(&self.consensus.b_exec);
        for block in &forked {
            self.executor.fork(block);
        }
    }

    /// Look up a block, fetching it and any missing ancestors from peers if it is not held
    /// locally. Fetched blocks are verified (hash integrity, parent named by the justify, and
    /// justify signatures) before they are stored. Returns `None` once a fetch fails or
    /// verification rejects a fetched block.
    pub(crate) fn get_block(&mut self, hash: &CryptoHash) -> Option<Block> {
        if let Some(block) = self.chain.borrow().local_get(hash).cloned() {
            return Some(block);
        }

        let quorum = self.config.quorum_size();
        let mut missing: Vec<Block> = Vec::new();
        let mut cursor = *hash;
        while !self.chain.borrow().contains(&cursor) {
            let Some(block) = self.config.fetch(cursor) else {
                log::debug!("replica {}: fetch of {:?} failed", self.id, cursor);
                return None;
            };
            if block.hash != cursor || !block.is_correct() {
                log::debug!("replica {}: fetched block with wrong hash", self.id);
                return None;
            }
            if block.parent != block.justify.block_hash {
                log::debug!(
                    "replica {}: fetched block {:?} whose parent and justify disagree",
                    self.id,
                    cursor
                );
                return None;
            }
            if !block.justify.is_genesis_qc()
                && !self.signer.verify_quorum_cert(&block.justify, quorum)
            {
                log::debug!(
                    "replica {}: fetched block {:?} with invalid justify",
                    self.id,
                    cursor
                );
                return None;
            }
            cursor = block.parent;
            missing.push(block);
        }

        // store ancestors first so the chain is connected at every step
        let mut chain = self.chain.borrow_mut();
        for block in missing.into_iter().rev() {
            chain.store(block);
        }
        chain.local_get(hash).cloned()
    }

    /// Whether `descendant` extends `ancestor` in the local block tree. Convenience for tests
    /// and tooling; the rules call [`BlockChain::extends`](crate::block_chain::BlockChain::extends)
    /// directly.
    pub fn extends(&self, descendant: &CryptoHash, ancestor: &CryptoHash) -> bool {
        self.chain.borrow().extends(descendant, ancestor)
    }
}
