/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Carousel: reputation-based leader rotation.
//!
//! The carousel picks leaders from the replicas that demonstrably participated in the latest
//! commit (the participants of the commit head's certificate), excluding the proposers of the
//! last `f` blocks so that a slow or silent replica is not handed the leader seat again
//! immediately. When there is no commit yet, or the commit head is not exactly `chain_length`
//! views behind the current view (meaning progress is not in lockstep), it falls back to
//! round-robin.
//!
//! Selection among the candidates is random but reproducible: the RNG is seeded from the commit
//! head hash and the view, so every replica and every simulation re-run picks the same leader.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::configuration::num_faulty;
use crate::types::{ReplicaID, ViewNumber};

use super::round_robin::choose_round_robin;
use super::{LeaderRotation, RotationContext};

pub struct Carousel;

impl LeaderRotation for Carousel {
    fn leader(&self, view: ViewNumber, ctx: &RotationContext) -> ReplicaID {
        let Some(commit_head) = ctx.chain.local_get(&ctx.committed) else {
            return choose_round_robin(view, ctx.replicas);
        };

        if commit_head.justify.is_genesis_qc() {
            log::debug!("carousel: in startup; using round-robin");
            return choose_round_robin(view, ctx.replicas);
        }

        if view.int() < ctx.chain_length
            || commit_head.view != ViewNumber::new(view.int() - ctx.chain_length)
        {
            log::debug!(
                "carousel: fallback to round-robin (view={}, commit_head={})",
                view,
                commit_head.view
            );
            return choose_round_robin(view, ctx.replicas);
        }

        // the proposers of the last f blocks sit this view out
        let f = num_faulty(ctx.replicas.len());
        let mut last_authors = Vec::new();
        let mut block = commit_head;
        for _ in 0..f {
            if block.view == ViewNumber::init() {
                break;
            }
            last_authors.push(block.proposer);
            match ctx.chain.local_get(&block.parent) {
                Some(parent) => block = parent,
                None => break,
            }
        }

        let candidates: Vec<ReplicaID> = commit_head
            .justify
            .signature
            .participants()
            .filter(|id| !last_authors.contains(id))
            .copied()
            .collect();
        if candidates.is_empty() {
            return choose_round_robin(view, ctx.replicas);
        }

        let mut seed_input = Vec::with_capacity(40);
        seed_input.extend_from_slice(&commit_head.hash.bytes());
        seed_input.extend_from_slice(&view.to_le_bytes());
        let seed: [u8; 32] = Sha256::digest(&seed_input).into();
        let mut rng = ChaCha8Rng::from_seed(seed);

        let leader = candidates[rng.gen_range(0..candidates.len())];
        log::debug!("carousel: chose id {}", leader);
        leader
    }
}
