/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round-robin leader rotation over the stable ordering of replica IDs.

use crate::types::{ReplicaID, ViewNumber};

use super::{LeaderRotation, RotationContext};

pub struct RoundRobin;

impl LeaderRotation for RoundRobin {
    fn leader(&self, view: ViewNumber, ctx: &RotationContext) -> ReplicaID {
        choose_round_robin(view, ctx.replicas)
    }
}

/// `leader(v) = replicas[(v - 1) mod n]`, so replica 1 leads view 1 under the usual 1-based ID
/// assignment.
pub(crate) fn choose_round_robin(view: ViewNumber, replicas: &[ReplicaID]) -> ReplicaID {
    let index = view.int().saturating_sub(1) % replicas.len() as u64;
    replicas[index as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_replicas_in_order() {
        let replicas: Vec<ReplicaID> = (1..=4).map(ReplicaID::new).collect();
        let leaders: Vec<u32> = (1..=9)
            .map(|v| choose_round_robin(ViewNumber::new(v), &replicas).int())
            .collect();
        assert_eq!(leaders, vec![1, 2, 3, 4, 1, 2, 3, 4, 1]);
    }
}
