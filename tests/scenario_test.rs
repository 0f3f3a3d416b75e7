/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! End-to-end scenarios on the twins simulator with no twins: liveness under a fault-free
//! network, recovery from a silent leader, and catch-up of a replica that was partitioned away.

mod common;

use chained_smr::twins::{execute_scenario, NetworkID, NodeID, Scenario, ScenarioOptions};
use chained_smr::types::ReplicaID;
use log::LevelFilter;

use common::{logging::setup_logger, view};

/// Round-robin leaders over a fully connected network of four nodes.
fn fault_free_scenario(views: u64) -> Scenario {
    (1..=views)
        .map(|v| view(((v - 1) % 4 + 1) as u32, &[&[1, 2, 3, 4]]))
        .collect()
}

#[test]
fn basic_liveness() {
    setup_logger(LevelFilter::Info);

    let result = execute_scenario(
        fault_free_scenario(16),
        ScenarioOptions {
            ticks: 30,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe);
    assert!(result.commits >= 1, "no block was committed");
    for (node, blocks) in &result.node_commits {
        assert!(
            !blocks.is_empty(),
            "node {} committed nothing within the tick budget",
            node
        );
    }
}

#[test]
fn leader_timeout_recovers_in_the_next_view() {
    setup_logger(LevelFilter::Info);

    // view 1: the leader is cut off from everyone else, so its proposal and the votes for it die;
    // from view 2 on, the network is whole and replica 2 leads.
    let mut scenario = vec![view(1, &[&[1], &[2, 3, 4]])];
    scenario.extend((2..=12).map(|v| view(((v - 1) % 4 + 1) as u32, &[&[1, 2, 3, 4]])));

    let result = execute_scenario(
        scenario,
        ScenarioOptions {
            ticks: 25,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe);
    assert!(result.commits >= 1, "no block was committed after the view change");
    for (node, blocks) in &result.node_commits {
        let first = blocks
            .first()
            .unwrap_or_else(|| panic!("node {} committed nothing", node));
        assert_eq!(
            first.view.int(),
            2,
            "node {} committed a block from view {}, expected the view-2 block",
            node,
            first.view
        );
    }
}

#[test]
fn fast_variant_attaches_an_aggregate_qc_after_a_timeout() {
    setup_logger(LevelFilter::Info);

    // same silent-leader start as above, but under the two-chain rules: the view-2 proposal must
    // carry an aggregate QC proving the highest certificate the quorum knew, and commits need
    // only two contiguous certified views.
    let mut scenario = vec![view(1, &[&[1], &[2, 3, 4]])];
    scenario.extend((2..=12).map(|v| view(((v - 1) % 4 + 1) as u32, &[&[1, 2, 3, 4]])));

    let result = execute_scenario(
        scenario,
        ScenarioOptions {
            consensus_variant: "fast".to_string(),
            ticks: 25,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe);
    assert!(result.commits >= 1, "no block was committed under the fast rules");
    for blocks in result.node_commits.values() {
        assert_eq!(blocks.first().unwrap().view.int(), 2);
    }
}

#[test]
fn partitioned_replica_fetches_missed_blocks_and_catches_up() {
    setup_logger(LevelFilter::Info);

    // replica 4 is alone for views 1-3 while the other three make progress, then the partition
    // heals. Leadership stays with replicas 1-3 so the straggler only has to follow.
    let mut scenario: Scenario = (1..=3)
        .map(|v| view(v as u32, &[&[1, 2, 3], &[4]]))
        .collect();
    scenario.extend((4..=14).map(|v| view(((v - 1) % 3 + 1) as u32, &[&[1, 2, 3, 4]])));

    let result = execute_scenario(
        scenario,
        ScenarioOptions {
            ticks: 30,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe);

    let straggler = NodeID {
        replica_id: ReplicaID::new(4),
        network_id: NetworkID::new(4),
    };
    let blocks = &result.node_commits[&straggler];
    assert!(
        blocks.len() >= 3,
        "the straggler only committed {} blocks",
        blocks.len()
    );
    let highest = blocks.last().unwrap();
    assert!(
        highest.view.int() >= 3,
        "the straggler's executed head is still at view {}",
        highest.view
    );
}
