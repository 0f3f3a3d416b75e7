/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Twins scenarios: an equivocating replica (one ID, two network nodes, one signing key) under
//! partition schedules chosen to tempt the protocol into committing two different blocks at the
//! same log position. Every scenario must come back safe.

mod common;

use chained_smr::twins::{execute_scenario, ScenarioOptions};
use log::LevelFilter;

use common::{logging::setup_logger, view};

#[test]
fn twin_leader_across_flipping_partitions_is_safe() {
    setup_logger(LevelFilter::Info);

    // replica 1 is twinned: node 1 and node 5 share its ID and key. Both lead views 1 and 2,
    // each seeing a different side of the partition.
    let scenario = vec![
        view(1, &[&[1, 2, 3], &[5, 4]]),
        view(1, &[&[5, 2, 3], &[1, 4]]),
    ];

    let result = execute_scenario(
        scenario,
        ScenarioOptions {
            num_twins: 1,
            ticks: 15,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe, "conflicting commits at position {}", result.commits);
}

#[test]
fn twin_leader_with_quorum_on_both_sides_over_time_is_safe() {
    setup_logger(LevelFilter::Info);

    // the twin keeps the leader seat while the partition alternates which of its halves holds a
    // quorum; later views hand leadership to untwinned replicas with the network whole.
    let scenario = vec![
        view(1, &[&[1, 2, 3], &[5, 4]]),
        view(1, &[&[5, 2, 4], &[1, 3]]),
        view(2, &[&[1, 2, 3, 4], &[5]]),
        view(3, &[&[1, 2, 3, 4], &[5]]),
        view(4, &[&[1, 2, 3, 4], &[5]]),
        view(2, &[&[1, 2, 3, 4], &[5]]),
        view(3, &[&[1, 2, 3, 4], &[5]]),
    ];

    let result = execute_scenario(
        scenario,
        ScenarioOptions {
            num_twins: 1,
            ticks: 25,
            ..ScenarioOptions::default()
        },
    )
    .unwrap();

    assert!(result.safe, "conflicting commits at position {}", result.commits);
}
