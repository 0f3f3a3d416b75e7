/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Scenario specification and execution.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

use crate::app::{CommandSource, Executor};
use crate::block_chain::BlockChain;
use crate::configuration::KeyStore;
use crate::crypto::Keypair;
use crate::events::{Event, EventKind};
use crate::replica::{ConfigurationError, Replica, ReplicaBuilder, ReplicaConfig};
use crate::synchronizer::view_duration::FixedDuration;
use crate::types::{Block, Command, ReplicaID, ViewNumber};

use super::network::{
    install_timeout_manager, NetworkID, NodeHandle, NodeID, Partition, TwinsConfiguration,
    TwinsNetwork, ViewPlanRotation,
};

/// The leader and the partitions for a single view of a scenario.
#[derive(Clone)]
pub struct ViewSpec {
    pub leader: ReplicaID,
    pub partitions: Vec<Partition>,
}

/// An ordered view plan: entry `i` specifies view `i + 1`.
pub type Scenario = Vec<ViewSpec>;

/// Options for executing a scenario.
pub struct ScenarioOptions {
    /// Number of honest replicas. Replica IDs 1 through `num_nodes` get network IDs 1 through
    /// `num_nodes`.
    pub num_nodes: u32,
    /// Number of twinned replicas. The twin of replica `i` gets network ID `num_nodes + i`.
    pub num_twins: u32,
    /// The consensus rules variant all nodes run.
    pub consensus_variant: String,
    /// How many simulated ticks to run.
    pub ticks: u64,
    /// Ticks without a view change before a node declares its view timed out.
    pub timeout_ticks: u32,
}

impl Default for ScenarioOptions {
    fn default() -> ScenarioOptions {
        ScenarioOptions {
            num_nodes: 4,
            num_twins: 0,
            consensus_variant: "chained".to_string(),
            ticks: 30,
            timeout_ticks: 5,
        }
    }
}

/// The outcome of a scenario run.
pub struct ScenarioResult {
    /// Whether all non-twin replicas agreed on every commit index.
    pub safe: bool,
    /// The number of log positions on which the non-twin replicas agree.
    pub commits: usize,
    /// Every node's executed log.
    pub node_commits: BTreeMap<NodeID, Vec<Block>>,
}

/// The node identities of a scenario: honest replicas first, then the twins.
pub fn assign_node_ids(num_nodes: u32, num_twins: u32) -> Vec<NodeID> {
    let mut nodes: Vec<NodeID> = (1..=num_nodes)
        .map(|i| NodeID {
            replica_id: ReplicaID::new(i),
            network_id: NetworkID::new(i),
        })
        .collect();
    for i in 1..=num_twins {
        nodes.push(NodeID {
            replica_id: ReplicaID::new(i),
            network_id: NetworkID::new(num_nodes + i),
        });
    }
    nodes
}

struct SimNode {
    id: NodeID,
    replica: Replica,
    executed: Rc<RefCell<Vec<Block>>>,
}

/// Counter-backed command source shared by all nodes of a scenario, so every proposed block
/// carries a distinct command.
struct SequenceCommands {
    next: Rc<Cell<u64>>,
}

impl CommandSource for SequenceCommands {
    fn next_command(&mut self) -> Option<Command> {
        let value = self.next.get();
        self.next.set(value + 1);
        Some(Command::new(value.to_le_bytes().to_vec()))
    }

    fn accept(&mut self, _command: &Command) -> bool {
        true
    }

    fn proposed(&mut self, _command: &Command) {}
}

/// Records executed blocks for the post-run safety check.
struct RecordingExecutor {
    executed: Rc<RefCell<Vec<Block>>>,
}

impl Executor for RecordingExecutor {
    fn exec(&mut self, block: &Block) {
        self.executed.borrow_mut().push(block.clone());
    }
}

/// The signing key of a replica: deterministic in the replica ID, and shared by its twins.
fn scenario_signing_key(id: ReplicaID) -> SigningKey {
    let mut seed_input = b"twins replica key ".to_vec();
    seed_input.extend_from_slice(&id.int().to_le_bytes());
    let seed: [u8; 32] = Sha256::digest(&seed_input).into();
    SigningKey::from_bytes(&seed)
}

/// Execute a twins scenario: build the nodes, run the deliver-and-drain loop for the configured
/// number of ticks, then check commit agreement across the non-twin replicas.
///
/// Proposals, votes and fetches are droppable between partitions; timeout and new-view messages
/// always go through, which keeps liveness modellable while the partitions attack safety.
pub fn execute_scenario(
    scenario: Scenario,
    options: ScenarioOptions,
) -> Result<ScenarioResult, ConfigurationError> {
    let drop_kinds: BTreeSet<EventKind> =
        [EventKind::Propose, EventKind::Vote, EventKind::Fetch]
            .into_iter()
            .collect();
    let network = Rc::new(RefCell::new(TwinsNetwork::new(
        scenario.clone(),
        drop_kinds,
    )));

    let mut keys = KeyStore::new();
    for i in 1..=options.num_nodes {
        let id = ReplicaID::new(i);
        keys.insert(id, Keypair::new(scenario_signing_key(id)).public());
    }
    let keys = Rc::new(keys);

    let leaders: Vec<ReplicaID> = scenario.iter().map(|view| view.leader).collect();
    let command_counter = Rc::new(Cell::new(0u64));

    let mut nodes = Vec::new();
    for node_id in assign_node_ids(options.num_nodes, options.num_twins) {
        let chain = Rc::new(RefCell::new(BlockChain::new()));
        let published_view = Rc::new(Cell::new(ViewNumber::new(1)));
        let effective_view = Rc::new(Cell::new(ViewNumber::new(1)));
        network.borrow_mut().register_node(NodeHandle {
            id: node_id,
            chain: chain.clone(),
            published_view: published_view.clone(),
            effective_view: effective_view.clone(),
        });

        let configuration = TwinsConfiguration::new(
            network.clone(),
            node_id,
            keys.clone(),
            published_view.clone(),
        );
        let executed = Rc::new(RefCell::new(Vec::new()));

        let mut config =
            ReplicaConfig::new(node_id.replica_id, scenario_signing_key(node_id.replica_id));
        config.consensus_variant = options.consensus_variant.clone();

        let mut replica = ReplicaBuilder::new(
            config,
            keys.clone(),
            Box::new(configuration),
            Box::new(SequenceCommands {
                next: command_counter.clone(),
            }),
            Box::new(RecordingExecutor {
                executed: executed.clone(),
            }),
        )
        .with_chain(chain)
        // the simulated clock drives timeouts; the wall-clock deadline stays out of reach
        .with_view_duration(Box::new(FixedDuration::new(Duration::from_secs(3600))))
        .with_leader_rotation(Box::new(ViewPlanRotation::new(leaders.clone())))
        .log_events(true)
        .build()?;

        install_timeout_manager(
            &mut replica,
            node_id,
            published_view,
            effective_view,
            options.timeout_ticks,
        );

        nodes.push(SimNode {
            id: node_id,
            replica,
            executed,
        });
    }

    for _ in 0..options.ticks {
        // deliver everything queued during the previous tick
        let pending = network.borrow_mut().take_pending();
        for message in pending {
            if let Some(node) = nodes
                .iter_mut()
                .find(|node| node.id.network_id == message.receiver)
            {
                node.replica.enqueue(message.event);
            }
        }

        // one tick per node, each drained to empty, in ascending network order
        for node in nodes.iter_mut() {
            node.replica.enqueue(Event::Tick);
            node.replica.drain();
        }
    }

    let (safe, commits) = check_commits(&nodes);
    let node_commits = nodes
        .iter()
        .map(|node| (node.id, node.executed.borrow().clone()))
        .collect();

    Ok(ScenarioResult {
        safe,
        commits,
        node_commits,
    })
}

/// Walk the executed logs of all non-twin replicas in parallel: the block hashes committed at
/// each position must form a singleton set (replicas that have not reached a position yet are
/// skipped).
fn check_commits(nodes: &[SimNode]) -> (bool, usize) {
    let mut twin_replicas: BTreeMap<ReplicaID, u32> = BTreeMap::new();
    for node in nodes {
        *twin_replicas.entry(node.id.replica_id).or_default() += 1;
    }

    let mut index = 0;
    loop {
        let mut hashes: BTreeSet<[u8; 32]> = BTreeSet::new();
        let mut any = false;
        for node in nodes {
            if twin_replicas[&node.id.replica_id] != 1 {
                continue;
            }
            let executed = node.executed.borrow();
            if let Some(block) = executed.get(index) {
                hashes.insert(block.hash.bytes());
                any = true;
            }
        }
        if !any {
            break;
        }
        if hashes.len() != 1 {
            return (false, index);
        }
        index += 1;
    }
    (true, index)
}
