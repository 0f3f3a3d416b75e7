/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The simulated partitioned network.
//!
//! Message survival is decided at *send* time, from the sender's effective view: the maximum of
//! the view its synchronizer has entered and any view it has locally advanced to by timing out.
//! That view indexes into the scenario's partition plan. If sender and receiver share a partition
//! in that view the message is delivered; otherwise it is dropped iff its kind is in the drop
//! set. Views beyond the end of the plan drop everything.
//!
//! Surviving messages are queued in the shared network and delivered at the start of the next
//! simulated tick, which is what makes the whole run a deterministic serialization.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use ed25519_dalek::VerifyingKey;

use crate::block_chain::SharedBlockChain;
use crate::configuration::{Configuration, KeyStore};
use crate::events::{Event, EventKind, TimeoutElapsedEvent};
use crate::leader_rotation::round_robin::choose_round_robin;
use crate::leader_rotation::{LeaderRotation, RotationContext};
use crate::messages::{NewViewMessage, ProposeMessage, TimeoutMessage, VoteMessage};
use crate::replica::Replica;
use crate::types::{Block, CryptoHash, ReplicaID, ViewNumber};

use super::scenario::ViewSpec;

/// Identifies a node on the simulated network. Distinct from [`ReplicaID`] because twins share a
/// replica ID but are distinct network endpoints.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NetworkID(u32);

impl NetworkID {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for NetworkID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// A node's full identity: the replica it participates in consensus as, and its unique network
/// endpoint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeID {
    pub replica_id: ReplicaID,
    pub network_id: NetworkID,
}

impl Display for NodeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "r{}n{}", self.replica_id, self.network_id)
    }
}

/// A set of network endpoints that can reach each other during a view.
pub type Partition = BTreeSet<NetworkID>;

pub(crate) struct NodeHandle {
    pub(crate) id: NodeID,
    pub(crate) chain: SharedBlockChain,
    pub(crate) published_view: Rc<Cell<ViewNumber>>,
    pub(crate) effective_view: Rc<Cell<ViewNumber>>,
}

pub(crate) struct PendingMessage {
    pub(crate) receiver: NetworkID,
    pub(crate) event: Event,
}

/// The shared state of a simulated network: its nodes, the view plan, the drop set, and the
/// messages in flight.
pub struct TwinsNetwork {
    pub(crate) nodes: BTreeMap<NetworkID, NodeHandle>,
    pub(crate) replicas: BTreeMap<ReplicaID, Vec<NetworkID>>,
    views: Vec<ViewSpec>,
    drop_kinds: BTreeSet<EventKind>,
    pending: Vec<PendingMessage>,
}

impl TwinsNetwork {
    pub(crate) fn new(views: Vec<ViewSpec>, drop_kinds: BTreeSet<EventKind>) -> TwinsNetwork {
        TwinsNetwork {
            nodes: BTreeMap::new(),
            replicas: BTreeMap::new(),
            views,
            drop_kinds,
            pending: Vec::new(),
        }
    }

    pub(crate) fn register_node(&mut self, handle: NodeHandle) {
        self.replicas
            .entry(handle.id.replica_id)
            .or_default()
            .push(handle.id.network_id);
        self.nodes.insert(handle.id.network_id, handle);
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PendingMessage> {
        std::mem::take(&mut self.pending)
    }

    /// Decide if a message from `sender` to `receiver` survives, based on the sender's effective
    /// view and the partitions configured for it.
    pub(crate) fn should_drop(
        &self,
        sender: NetworkID,
        receiver: NetworkID,
        kind: EventKind,
    ) -> bool {
        let Some(node) = self.nodes.get(&sender) else {
            return true;
        };
        let effective = node.published_view.get().max(node.effective_view.get());
        if effective.int() == 0 {
            return false;
        }
        let index = (effective.int() - 1) as usize;
        // views without a specified partition plan drop all messages
        if index >= self.views.len() {
            return true;
        }
        for partition in &self.views[index].partitions {
            if partition.contains(&sender) && partition.contains(&receiver) {
                return false;
            }
        }
        self.drop_kinds.contains(&kind)
    }

    /// Queue `event` for every node of replica `to`, subject to the drop rule.
    fn send(&mut self, sender: NetworkID, to: ReplicaID, kind: EventKind, event: Event) {
        let sender_id = self.nodes[&sender].id;
        let receivers = match self.replicas.get(&to) {
            Some(receivers) => receivers.clone(),
            None => panic!("attempt to send a message to replica {}, which does not exist", to),
        };
        for receiver in receivers {
            let receiver_id = self.nodes[&receiver].id;
            if self.should_drop(sender, receiver, kind) {
                log::info!("node {} -> node {}: DROP {:?}", sender_id, receiver_id, kind);
                continue;
            }
            log::info!("node {} -> node {}: SEND {:?}", sender_id, receiver_id, kind);
            self.pending.push(PendingMessage {
                receiver,
                event: event.clone(),
            });
        }
    }
}

/// Per-node [`Configuration`] over the shared network.
#[derive(Clone)]
pub(crate) struct TwinsConfiguration {
    network: Rc<RefCell<TwinsNetwork>>,
    node: NodeID,
    keys: Rc<KeyStore>,
    published_view: Rc<Cell<ViewNumber>>,
    sub: Option<BTreeSet<ReplicaID>>,
}

impl TwinsConfiguration {
    pub(crate) fn new(
        network: Rc<RefCell<TwinsNetwork>>,
        node: NodeID,
        keys: Rc<KeyStore>,
        published_view: Rc<Cell<ViewNumber>>,
    ) -> TwinsConfiguration {
        TwinsConfiguration {
            network,
            node,
            keys,
            published_view,
            sub: None,
        }
    }

    fn broadcast(&mut self, kind: EventKind, event: Event) {
        let mut network = self.network.borrow_mut();
        let replica_ids: Vec<ReplicaID> = network.replicas.keys().copied().collect();
        for id in replica_ids {
            // no messages to self or twin
            if id == self.node.replica_id {
                continue;
            }
            if let Some(sub) = &self.sub {
                if !sub.contains(&id) {
                    continue;
                }
            }
            network.send(self.node.network_id, id, kind, event.clone());
        }
    }

    fn send(&mut self, to: ReplicaID, kind: EventKind, event: Event) {
        self.network
            .borrow_mut()
            .send(self.node.network_id, to, kind, event);
    }
}

impl Configuration for TwinsConfiguration {
    fn len(&self) -> usize {
        self.network.borrow().replicas.len()
    }

    fn replicas(&self) -> Vec<ReplicaID> {
        self.network.borrow().replicas.keys().copied().collect()
    }

    fn public_key(&self, id: ReplicaID) -> Option<VerifyingKey> {
        self.keys.get(&id).copied()
    }

    fn sub_config(&self, ids: BTreeSet<ReplicaID>) -> Box<dyn Configuration> {
        let mut sub = self.clone();
        sub.sub = Some(ids);
        Box::new(sub)
    }

    fn propose(&mut self, msg: ProposeMessage) {
        self.broadcast(EventKind::Propose, Event::Propose(msg));
    }

    fn timeout(&mut self, msg: TimeoutMessage) {
        self.broadcast(EventKind::Timeout, Event::Timeout(msg));
    }

    fn vote(&mut self, to: ReplicaID, msg: VoteMessage) {
        self.send(to, EventKind::Vote, Event::Vote(msg));
    }

    fn new_view(&mut self, to: ReplicaID, msg: NewViewMessage) {
        self.send(to, EventKind::NewView, Event::NewView(msg));
    }

    /// A fetch asks every node that the drop rule lets us reach, in ascending network order, and
    /// takes the first answer.
    fn fetch(&mut self, hash: CryptoHash) -> Option<Block> {
        let reachable: Vec<SharedBlockChain> = {
            let network = self.network.borrow();
            network
                .nodes
                .iter()
                .filter(|(network_id, _)| {
                    !network.should_drop(self.node.network_id, **network_id, EventKind::Fetch)
                })
                .map(|(_, handle)| handle.chain.clone())
                .collect()
        };
        for chain in reachable {
            let Ok(chain) = chain.try_borrow() else {
                continue;
            };
            if let Some(block) = chain.local_get(&hash) {
                return Some(block.clone());
            }
        }
        None
    }

    fn view_entered(&mut self, view: ViewNumber) {
        self.published_view.set(view);
    }
}

/// Leader rotation that reads the scenario's view plan, falling back to round-robin for views
/// beyond it.
pub(crate) struct ViewPlanRotation {
    leaders: Vec<ReplicaID>,
}

impl ViewPlanRotation {
    pub(crate) fn new(leaders: Vec<ReplicaID>) -> ViewPlanRotation {
        ViewPlanRotation { leaders }
    }
}

impl LeaderRotation for ViewPlanRotation {
    fn leader(&self, view: ViewNumber, ctx: &RotationContext) -> ReplicaID {
        let index = view.int().saturating_sub(1) as usize;
        match self.leaders.get(index) {
            Some(leader) => *leader,
            None => choose_round_robin(view, ctx.replicas),
        }
    }
}

/// Install the simulated view timer on a node: after `timeout_ticks` ticks without a view
/// change, the node's current view is declared timed out and its effective view advances so the
/// partition plan sees the failed view.
pub(crate) fn install_timeout_manager(
    replica: &mut Replica,
    node: NodeID,
    published_view: Rc<Cell<ViewNumber>>,
    effective_view: Rc<Cell<ViewNumber>>,
    timeout_ticks: u32,
) {
    let countdown = Rc::new(Cell::new(timeout_ticks));

    let tick_countdown = countdown.clone();
    replica.register_observer(
        EventKind::Tick,
        Box::new(move |_, sink| {
            let left = tick_countdown.get().saturating_sub(1);
            tick_countdown.set(left);
            if left == 0 {
                tick_countdown.set(timeout_ticks);
                let view = published_view.get();
                sink.add_event(Event::TimeoutElapsed(TimeoutElapsedEvent { view }));
                if effective_view.get() <= view {
                    effective_view.set(view.next());
                    log::info!(
                        "node {} effective view is {} due to timeout",
                        node,
                        view.next()
                    );
                }
            }
        }),
    );

    let change_countdown = countdown;
    replica.register_observer(
        EventKind::ViewChange,
        Box::new(move |event, _| {
            if let Event::ViewChange(e) = event {
                change_countdown.set(timeout_ticks);
                if e.timeout {
                    log::info!("node {} entered view {} after timeout", node, e.view);
                } else {
                    log::info!("node {} entered view {} after voting", node, e.view);
                }
            }
        }),
    );
}
