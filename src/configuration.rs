/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Configuration`] trait: the set of peer replicas and the operations for reaching them.
//!
//! The consensus core depends only on this surface. The real transport (a streaming quorum-call
//! RPC framework) and the [twins simulator](crate::twins) both implement it; the core cannot tell
//! them apart. Send operations never block and give no delivery guarantee; the core is built to
//! tolerate lost and reordered messages, with view timeouts as the sole liveness mechanism.
//! [`fetch`](Configuration::fetch) is the one blocking call: a quorum call answered by any peer
//! that holds the requested block, returning `None` only once the transport gives up.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::VerifyingKey;

use crate::messages::{NewViewMessage, ProposeMessage, TimeoutMessage, VoteMessage};
use crate::types::{Block, CryptoHash, ReplicaID, ViewNumber};

/// The number of Byzantine faults tolerable among `n` replicas: `f = (n - 1) / 3`.
pub const fn num_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// The number of matching signatures constituting agreement among `n` replicas: `q = n - f`.
pub const fn quorum_size(n: usize) -> usize {
    n - num_faulty(n)
}

/// Maps replica IDs to the public keys they authenticate with. Shared between the configuration
/// and the crypto primitive, which verifies inbound signatures against it.
#[derive(Clone, Default)]
pub struct KeyStore {
    keys: BTreeMap<ReplicaID, VerifyingKey>,
}

impl KeyStore {
    pub fn new() -> KeyStore {
        KeyStore::default()
    }

    pub fn insert(&mut self, id: ReplicaID, key: VerifyingKey) {
        self.keys.insert(id, key);
    }

    pub fn get(&self, id: &ReplicaID) -> Option<&VerifyingKey> {
        self.keys.get(id)
    }

    pub fn contains(&self, id: &ReplicaID) -> bool {
        self.keys.contains_key(id)
    }

    /// The registered replica IDs in ascending order.
    pub fn ids(&self) -> Vec<ReplicaID> {
        self.keys.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The set of peer replicas and the send operations the core needs from the transport.
pub trait Configuration {
    /// The number of replicas in the configuration.
    fn len(&self) -> usize;

    /// The quorum size of the configuration.
    fn quorum_size(&self) -> usize {
        quorum_size(self.len())
    }

    /// The IDs of all replicas, in ascending order.
    fn replicas(&self) -> Vec<ReplicaID>;

    /// The public key registered for `id`.
    fn public_key(&self, id: ReplicaID) -> Option<VerifyingKey>;

    /// A configuration restricted to `ids`: broadcasts through it reach only those replicas.
    fn sub_config(&self, ids: BTreeSet<ReplicaID>) -> Box<dyn Configuration>;

    /// Broadcast a proposal to all peers.
    fn propose(&mut self, msg: ProposeMessage);

    /// Broadcast a timeout message to all peers.
    fn timeout(&mut self, msg: TimeoutMessage);

    /// Send a vote to `to`.
    fn vote(&mut self, to: ReplicaID, msg: VoteMessage);

    /// Send a new-view message to `to`.
    fn new_view(&mut self, to: ReplicaID, msg: NewViewMessage);

    /// Request the block named `hash` from the configuration: a quorum call satisfied by the
    /// first peer holding it.
    fn fetch(&mut self, hash: CryptoHash) -> Option<Block>;

    /// Notification that the local replica entered `view`. Transports that route on the sender's
    /// view (the twins simulator) track it here; the default does nothing.
    fn view_entered(&mut self, _view: ViewNumber) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_sizes_match_the_bft_bound() {
        // (n, f, q)
        let cases = [(1, 0, 1), (3, 0, 3), (4, 1, 3), (7, 2, 5), (10, 3, 7)];
        for (n, f, q) in cases {
            assert_eq!(num_faulty(n), f);
            assert_eq!(quorum_size(n), q);
        }
    }
}
