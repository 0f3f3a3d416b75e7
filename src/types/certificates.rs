/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Certificates: evidence that a quorum of replicas supports a given decision.
//!
//! A [`QuorumCertificate`] proves that a quorum voted for a block in a view. A
//! [`TimeoutCertificate`] proves that a quorum gave up on a view. An [`AggregateQC`] bundles the
//! highest quorum certificates known to a quorum of replicas, and is attached to the first
//! proposal after a timeout by rule variants that need it. [`SyncInfo`] is the evidence bundle
//! that travels with view changes.
//!
//! All certificate signatures are [`MultiSignature`]s: ordered maps from replica ID to an
//! individual signature. The canonical bytes that each kind of certificate signs over are defined
//! by the `message_bytes` methods in this module, and are always the borsh serialization of a
//! tuple of the certificate's identifying fields.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{CryptoHash, ReplicaID, SignatureBytes, ViewNumber};

/// An ordered set of individual signatures, keyed by the signing replica's ID.
///
/// This is the crate's quorum signature representation: every participant contributes one
/// signature over the same (or, for batch-verified certificates, its own) canonical message.
/// Iteration is always in ascending ID order, which makes every serialization of a
/// `MultiSignature` canonical.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MultiSignature(BTreeMap<ReplicaID, SignatureBytes>);

impl MultiSignature {
    /// Create an empty `MultiSignature`.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Create a `MultiSignature` with a single participant.
    pub fn single(signer: ReplicaID, signature: SignatureBytes) -> Self {
        let mut map = BTreeMap::new();
        map.insert(signer, signature);
        Self(map)
    }

    /// Insert `signature` for `signer`. Returns false if the signer was already present, in which
    /// case the signature is left unchanged.
    pub fn insert(&mut self, signer: ReplicaID, signature: SignatureBytes) -> bool {
        if self.0.contains_key(&signer) {
            return false;
        }
        self.0.insert(signer, signature);
        true
    }

    /// Get the signature contributed by `signer`, if any.
    pub fn get(&self, signer: &ReplicaID) -> Option<&SignatureBytes> {
        self.0.get(signer)
    }

    /// Check whether `signer` contributed a signature.
    pub fn contains(&self, signer: &ReplicaID) -> bool {
        self.0.contains_key(signer)
    }

    /// Iterate over the participants of this `MultiSignature` in ascending ID order.
    pub fn participants(&self) -> impl Iterator<Item = &ReplicaID> {
        self.0.keys()
    }

    /// Iterate over `(signer, signature)` pairs in ascending ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaID, &SignatureBytes)> {
        self.0.iter()
    }

    /// Get how many participants contributed to this `MultiSignature`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether this `MultiSignature` has no participants.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the canonical byte representation of this `MultiSignature`: the concatenation of
    /// `(id, signature)` pairs in ascending ID order. Used as part of cache keys.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() * (4 + 64));
        for (id, sig) in &self.0 {
            bytes.extend_from_slice(&id.int().to_le_bytes());
            bytes.extend_from_slice(&sig.bytes());
        }
        bytes
    }
}

/// A single replica's vote for a block: a [`MultiSignature`] with exactly one participant over the
/// canonical tuple `(block_hash, view)`.
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PartialCertificate {
    pub block_hash: CryptoHash,
    pub view: ViewNumber,
    pub signature: MultiSignature,
}

impl PartialCertificate {
    /// The canonical bytes that the signature of this certificate is over.
    pub fn message_bytes(&self) -> Vec<u8> {
        certificate_message_bytes(&self.block_hash, self.view)
    }
}

/// Proof that at least a quorum of replicas voted for a given block in a given view.
///
/// A `QuorumCertificate` is *valid* iff its multi-signature verifies over the canonical tuple
/// `(block_hash, view)` under the configuration's public keys, and its participant set has size at
/// least the quorum size. Validity is checked by
/// [`Signer::verify_quorum_cert`](crate::crypto::Signer::verify_quorum_cert); the rule layer only
/// ever sees certificates that passed it.
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct QuorumCertificate {
    pub block_hash: CryptoHash,
    pub view: ViewNumber,
    pub signature: MultiSignature,
}

impl QuorumCertificate {
    /// Get the quorum certificate for the genesis block: view 0, no signatures.
    pub fn genesis_qc(genesis_hash: CryptoHash) -> QuorumCertificate {
        QuorumCertificate {
            block_hash: genesis_hash,
            view: ViewNumber::init(),
            signature: MultiSignature::new(),
        }
    }

    /// Check whether this is a genesis quorum certificate. Genesis certificates are
    /// self-evidently correct and carry no signatures.
    pub fn is_genesis_qc(&self) -> bool {
        self.view == ViewNumber::init() && self.signature.is_empty()
    }

    /// The canonical bytes that the signatures of this certificate are over.
    pub fn message_bytes(&self) -> Vec<u8> {
        certificate_message_bytes(&self.block_hash, self.view)
    }
}

/// Proof that at least a quorum of replicas timed out in the same view.
///
/// Each participant's signature is over `(view, high_view)` where `high_view` is the view of the
/// highest quorum certificate that participant knew when it timed out. Because the signed message
/// differs per signer, a `TimeoutCertificate` records the per-signer high views and is verified
/// with a batch verification over the per-signer messages.
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TimeoutCertificate {
    pub view: ViewNumber,
    pub high_views: BTreeMap<ReplicaID, ViewNumber>,
    pub signature: MultiSignature,
}

impl TimeoutCertificate {
    /// The canonical bytes signed by `signer`, if the signer participated.
    pub fn message_bytes(&self, signer: &ReplicaID) -> Option<Vec<u8>> {
        let high_view = self.high_views.get(signer)?;
        Some(timeout_message_bytes(self.view, *high_view))
    }
}

/// The highest quorum certificates known to a quorum of replicas when they timed out, proven by a
/// multi-signature over the per-signer tuples `(view, qc.view)`.
///
/// The value of an `AggregateQC` to its verifier is the highest certificate it contains: the first
/// proposal after a timeout must justify its block with that certificate under rule variants that
/// use aggregation.
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct AggregateQC {
    pub view: ViewNumber,
    pub qcs: BTreeMap<ReplicaID, QuorumCertificate>,
    pub signature: MultiSignature,
}

impl AggregateQC {
    /// Get the highest-viewed quorum certificate in this aggregate, if the aggregate is nonempty.
    pub fn high_qc(&self) -> Option<&QuorumCertificate> {
        self.qcs.values().max_by_key(|qc| qc.view)
    }
}

/// The evidence bundle accompanying view changes: the highest known quorum certificate, and
/// optionally a timeout certificate or an aggregated QC.
#[derive(Clone, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SyncInfo {
    pub qc: Option<QuorumCertificate>,
    pub tc: Option<TimeoutCertificate>,
    pub agg_qc: Option<AggregateQC>,
}

impl SyncInfo {
    /// Create an empty `SyncInfo`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a quorum certificate.
    pub fn with_qc(mut self, qc: QuorumCertificate) -> Self {
        self.qc = Some(qc);
        self
    }

    /// Attach a timeout certificate.
    pub fn with_tc(mut self, tc: TimeoutCertificate) -> Self {
        self.tc = Some(tc);
        self
    }

    /// Attach an aggregated QC.
    pub fn with_agg_qc(mut self, agg_qc: AggregateQC) -> Self {
        self.agg_qc = Some(agg_qc);
        self
    }

    /// The view of the highest quorum certificate carried in this bundle, whether directly or
    /// inside the aggregate. 0 if the bundle carries none.
    pub fn high_qc_view(&self) -> ViewNumber {
        let direct = self.qc.as_ref().map(|qc| qc.view);
        let aggregated = self
            .agg_qc
            .as_ref()
            .and_then(|agg| agg.high_qc())
            .map(|qc| qc.view);
        direct.max(aggregated).unwrap_or(ViewNumber::init())
    }
}

/// The canonical bytes that votes and quorum certificates sign over: the borsh serialization of
/// `(block_hash, view)`.
pub(crate) fn certificate_message_bytes(block_hash: &CryptoHash, view: ViewNumber) -> Vec<u8> {
    (block_hash, view)
        .try_to_vec()
        .expect("serializing a (hash, view) tuple is infallible")
}

/// The canonical bytes that timeout messages sign over: the borsh serialization of
/// `(view, high_qc_view)`.
pub(crate) fn timeout_message_bytes(view: ViewNumber, high_qc_view: ViewNumber) -> Vec<u8> {
    (view, high_qc_view)
        .try_to_vec()
        .expect("serializing a (view, view) tuple is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_signature_orders_participants_ascending() {
        let mut sig = MultiSignature::new();
        assert!(sig.insert(ReplicaID::new(3), SignatureBytes::new([3u8; 64])));
        assert!(sig.insert(ReplicaID::new(1), SignatureBytes::new([1u8; 64])));
        assert!(sig.insert(ReplicaID::new(2), SignatureBytes::new([2u8; 64])));
        assert!(!sig.insert(ReplicaID::new(1), SignatureBytes::new([9u8; 64])));

        let ids: Vec<u32> = sig.participants().map(|id| id.int()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // the first signer's signature survives the duplicate insert
        assert_eq!(
            sig.get(&ReplicaID::new(1)).unwrap().bytes(),
            [1u8; 64]
        );
    }

    #[test]
    fn sync_info_high_qc_view_prefers_the_highest_source() {
        let qc = QuorumCertificate {
            block_hash: CryptoHash::zero(),
            view: ViewNumber::new(4),
            signature: MultiSignature::new(),
        };
        let high = QuorumCertificate {
            block_hash: CryptoHash::zero(),
            view: ViewNumber::new(7),
            signature: MultiSignature::new(),
        };
        let mut qcs = BTreeMap::new();
        qcs.insert(ReplicaID::new(1), high);
        let agg = AggregateQC {
            view: ViewNumber::new(8),
            qcs,
            signature: MultiSignature::new(),
        };

        assert_eq!(SyncInfo::new().high_qc_view(), ViewNumber::init());
        assert_eq!(
            SyncInfo::new().with_qc(qc.clone()).high_qc_view(),
            ViewNumber::new(4)
        );
        assert_eq!(
            SyncInfo::new().with_qc(qc).with_agg_qc(agg).high_qc_view(),
            ViewNumber::new(7)
        );
    }

    #[test]
    fn certificates_round_trip_through_borsh() {
        let qc = QuorumCertificate {
            block_hash: CryptoHash::new([7u8; 32]),
            view: ViewNumber::new(42),
            signature: MultiSignature::single(ReplicaID::new(2), SignatureBytes::new([5u8; 64])),
        };
        let bytes = qc.try_to_vec().unwrap();
        let decoded = QuorumCertificate::deserialize(&mut bytes.as_slice()).unwrap();
        assert!(decoded == qc);

        let mut high_views = BTreeMap::new();
        high_views.insert(ReplicaID::new(1), ViewNumber::new(3));
        let tc = TimeoutCertificate {
            view: ViewNumber::new(5),
            high_views,
            signature: MultiSignature::single(ReplicaID::new(1), SignatureBytes::new([1u8; 64])),
        };
        let bytes = tc.try_to_vec().unwrap();
        let decoded = TimeoutCertificate::deserialize(&mut bytes.as_slice()).unwrap();
        assert!(decoded == tc);

        let si = SyncInfo::new().with_qc(qc).with_tc(tc);
        let bytes = si.try_to_vec().unwrap();
        let decoded = SyncInfo::deserialize(&mut bytes.as_slice()).unwrap();
        assert!(decoded == si);
    }
}
