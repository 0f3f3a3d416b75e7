/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The signature and certificate subsystem.
//!
//! The subsystem is layered the same way the rest of the replica is: a leaf [`CryptoBase`]
//! primitive that signs and verifies quorum signatures ([`ed25519::Ed25519`]), an LRU
//! memoization layer over it ([`cache::Cache`]), and a [`Signer`] on top that speaks in terms of
//! the protocol's certificates rather than raw messages.
//!
//! Replicas are identified by [`ReplicaID`] on the wire and by [`VerifyingKey`] cryptographically;
//! the [`KeyStore`](crate::configuration::KeyStore) ties the two together.

pub mod cache;

pub mod ed25519;

use std::collections::BTreeMap;
use std::fmt;

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use ed25519_dalek::Signer as DalekSigner;

use crate::messages::TimeoutMessage;
use crate::types::certificates::{certificate_message_bytes, timeout_message_bytes};
use crate::types::{
    AggregateQC, Block, CryptoHash, MultiSignature, PartialCertificate, QuorumCertificate,
    ReplicaID, SignatureBytes, TimeoutCertificate, ViewNumber,
};

/// A wrapper around [`SigningKey`] which implements a convenience method for creating signatures.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Convenience method for creating signatures over values or messages represented as slices
    /// of bytes.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

/// Errors arising from combining signatures.
#[derive(Debug, PartialEq, Eq)]
pub enum CombineError {
    /// No signatures were given to combine.
    Empty,
    /// Two of the given signatures share a participant.
    Overlap(ReplicaID),
}

impl fmt::Display for CombineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombineError::Empty => write!(f, "no signatures to combine"),
            CombineError::Overlap(id) => write!(f, "replica {} appears in two signatures", id),
        }
    }
}

/// The quorum signature primitive: signs and verifies [`MultiSignature`]s.
///
/// `batch_verify` checks an aggregate signature against a per-signer message map; the canonical
/// byte string representing a batch is the concatenation of the messages in ascending signer-ID
/// order. `combine` merges signatures; its output is not checked and must not be assumed valid.
pub trait CryptoBase {
    /// Sign `message`, producing a quorum signature with the local replica as its only
    /// participant.
    fn sign(&self, message: &[u8]) -> MultiSignature;

    /// Verify `signature` against `message`: every participant must have correctly signed
    /// `message`.
    fn verify(&self, signature: &MultiSignature, message: &[u8]) -> bool;

    /// Verify `signature` against a batch of per-signer messages: every participant must have
    /// correctly signed its own entry in `batch`, and the participant sets must coincide.
    fn batch_verify(&self, signature: &MultiSignature, batch: &BTreeMap<ReplicaID, Vec<u8>>)
        -> bool;

    /// Combine `signatures` into a single quorum signature.
    fn combine(&self, signatures: &[MultiSignature]) -> Result<MultiSignature, CombineError>;
}

/// Certificate-level operations over a [`CryptoBase`].
///
/// The `Signer` is what the consensus driver and the synchronizer talk to: it creates and checks
/// partial certificates, quorum certificates, timeout certificates and aggregated QCs, translating
/// each into the primitive's sign/verify/batch-verify/combine vocabulary. Because the primitive
/// underneath is normally the [cache](cache::Cache), each (message, signature) pair is verified at
/// most once per replica lifetime.
pub struct Signer {
    base: Box<dyn CryptoBase>,
}

impl Signer {
    pub fn new(base: Box<dyn CryptoBase>) -> Signer {
        Signer { base }
    }

    /// Sign a vote for `block`.
    pub fn create_partial_cert(&self, block: &Block) -> PartialCertificate {
        let message = certificate_message_bytes(&block.hash, block.view);
        PartialCertificate {
            block_hash: block.hash,
            view: block.view,
            signature: self.base.sign(&message),
        }
    }

    /// Check that `cert` is a single vote correctly signed by `voter`.
    pub fn verify_partial_cert(&self, cert: &PartialCertificate, voter: ReplicaID) -> bool {
        if cert.signature.len() != 1 || !cert.signature.contains(&voter) {
            return false;
        }
        self.base.verify(&cert.signature, &cert.message_bytes())
    }

    /// Combine a quorum of partial certificates for the same `(block_hash, view)` into a quorum
    /// certificate.
    pub fn create_quorum_cert(
        &self,
        block_hash: CryptoHash,
        view: ViewNumber,
        partials: &[PartialCertificate],
    ) -> Result<QuorumCertificate, CombineError> {
        let signatures: Vec<MultiSignature> =
            partials.iter().map(|pc| pc.signature.clone()).collect();
        let signature = self.base.combine(&signatures)?;
        Ok(QuorumCertificate {
            block_hash,
            view,
            signature,
        })
    }

    /// Check that `qc` is valid: correctly signed by a participant set of at least `quorum`
    /// replicas. Genesis certificates are valid by definition.
    pub fn verify_quorum_cert(&self, qc: &QuorumCertificate, quorum: usize) -> bool {
        if qc.is_genesis_qc() {
            return true;
        }
        if qc.signature.len() < quorum {
            return false;
        }
        self.base.verify(&qc.signature, &qc.message_bytes())
    }

    /// Sign a timeout for `view`, vouching for the highest QC view the local replica has seen.
    pub fn sign_timeout(&self, view: ViewNumber, high_qc_view: ViewNumber) -> MultiSignature {
        self.base.sign(&timeout_message_bytes(view, high_qc_view))
    }

    /// Check that `msg` is a timeout correctly signed by its sender.
    pub fn verify_timeout_message(&self, msg: &TimeoutMessage) -> bool {
        if msg.signature.len() != 1 || !msg.signature.contains(&msg.id) {
            return false;
        }
        self.base.verify(&msg.signature, &msg.message_bytes())
    }

    /// Assemble a timeout certificate from a quorum of timeout messages for the same view.
    pub fn create_timeout_cert(
        &self,
        view: ViewNumber,
        timeouts: &BTreeMap<ReplicaID, TimeoutMessage>,
    ) -> Result<TimeoutCertificate, CombineError> {
        let signatures: Vec<MultiSignature> =
            timeouts.values().map(|msg| msg.signature.clone()).collect();
        let signature = self.base.combine(&signatures)?;
        let high_views = timeouts
            .iter()
            .map(|(id, msg)| (*id, msg.sync_info.high_qc_view()))
            .collect();
        Ok(TimeoutCertificate {
            view,
            high_views,
            signature,
        })
    }

    /// Check that `tc` is valid: each participant correctly signed its own `(view, high_view)`
    /// tuple, and at least `quorum` replicas participated.
    pub fn verify_timeout_cert(&self, tc: &TimeoutCertificate, quorum: usize) -> bool {
        if tc.signature.len() < quorum {
            return false;
        }
        let mut batch = BTreeMap::new();
        for signer in tc.signature.participants() {
            match tc.message_bytes(signer) {
                Some(message) => {
                    batch.insert(*signer, message);
                }
                // a participant without a recorded high view cannot be checked
                None => return false,
            }
        }
        self.base.batch_verify(&tc.signature, &batch)
    }

    /// Assemble an aggregated QC from a quorum of timeout messages for the same view.
    pub fn create_aggregate_qc(
        &self,
        view: ViewNumber,
        genesis_qc: &QuorumCertificate,
        timeouts: &BTreeMap<ReplicaID, TimeoutMessage>,
    ) -> Result<AggregateQC, CombineError> {
        let signatures: Vec<MultiSignature> =
            timeouts.values().map(|msg| msg.signature.clone()).collect();
        let signature = self.base.combine(&signatures)?;
        let qcs = timeouts
            .iter()
            .map(|(id, msg)| {
                let qc = msg
                    .sync_info
                    .qc
                    .clone()
                    .unwrap_or_else(|| genesis_qc.clone());
                (*id, qc)
            })
            .collect();
        Ok(AggregateQC {
            view,
            qcs,
            signature,
        })
    }

    /// Check that `agg` is valid and return its highest quorum certificate.
    ///
    /// Validity requires that each participant correctly signed its own `(view, qc.view)` tuple,
    /// that at least `quorum` replicas participated, and that the highest contained certificate is
    /// itself valid.
    pub fn verify_aggregate_qc(
        &self,
        agg: &AggregateQC,
        quorum: usize,
    ) -> Option<QuorumCertificate> {
        if agg.signature.len() < quorum {
            return None;
        }
        let mut batch = BTreeMap::new();
        for signer in agg.signature.participants() {
            let qc = agg.qcs.get(signer)?;
            batch.insert(*signer, timeout_message_bytes(agg.view, qc.view));
        }
        if !self.base.batch_verify(&agg.signature, &batch) {
            return None;
        }
        let high_qc = agg.high_qc()?.clone();
        if !self.verify_quorum_cert(&high_qc, quorum) {
            return None;
        }
        Some(high_qc)
    }
}
