/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ed25519 implementation of the [`CryptoBase`] primitive.
//!
//! A quorum signature under this scheme is simply the set of the participants' individual Ed25519
//! signatures, indexed by replica ID. Verification checks every individual signature against the
//! public key registered for its ID; combining is a disjoint union of the participant maps.

use std::collections::BTreeMap;
use std::rc::Rc;

use ed25519_dalek::{Signature, Verifier};

use crate::configuration::KeyStore;
use crate::types::{MultiSignature, ReplicaID};

use super::{CombineError, CryptoBase, Keypair};

pub struct Ed25519 {
    id: ReplicaID,
    keypair: Keypair,
    keys: Rc<KeyStore>,
}

impl Ed25519 {
    pub fn new(id: ReplicaID, keypair: Keypair, keys: Rc<KeyStore>) -> Ed25519 {
        Ed25519 { id, keypair, keys }
    }

    fn verify_one(&self, signer: &ReplicaID, sig: &[u8; 64], message: &[u8]) -> bool {
        let Some(public_key) = self.keys.get(signer) else {
            return false;
        };
        let signature = Signature::from_bytes(sig);
        public_key.verify(message, &signature).is_ok()
    }
}

impl CryptoBase for Ed25519 {
    fn sign(&self, message: &[u8]) -> MultiSignature {
        MultiSignature::single(self.id, self.keypair.sign(message))
    }

    fn verify(&self, signature: &MultiSignature, message: &[u8]) -> bool {
        if signature.is_empty() {
            return false;
        }
        signature
            .iter()
            .all(|(signer, sig)| self.verify_one(signer, &sig.bytes(), message))
    }

    fn batch_verify(
        &self,
        signature: &MultiSignature,
        batch: &BTreeMap<ReplicaID, Vec<u8>>,
    ) -> bool {
        if signature.is_empty() || signature.len() != batch.len() {
            return false;
        }
        signature.iter().all(|(signer, sig)| {
            batch
                .get(signer)
                .is_some_and(|message| self.verify_one(signer, &sig.bytes(), message))
        })
    }

    fn combine(&self, signatures: &[MultiSignature]) -> Result<MultiSignature, CombineError> {
        if signatures.is_empty() {
            return Err(CombineError::Empty);
        }
        let mut combined = MultiSignature::new();
        for signature in signatures {
            for (signer, sig) in signature.iter() {
                if !combined.insert(*signer, *sig) {
                    return Err(CombineError::Overlap(*signer));
                }
            }
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    fn test_primitives(n: u32) -> Vec<Ed25519> {
        let keypairs: Vec<Keypair> = (1..=n)
            .map(|i| Keypair::new(SigningKey::from_bytes(&[i as u8; 32])))
            .collect();
        let mut keys = KeyStore::new();
        for (i, keypair) in keypairs.iter().enumerate() {
            keys.insert(ReplicaID::new(i as u32 + 1), keypair.public());
        }
        let keys = Rc::new(keys);
        keypairs
            .into_iter()
            .enumerate()
            .map(|(i, keypair)| Ed25519::new(ReplicaID::new(i as u32 + 1), keypair, keys.clone()))
            .collect()
    }

    #[test]
    fn sign_verify_combine() {
        let primitives = test_primitives(3);
        let message = b"the ordered log";

        let sigs: Vec<MultiSignature> =
            primitives.iter().map(|p| p.sign(message)).collect();
        for sig in &sigs {
            assert!(primitives[0].verify(sig, message));
            assert!(!primitives[0].verify(sig, b"a different log"));
        }

        let combined = primitives[0].combine(&sigs).unwrap();
        assert_eq!(combined.len(), 3);
        assert!(primitives[1].verify(&combined, message));

        // combining overlapping participant sets is an error
        let overlap = primitives[0].combine(&[sigs[0].clone(), sigs[0].clone()]);
        assert_eq!(overlap, Err(CombineError::Overlap(ReplicaID::new(1))));
        assert_eq!(primitives[0].combine(&[]), Err(CombineError::Empty));
    }

    #[test]
    fn batch_verify_checks_per_signer_messages() {
        let primitives = test_primitives(3);

        let mut batch = BTreeMap::new();
        let mut sigs = Vec::new();
        for (i, primitive) in primitives.iter().enumerate() {
            let message = format!("timeout {}", i).into_bytes();
            sigs.push(primitive.sign(&message));
            batch.insert(ReplicaID::new(i as u32 + 1), message);
        }
        let combined = primitives[0].combine(&sigs).unwrap();
        assert!(primitives[0].batch_verify(&combined, &batch));

        // swapping two messages breaks the batch
        let mut swapped = batch.clone();
        let a = swapped.get(&ReplicaID::new(1)).unwrap().clone();
        let b = swapped.get(&ReplicaID::new(2)).unwrap().clone();
        swapped.insert(ReplicaID::new(1), b);
        swapped.insert(ReplicaID::new(2), a);
        assert!(!primitives[0].batch_verify(&combined, &swapped));

        // a missing entry breaks the batch
        let mut missing = batch;
        missing.remove(&ReplicaID::new(3));
        assert!(!primitives[0].batch_verify(&combined, &missing));
    }

    #[test]
    fn empty_signature_never_verifies() {
        let primitives = test_primitives(1);
        assert!(!primitives[0].verify(&MultiSignature::new(), b"anything"));
        assert!(!primitives[0].batch_verify(&MultiSignature::new(), &BTreeMap::new()));
    }
}
