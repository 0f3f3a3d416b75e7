/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An LRU memoization layer over any [`CryptoBase`].
//!
//! Verification dominates CPU under load, and many signatures are re-verified repeatedly: a vote
//! is the leader's own signature echoed back, a quorum certificate travels in every descendant
//! proposal. Caching by `(message hash, signature bytes)` is safe because a successful
//! verification of that pair is a mathematical fact independent of who asks.
//!
//! Entries are keyed by `sha256(message) || signature_bytes` for plain verification, and by
//! `sha256(concatenation of the batch messages in ascending signer order) || signature_bytes` for
//! batch verification. Keys are inserted on [`sign`](CryptoBase::sign) and on *successful*
//! verification, never on failure. [`combine`](CryptoBase::combine) is never cached: its output is
//! not guaranteed to be valid.
//!
//! The mutex guards only the LRU structure. The wrapped primitive is always called without holding
//! it, so verification work can be offloaded without serializing on the cache.

use std::collections::BTreeMap;
use std::sync::Mutex;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::types::{MultiSignature, ReplicaID};

use super::{CombineError, CryptoBase};

/// Default number of cache entries, matching the construction default used by replica
/// configuration.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

pub struct Cache<C: CryptoBase> {
    base: C,
    lru: Mutex<Lru>,
}

impl<C: CryptoBase> Cache<C> {
    /// Wrap `base` with a cache holding at most `capacity` entries.
    pub fn new(base: C, capacity: usize) -> Cache<C> {
        Cache {
            base,
            lru: Mutex::new(Lru::new(capacity)),
        }
    }

    fn verify_key(signature: &MultiSignature, message: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(32 + signature.len() * (4 + 64));
        key.extend_from_slice(&Sha256::digest(message));
        key.extend_from_slice(&signature.to_bytes());
        key
    }

    fn batch_verify_key(
        signature: &MultiSignature,
        batch: &BTreeMap<ReplicaID, Vec<u8>>,
    ) -> Vec<u8> {
        let mut hasher = Sha256::new();
        // BTreeMap iteration gives the messages in ascending signer order
        for message in batch.values() {
            hasher.update(message);
        }
        let mut key = Vec::with_capacity(32 + signature.len() * (4 + 64));
        key.extend_from_slice(&hasher.finalize());
        key.extend_from_slice(&signature.to_bytes());
        key
    }

    fn check(&self, key: &[u8]) -> bool {
        self.lru.lock().unwrap().check(key)
    }

    fn insert(&self, key: Vec<u8>) {
        self.lru.lock().unwrap().insert(key)
    }
}

impl<C: CryptoBase> CryptoBase for Cache<C> {
    /// Sign a message and cache the result for use during verification.
    fn sign(&self, message: &[u8]) -> MultiSignature {
        let signature = self.base.sign(message);
        self.insert(Self::verify_key(&signature, message));
        signature
    }

    fn verify(&self, signature: &MultiSignature, message: &[u8]) -> bool {
        let key = Self::verify_key(signature, message);
        if self.check(&key) {
            return true;
        }
        if self.base.verify(signature, message) {
            self.insert(key);
            return true;
        }
        false
    }

    fn batch_verify(
        &self,
        signature: &MultiSignature,
        batch: &BTreeMap<ReplicaID, Vec<u8>>,
    ) -> bool {
        let key = Self::batch_verify_key(signature, batch);
        if self.check(&key) {
            return true;
        }
        if self.base.batch_verify(signature, batch) {
            self.insert(key);
            return true;
        }
        false
    }

    fn combine(&self, signatures: &[MultiSignature]) -> Result<MultiSignature, CombineError> {
        self.base.combine(signatures)
    }
}

/// The LRU structure: an insertion-ordered map whose first entry is the least recently used.
/// Lookups and inserts both move the touched key to the back.
struct Lru {
    capacity: usize,
    entries: IndexMap<Vec<u8>, ()>,
}

impl Lru {
    fn new(capacity: usize) -> Lru {
        Lru {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    fn check(&mut self, key: &[u8]) -> bool {
        if self.entries.shift_remove(key).is_some() {
            self.entries.insert(key.to_vec(), ());
            return true;
        }
        false
    }

    fn insert(&mut self, key: Vec<u8>) {
        if self.entries.shift_remove(&key).is_none() && self.entries.len() == self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, ());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::types::SignatureBytes;

    use super::*;

    /// A deterministic base that records how often each operation is delegated to it.
    #[derive(Clone)]
    struct CountingBase {
        accept: bool,
        verify_calls: Rc<Cell<usize>>,
        batch_verify_calls: Rc<Cell<usize>>,
    }

    impl CountingBase {
        fn new(accept: bool) -> CountingBase {
            CountingBase {
                accept,
                verify_calls: Rc::new(Cell::new(0)),
                batch_verify_calls: Rc::new(Cell::new(0)),
            }
        }
    }

    impl CryptoBase for CountingBase {
        fn sign(&self, message: &[u8]) -> MultiSignature {
            let mut bytes = [0u8; 64];
            let len = message.len().min(64);
            bytes[..len].copy_from_slice(&message[..len]);
            MultiSignature::single(ReplicaID::new(1), SignatureBytes::new(bytes))
        }

        fn verify(&self, _signature: &MultiSignature, _message: &[u8]) -> bool {
            self.verify_calls.set(self.verify_calls.get() + 1);
            self.accept
        }

        fn batch_verify(
            &self,
            _signature: &MultiSignature,
            _batch: &BTreeMap<ReplicaID, Vec<u8>>,
        ) -> bool {
            self.batch_verify_calls.set(self.batch_verify_calls.get() + 1);
            self.accept
        }

        fn combine(&self, signatures: &[MultiSignature]) -> Result<MultiSignature, CombineError> {
            if signatures.is_empty() {
                return Err(CombineError::Empty);
            }
            Ok(signatures[0].clone())
        }
    }

    #[test]
    fn verify_after_sign_is_a_cache_hit() {
        let base = CountingBase::new(true);
        let verify_calls = base.verify_calls.clone();
        let cache = Cache::new(base, DEFAULT_CACHE_CAPACITY);

        let message = [0xDE, 0xAD, 0xBE, 0xEF];
        let signature = cache.sign(&message);
        assert!(cache.verify(&signature, &message));
        assert_eq!(verify_calls.get(), 0);
    }

    #[test]
    fn cache_agrees_with_the_base_and_never_caches_failures() {
        let base = CountingBase::new(false);
        let verify_calls = base.verify_calls.clone();
        let cache = Cache::new(base, DEFAULT_CACHE_CAPACITY);

        let signature = MultiSignature::single(ReplicaID::new(2), SignatureBytes::new([7u8; 64]));
        assert!(!cache.verify(&signature, b"m"));
        assert!(!cache.verify(&signature, b"m"));
        // failures are delegated every time: nothing was cached
        assert_eq!(verify_calls.get(), 2);
    }

    #[test]
    fn successful_verification_is_cached() {
        let base = CountingBase::new(true);
        let verify_calls = base.verify_calls.clone();
        let cache = Cache::new(base, DEFAULT_CACHE_CAPACITY);

        let signature = MultiSignature::single(ReplicaID::new(2), SignatureBytes::new([7u8; 64]));
        assert!(cache.verify(&signature, b"m"));
        assert!(cache.verify(&signature, b"m"));
        assert!(cache.verify(&signature, b"m"));
        assert_eq!(verify_calls.get(), 1);
    }

    #[test]
    fn batch_verification_is_cached_by_ordered_concatenation() {
        let base = CountingBase::new(true);
        let batch_verify_calls = base.batch_verify_calls.clone();
        let cache = Cache::new(base, DEFAULT_CACHE_CAPACITY);

        let signature = MultiSignature::single(ReplicaID::new(1), SignatureBytes::new([1u8; 64]));
        let mut batch = BTreeMap::new();
        batch.insert(ReplicaID::new(1), b"a".to_vec());
        batch.insert(ReplicaID::new(2), b"b".to_vec());

        assert!(cache.batch_verify(&signature, &batch));
        assert!(cache.batch_verify(&signature, &batch));
        assert_eq!(batch_verify_calls.get(), 1);
    }

    #[test]
    fn eviction_drops_the_least_recently_used_key() {
        let base = CountingBase::new(true);
        let verify_calls = base.verify_calls.clone();
        let cache = Cache::new(base, 2);

        let sig = |b: u8| MultiSignature::single(ReplicaID::new(1), SignatureBytes::new([b; 64]));

        assert!(cache.verify(&sig(1), b"m")); // miss, cached
        assert!(cache.verify(&sig(2), b"m")); // miss, cached; cache full
        assert!(cache.verify(&sig(1), b"m")); // hit, promotes sig(1)
        assert_eq!(verify_calls.get(), 2);

        assert!(cache.verify(&sig(3), b"m")); // miss, evicts sig(2)
        assert_eq!(verify_calls.get(), 3);

        assert!(cache.verify(&sig(2), b"m")); // miss again: sig(2) was evicted
        assert_eq!(verify_calls.get(), 4);
        assert!(cache.verify(&sig(1), b"m")); // miss: re-inserting sig(2) evicted sig(1)
        assert_eq!(verify_calls.get(), 5);
    }

    #[test]
    fn filling_past_capacity_evicts_in_insertion_order() {
        let base = CountingBase::new(true);
        let verify_calls = base.verify_calls.clone();
        let capacity = 4;
        let cache = Cache::new(base, capacity);

        let sig = |b: u8| MultiSignature::single(ReplicaID::new(1), SignatureBytes::new([b; 64]));

        for b in 0..(capacity as u8 + 1) {
            assert!(cache.verify(&sig(b), b"m"));
        }
        assert_eq!(verify_calls.get(), capacity + 1);

        // key 0 was the least recently used and must be gone; the rest are hits
        for b in 1..(capacity as u8 + 1) {
            assert!(cache.verify(&sig(b), b"m"));
        }
        assert_eq!(verify_calls.get(), capacity + 1);
        assert!(cache.verify(&sig(0), b"m"));
        assert_eq!(verify_calls.get(), capacity + 2);
    }
}
