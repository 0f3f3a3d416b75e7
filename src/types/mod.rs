/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the value types that the protocol is stated in terms of.

pub mod basic;

pub mod block;

pub mod certificates;

pub use basic::{Command, CryptoHash, ReplicaID, SignatureBytes, ViewNumber};
pub use block::Block;
pub use certificates::{
    AggregateQC, MultiSignature, PartialCertificate, QuorumCertificate, SyncInfo,
    TimeoutCertificate,
};
