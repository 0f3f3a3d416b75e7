/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas.
//!
//! The wire encoding is borsh, but nothing in the protocol depends on it: any serialization that
//! round-trips these types works. Senders are identified by the `id` carried in each message and
//! authenticated by the transport (TLS client certificates in production, in-process routing in
//! simulation); signatures inside the messages are additionally checked against the sender's
//! registered public key.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::certificates::timeout_message_bytes;
use crate::types::{AggregateQC, Block, MultiSignature, PartialCertificate, ReplicaID, SyncInfo,
    ViewNumber};

/// Everything one replica can say to another.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Propose(ProposeMessage),
    Vote(VoteMessage),
    Timeout(TimeoutMessage),
    NewView(NewViewMessage),
}

/// A leader's proposal for its view, broadcast to all peers.
///
/// `aggregate_qc` is only attached by rule variants that require it, on the first proposal after
/// a timeout; when present, the block's justify must equal the aggregate's highest certificate.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ProposeMessage {
    pub id: ReplicaID,
    pub block: Block,
    pub aggregate_qc: Option<AggregateQC>,
}

/// A vote for a proposal, sent to the leader of the view after the proposal's.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct VoteMessage {
    pub id: ReplicaID,
    pub cert: PartialCertificate,
}

/// A signed declaration that `view` timed out at the sender, broadcast to all peers.
///
/// The signature is over `(view, high_qc_view)`, where `high_qc_view` is the view of the highest
/// quorum certificate carried in `sync_info`. Quorums of these messages are assembled into
/// [`TimeoutCertificate`](crate::types::TimeoutCertificate)s (and, for rule variants that need
/// them, [`AggregateQC`]s).
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct TimeoutMessage {
    pub id: ReplicaID,
    pub view: ViewNumber,
    pub sync_info: SyncInfo,
    pub signature: MultiSignature,
}

impl TimeoutMessage {
    /// The canonical bytes that the signature of this message is over.
    pub fn message_bytes(&self) -> Vec<u8> {
        timeout_message_bytes(self.view, self.sync_info.high_qc_view())
    }
}

/// The evidence a replica hands to the leader of the view it just entered.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct NewViewMessage {
    pub id: ReplicaID,
    pub sync_info: SyncInfo,
}

#[cfg(test)]
mod tests {
    use crate::types::{Command, CryptoHash, QuorumCertificate, SignatureBytes};

    use super::*;

    #[test]
    fn messages_round_trip_through_borsh() {
        let block = Block::new(
            CryptoHash::zero(),
            QuorumCertificate::genesis_qc(CryptoHash::zero()),
            Command::new(b"cmd".to_vec()),
            ViewNumber::new(1),
            ReplicaID::new(1),
        );
        let propose = Message::Propose(ProposeMessage {
            id: ReplicaID::new(1),
            block: block.clone(),
            aggregate_qc: None,
        });
        let bytes = propose.try_to_vec().unwrap();
        match Message::deserialize(&mut bytes.as_slice()).unwrap() {
            Message::Propose(decoded) => assert!(decoded.block == block),
            _ => panic!("decoded the wrong variant"),
        }

        let timeout = TimeoutMessage {
            id: ReplicaID::new(2),
            view: ViewNumber::new(9),
            sync_info: SyncInfo::new()
                .with_qc(QuorumCertificate::genesis_qc(block.hash)),
            signature: MultiSignature::single(
                ReplicaID::new(2),
                SignatureBytes::new([3u8; 64]),
            ),
        };
        let bytes = Message::Timeout(timeout.clone()).try_to_vec().unwrap();
        match Message::deserialize(&mut bytes.as_slice()).unwrap() {
            Message::Timeout(decoded) => {
                assert!(decoded.view == timeout.view);
                assert!(decoded.message_bytes() == timeout.message_bytes());
            }
            _ => panic!("decoded the wrong variant"),
        }
    }
}
