pub(crate) mod logging;

use chained_smr::twins::{Partition, ViewSpec};
use chained_smr::types::ReplicaID;

/// Build a partition from network IDs.
pub(crate) fn partition(network_ids: &[u32]) -> Partition {
    network_ids
        .iter()
        .map(|id| chained_smr::twins::NetworkID::new(*id))
        .collect()
}

/// Build one view plan entry.
pub(crate) fn view(leader: u32, partitions: &[&[u32]]) -> ViewSpec {
    ViewSpec {
        leader: ReplicaID::new(leader),
        partitions: partitions.iter().map(|ids| partition(ids)).collect(),
    }
}
