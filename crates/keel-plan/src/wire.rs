//! JSON encoding of a vbucket map for the admin surface.
//!
//! Clients receive the map as parallel arrays: a sorted `serverList` and,
//! per vbucket, a chain of indexes into that list with `-1` marking an
//! empty slot.

use crate::types::{NodeId, VbMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Slot index used for an empty slot on the wire.
pub const EMPTY_SLOT: i32 = -1;

/// Client-facing JSON form of a bucket's vbucket map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VbMapJson {
    /// Hashing scheme clients use to map keys to vbuckets
    pub hash_algorithm: String,
    /// Replica count (chain length minus one)
    pub num_replicas: usize,
    /// Sorted union of the bucket's servers and every node in any chain
    pub server_list: Vec<String>,
    /// One index chain per vbucket; `-1` marks an empty slot
    pub v_bucket_map: Vec<Vec<i32>>,
}

impl VbMapJson {
    /// Encode a map together with the bucket's configured server list.
    #[must_use]
    pub fn encode(map: &VbMap, servers: &[NodeId]) -> Self {
        let mut all: BTreeSet<NodeId> = servers.iter().cloned().collect();
        all.extend(map.nodes());

        let index: HashMap<&NodeId, i32> = all
            .iter()
            .enumerate()
            .map(|(i, node)| (node, i as i32))
            .collect();

        let v_bucket_map = map
            .chains()
            .iter()
            .map(|chain| {
                chain
                    .slots()
                    .iter()
                    .map(|slot| slot.as_ref().map_or(EMPTY_SLOT, |node| index[node]))
                    .collect()
            })
            .collect();

        Self {
            hash_algorithm: "CRC".to_string(),
            num_replicas: map.chain_len().saturating_sub(1),
            server_list: all.iter().map(ToString::to_string).collect(),
            v_bucket_map,
        }
    }
}
