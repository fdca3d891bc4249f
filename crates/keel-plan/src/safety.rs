//! Safety classification: how well the current layout survives another
//! failure.

use crate::types::{NodeId, VbMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A turn is considered unbalanced once its fullest and emptiest node
/// differ by more than this many vbuckets.
pub const DEFAULT_UNBALANCE_GAP: usize = 2;

/// Per-bucket safety level, ordered by increasing severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum BucketSafety {
    /// The bucket can lose a node without losing data
    Ok,
    /// Replication is intact but vbucket counts are lopsided
    SoftRebalanceNeeded,
    /// Some vbucket is down to one live copy; a rebalance restores slack
    RebalanceNeeded,
    /// A configured server is unreachable and must be failed over
    FailoverNeeded,
    /// Not enough live nodes to protect the data at all
    HardNodesNeeded,
}

impl BucketSafety {
    /// Map a non-`Ok` safety level to its warning
    #[must_use]
    pub fn warning(self) -> Option<SafetyWarning> {
        match self {
            Self::Ok => None,
            Self::SoftRebalanceNeeded => Some(SafetyWarning::SoftRebalanceNeeded),
            Self::RebalanceNeeded => Some(SafetyWarning::RebalanceNeeded),
            Self::FailoverNeeded => Some(SafetyWarning::FailoverNeeded),
            Self::HardNodesNeeded => Some(SafetyWarning::HardNodesNeeded),
        }
    }
}

/// Cluster-level warnings surfaced to the admin interface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SafetyWarning {
    SoftRebalanceNeeded,
    RebalanceNeeded,
    FailoverNeeded,
    HardNodesNeeded,
    /// The live node count does not exceed the replica count; another
    /// node would restore failure headroom
    SoftNodesNeeded,
}

/// The slice of a bucket's configuration the classifier looks at.
///
/// Only replicated buckets with maps participate; hash-ring buckets are
/// excluded by the caller.
#[derive(Debug, Clone, Copy)]
pub struct BucketView<'a> {
    /// Configured replica count
    pub num_replicas: usize,
    /// Nodes currently bound to the bucket
    pub servers: &'a [NodeId],
    /// The vbucket map, absent before first placement
    pub map: Option<&'a VbMap>,
}

/// Check whether any turn's vbucket counts over `servers` spread wider
/// than `gap`.
#[must_use]
pub fn unbalanced(map: &VbMap, servers: &[NodeId], gap: usize) -> bool {
    map.histograms(servers)
        .iter()
        .any(|hist| hist.spread() > gap)
}

/// The worst-protected vbucket's live copy count.
#[must_use]
pub fn min_live_copies(map: &VbMap, live: &BTreeSet<NodeId>) -> usize {
    map.chains()
        .iter()
        .map(|chain| chain.live_copies(live))
        .min()
        .unwrap_or(0)
}

/// Classify a single bucket against the set of live nodes.
#[must_use]
pub fn bucket_safety(bucket: &BucketView<'_>, live: &BTreeSet<NodeId>, gap: usize) -> BucketSafety {
    if bucket.num_replicas == 0 {
        return BucketSafety::Ok;
    }
    let Some(map) = bucket.map else {
        return if live.len() >= 2 {
            BucketSafety::Ok
        } else {
            BucketSafety::HardNodesNeeded
        };
    };
    if min_live_copies(map, live) <= 1 {
        // with nothing live there is nothing left to promote, so the only
        // actionable advice is to add nodes
        if live.is_empty() {
            BucketSafety::HardNodesNeeded
        } else if bucket.servers.iter().any(|s| !live.contains(s)) {
            BucketSafety::FailoverNeeded
        } else if live.len() > 1 {
            BucketSafety::RebalanceNeeded
        } else {
            BucketSafety::HardNodesNeeded
        }
    } else if unbalanced(map, bucket.servers, gap) {
        BucketSafety::SoftRebalanceNeeded
    } else {
        BucketSafety::Ok
    }
}

/// Aggregate safety across buckets: the maximum base severity, plus the
/// extra `SoftNodesNeeded` axis when some bucket's live node count does
/// not exceed its replica count. Returns only the non-`Ok` members.
#[must_use]
pub fn failover_warnings(
    buckets: &[BucketView<'_>],
    live: &BTreeSet<NodeId>,
    gap: usize,
) -> Vec<SafetyWarning> {
    let mut base = BucketSafety::Ok;
    let mut soft_nodes_needed = false;
    for bucket in buckets {
        let safety = bucket_safety(bucket, live, gap);
        if live.len() <= bucket.num_replicas && safety != BucketSafety::HardNodesNeeded {
            soft_nodes_needed = true;
        }
        base = base.max(safety);
    }

    let mut warnings = Vec::new();
    if let Some(warning) = base.warning() {
        warnings.push(warning);
    }
    if soft_nodes_needed {
        warnings.push(SafetyWarning::SoftNodesNeeded);
    }
    warnings
}
