//! Failover transform: promote replicas for failed nodes.

use crate::types::{NodeId, VbMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of a failover transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverOutcome {
    /// The transformed map; no failed node appears anywhere in it
    pub map: VbMap,
    /// Vbuckets left with no surviving copy
    pub lost_vbuckets: usize,
}

impl FailoverOutcome {
    /// Fraction of vbuckets that lost their last copy, in `0.0..=1.0`
    #[must_use]
    pub fn lost_ratio(&self) -> f64 {
        if self.map.num_vbuckets() == 0 {
            return 0.0;
        }
        self.lost_vbuckets as f64 / self.map.num_vbuckets() as f64
    }
}

/// Remove every occurrence of a failed node and promote the first
/// surviving replica of each chain to master.
///
/// Blanked leading slots rotate to the chain tail so chain length is
/// preserved. A chain whose every copy was on failed nodes ends up fully
/// empty and counts toward `lost_vbuckets`; losing data is reported, not
/// treated as a failure.
#[must_use]
pub fn failover(map: &VbMap, failed: &BTreeSet<NodeId>) -> FailoverOutcome {
    let mut transformed = map.clone();
    let mut lost_vbuckets = 0;
    for chain in &mut transformed.chains {
        for slot in &mut chain.0 {
            if slot.as_ref().is_some_and(|n| failed.contains(n)) {
                *slot = None;
            }
        }
        let leading_empty = chain.0.iter().take_while(|s| s.is_none()).count();
        chain.0.rotate_left(leading_empty);
        if chain.master().is_none() && !chain.is_empty() {
            lost_vbuckets += 1;
        }
    }
    FailoverOutcome {
        map: transformed,
        lost_vbuckets,
    }
}
