//! Replica repair: fill empty replica slots and evict ejected nodes.

use crate::map::Histogram;
use crate::types::{NodeId, VbMap};
use std::collections::BTreeSet;

/// Rewrite every chain's replica slots so that no slot stays empty while
/// a usable node exists and no ejected or duplicated node remains.
///
/// Chains are walked in vbucket order, replicas left to right, with an
/// accumulator of nodes already placed in the chain. An empty slot takes
/// the least-loaded candidate from that turn's histogram outside
/// `accumulator ∪ {master} ∪ eject`. A slot holding a duplicate, an
/// ejected node, or the master is replaced with the avoidance set widened
/// by the entire original chain, so a replica never swaps with a sibling.
/// When no candidate survives the avoidance set the slot is left empty.
/// Histograms update as picks happen; the master slot is never touched.
///
/// Running the repair twice yields the same map as running it once.
#[must_use]
pub fn new_replicas(map: &VbMap, eject: &BTreeSet<NodeId>, hists: &mut [Histogram]) -> VbMap {
    let mut repaired = map.clone();
    for chain in &mut repaired.chains {
        let master = chain.master().cloned();
        let original: Vec<NodeId> = chain.nodes().cloned().collect();
        let mut placed: BTreeSet<NodeId> = BTreeSet::new();

        for turn in 1..chain.len() {
            let slot = chain.0[turn].clone();
            match slot {
                None => {
                    let avoid = avoidance(&placed, master.as_ref(), eject, &[]);
                    if let Some(pick) = hists[turn].least_loaded(&avoid) {
                        hists[turn].increment(&pick);
                        placed.insert(pick.clone());
                        chain.0[turn] = Some(pick);
                    }
                }
                Some(node)
                    if placed.contains(&node)
                        || eject.contains(&node)
                        || master.as_ref() == Some(&node) =>
                {
                    hists[turn].decrement(&node);
                    let avoid = avoidance(&placed, master.as_ref(), eject, &original);
                    if let Some(pick) = hists[turn].least_loaded(&avoid) {
                        hists[turn].increment(&pick);
                        placed.insert(pick.clone());
                        chain.0[turn] = Some(pick);
                    } else {
                        chain.0[turn] = None;
                    }
                }
                Some(node) => {
                    placed.insert(node);
                }
            }
        }
    }
    repaired
}

fn avoidance(
    placed: &BTreeSet<NodeId>,
    master: Option<&NodeId>,
    eject: &BTreeSet<NodeId>,
    original: &[NodeId],
) -> BTreeSet<NodeId> {
    let mut avoid = placed.clone();
    if let Some(m) = master {
        avoid.insert(m.clone());
    }
    avoid.extend(eject.iter().cloned());
    avoid.extend(original.iter().cloned());
    avoid
}
