//! Pure map primitives: per-turn views and histograms.
//!
//! A histogram counts, for one chain position (turn), how many vbuckets
//! each candidate node serves. Histograms are ordered and zero-filled: a
//! node with no vbuckets on a turn is still a placement candidate, and
//! min/max ties resolve to the first node in candidate-list order. That
//! ordering is part of the planner contract; every pick must be
//! reproducible run to run.

use crate::types::{NodeId, VbMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-turn vbucket counts over a fixed, ordered candidate node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    entries: Vec<(NodeId, usize)>,
}

impl Histogram {
    /// Create a zero-filled histogram over the given candidates.
    ///
    /// Candidate order is preserved; duplicates are dropped.
    #[must_use]
    pub fn new(candidates: &[NodeId]) -> Self {
        let mut entries = Vec::with_capacity(candidates.len());
        let mut seen = BTreeSet::new();
        for node in candidates {
            if seen.insert(node.clone()) {
                entries.push((node.clone(), 0));
            }
        }
        Self { entries }
    }

    /// Number of candidate nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether there are no candidates at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The count for a node, if it is a candidate
    #[must_use]
    pub fn count(&self, node: &NodeId) -> Option<usize> {
        self.entries
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, c)| *c)
    }

    /// Ordered view of the counts
    #[must_use]
    pub fn entries(&self) -> &[(NodeId, usize)] {
        &self.entries
    }

    /// Add one vbucket to a node's count; ignores non-candidates
    pub fn increment(&mut self, node: &NodeId) {
        if let Some((_, c)) = self.entries.iter_mut().find(|(n, _)| n == node) {
            *c += 1;
        }
    }

    /// Remove one vbucket from a node's count; ignores non-candidates
    pub fn decrement(&mut self, node: &NodeId) {
        if let Some((_, c)) = self.entries.iter_mut().find(|(n, _)| n == node) {
            *c = c.saturating_sub(1);
        }
    }

    /// The least-loaded candidate outside `forbidden`, first-encountered
    /// on ties
    #[must_use]
    pub fn least_loaded(&self, forbidden: &BTreeSet<NodeId>) -> Option<NodeId> {
        let mut best: Option<(&NodeId, usize)> = None;
        for (node, count) in &self.entries {
            if forbidden.contains(node) {
                continue;
            }
            if best.map_or(true, |(_, c)| *count < c) {
                best = Some((node, *count));
            }
        }
        best.map(|(n, _)| n.clone())
    }

    /// The fullest candidate, first-encountered on ties
    #[must_use]
    pub fn max_node(&self) -> Option<(NodeId, usize)> {
        let mut best: Option<(&NodeId, usize)> = None;
        for (node, count) in &self.entries {
            if best.map_or(true, |(_, c)| *count > c) {
                best = Some((node, *count));
            }
        }
        best.map(|(n, c)| (n.clone(), c))
    }

    /// The emptiest candidate, first-encountered on ties
    #[must_use]
    pub fn min_node(&self) -> Option<(NodeId, usize)> {
        let mut best: Option<(&NodeId, usize)> = None;
        for (node, count) in &self.entries {
            if best.map_or(true, |(_, c)| *count < c) {
                best = Some((node, *count));
            }
        }
        best.map(|(n, c)| (n.clone(), c))
    }

    /// Gap between the fullest and emptiest candidate; zero when empty
    #[must_use]
    pub fn spread(&self) -> usize {
        match (self.max_node(), self.min_node()) {
            (Some((_, max)), Some((_, min))) => max - min,
            _ => 0,
        }
    }
}

impl VbMap {
    /// Transpose the map into per-turn slot lists: element `i` holds the
    /// slot-`i` entry of every chain, in vbucket order.
    #[must_use]
    pub fn turns(&self) -> Vec<Vec<Option<NodeId>>> {
        let chain_len = self.chain_len();
        let mut turns = vec![Vec::with_capacity(self.num_vbuckets()); chain_len];
        for chain in self.chains() {
            for (turn, slot) in chain.slots().iter().enumerate() {
                turns[turn].push(slot.clone());
            }
        }
        turns
    }

    /// Build one histogram per turn over the given candidate servers.
    ///
    /// Empty slots are never counted; nodes outside `servers` are omitted.
    #[must_use]
    pub fn histograms(&self, servers: &[NodeId]) -> Vec<Histogram> {
        let mut histograms = vec![Histogram::new(servers); self.chain_len()];
        for chain in self.chains() {
            for (turn, slot) in chain.slots().iter().enumerate() {
                if let Some(node) = slot {
                    histograms[turn].increment(node);
                }
            }
        }
        histograms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;

    fn n(id: &str) -> NodeId {
        NodeId::from(id)
    }

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|s| NodeId::from(*s)).collect()
    }

    fn chain(ids: &[Option<&str>]) -> Chain {
        Chain(ids.iter().map(|s| s.map(NodeId::from)).collect())
    }

    fn sample_map() -> VbMap {
        VbMap::new(vec![
            chain(&[Some("a"), Some("b")]),
            chain(&[Some("a"), Some("c")]),
            chain(&[Some("b"), None]),
        ])
        .unwrap()
    }

    #[test]
    fn test_histogram_zero_filled() {
        let hist = Histogram::new(&nodes(&["a", "b", "c"]));
        assert_eq!(hist.len(), 3);
        assert_eq!(hist.count(&n("c")), Some(0));
        assert_eq!(hist.count(&n("d")), None);
    }

    #[test]
    fn test_histogram_dedups_candidates() {
        let hist = Histogram::new(&nodes(&["a", "b", "a"]));
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn test_histogram_counts() {
        let mut hist = Histogram::new(&nodes(&["a", "b"]));
        hist.increment(&n("a"));
        hist.increment(&n("a"));
        hist.increment(&n("b"));
        assert_eq!(hist.count(&n("a")), Some(2));
        assert_eq!(hist.count(&n("b")), Some(1));

        hist.decrement(&n("a"));
        assert_eq!(hist.count(&n("a")), Some(1));

        // decrement saturates at zero
        hist.decrement(&n("b"));
        hist.decrement(&n("b"));
        assert_eq!(hist.count(&n("b")), Some(0));

        // non-candidates are ignored
        hist.increment(&n("z"));
        assert_eq!(hist.count(&n("z")), None);
    }

    #[test]
    fn test_histogram_least_loaded_tie_break() {
        let mut hist = Histogram::new(&nodes(&["a", "b", "c"]));
        // a:0 b:0 c:0, tie resolves to first candidate
        assert_eq!(hist.least_loaded(&BTreeSet::new()), Some(n("a")));

        hist.increment(&n("a"));
        assert_eq!(hist.least_loaded(&BTreeSet::new()), Some(n("b")));

        let forbidden: BTreeSet<_> = [n("b")].into_iter().collect();
        assert_eq!(hist.least_loaded(&forbidden), Some(n("c")));

        let all: BTreeSet<_> = nodes(&["a", "b", "c"]).into_iter().collect();
        assert_eq!(hist.least_loaded(&all), None);
    }

    #[test]
    fn test_histogram_extremes_and_spread() {
        let mut hist = Histogram::new(&nodes(&["a", "b", "c"]));
        hist.increment(&n("b"));
        hist.increment(&n("b"));
        hist.increment(&n("c"));
        assert_eq!(hist.max_node(), Some((n("b"), 2)));
        assert_eq!(hist.min_node(), Some((n("a"), 0)));
        assert_eq!(hist.spread(), 2);

        assert_eq!(Histogram::new(&[]).spread(), 0);
    }

    #[test]
    fn test_turns_is_transpose() {
        let turns = sample_map().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], vec![Some(n("a")), Some(n("a")), Some(n("b"))]);
        assert_eq!(turns[1], vec![Some(n("b")), Some(n("c")), None]);
    }

    #[test]
    fn test_histograms_per_turn() {
        let hists = sample_map().histograms(&nodes(&["a", "b", "c"]));
        assert_eq!(hists.len(), 2);
        assert_eq!(hists[0].count(&n("a")), Some(2));
        assert_eq!(hists[0].count(&n("b")), Some(1));
        assert_eq!(hists[0].count(&n("c")), Some(0));
        assert_eq!(hists[1].count(&n("b")), Some(1));
        assert_eq!(hists[1].count(&n("c")), Some(1));
    }

    #[test]
    fn test_histograms_omit_foreign_nodes() {
        // b appears in the map but is not a candidate
        let hists = sample_map().histograms(&nodes(&["a", "c"]));
        assert_eq!(hists[0].count(&n("b")), None);
        assert_eq!(hists[0].count(&n("a")), Some(2));
    }

    #[test]
    fn test_histogram_serialization() {
        let mut hist = Histogram::new(&nodes(&["a", "b"]));
        hist.increment(&n("a"));
        let encoded = rmp_serde::to_vec(&hist).unwrap();
        let decoded: Histogram = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(hist, decoded);
    }
}
