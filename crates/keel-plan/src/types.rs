//! Core data model for vbucket layouts.
//!
//! A [`VbMap`] is an ordered sequence of [`Chain`]s, one per vbucket. Every
//! chain has the same length; slot 0 is the master, the remaining slots are
//! replicas in priority order. An empty slot (`None`) means no node is
//! assigned there yet.

use crate::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a cluster node, conventionally in `host:port` form.
///
/// Node identities are opaque to the planner; they are only compared,
/// hashed and echoed back in plans and wire encodings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a `NodeId` from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The ordered node chain serving one vbucket.
///
/// Slot 0 is the master; slots `1..` are replicas in priority order.
/// `None` marks a slot with no node assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(pub Vec<Option<NodeId>>);

impl Chain {
    /// Number of slots (masters plus replicas)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the chain has no slots at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The node currently serving as master, if any
    #[must_use]
    pub fn master(&self) -> Option<&NodeId> {
        self.0.first().and_then(Option::as_ref)
    }

    /// The slots of the chain, master first
    #[must_use]
    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.0
    }

    /// The replica slots, in priority order
    #[must_use]
    pub fn replicas(&self) -> &[Option<NodeId>] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// The node at a given turn, if the slot exists and is filled
    #[must_use]
    pub fn node_at(&self, turn: usize) -> Option<&NodeId> {
        self.0.get(turn).and_then(Option::as_ref)
    }

    /// Return a copy of the chain with slot `turn` replaced
    ///
    /// Out-of-range turns leave the chain unchanged.
    #[must_use]
    pub fn replace_at(&self, turn: usize, new: Option<NodeId>) -> Chain {
        let mut slots = self.0.clone();
        if let Some(slot) = slots.get_mut(turn) {
            *slot = new;
        }
        Chain(slots)
    }

    /// Iterate over the nodes present in the chain
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter().filter_map(Option::as_ref)
    }

    /// Check whether any node appears in more than one slot
    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.nodes().any(|n| !seen.insert(n))
    }

    /// Count how many of the chain's nodes are in `live`
    #[must_use]
    pub fn live_copies(&self, live: &BTreeSet<NodeId>) -> usize {
        self.nodes().filter(|n| live.contains(*n)).count()
    }
}

/// A vbucket map: one chain per vbucket, indexed by vbucket id.
///
/// All chains have identical length. The map is plain data; mutation
/// happens through the planning functions and [`VbMap::apply_move`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VbMap {
    pub(crate) chains: Vec<Chain>,
}

impl VbMap {
    /// Build a map from chains, validating uniform chain length
    pub fn new(chains: Vec<Chain>) -> Result<Self> {
        if let Some(first) = chains.first() {
            let expected = first.len();
            for (vbucket, chain) in chains.iter().enumerate() {
                if chain.len() != expected {
                    return Err(PlanError::RaggedChain {
                        vbucket,
                        found: chain.len(),
                        expected,
                    });
                }
            }
        }
        Ok(Self { chains })
    }

    /// Number of vbuckets in the map
    #[inline]
    #[must_use]
    pub fn num_vbuckets(&self) -> usize {
        self.chains.len()
    }

    /// Chain length (replica count plus one); zero for an empty map
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.chains.first().map_or(0, Chain::len)
    }

    /// All chains, in vbucket order
    #[must_use]
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// The chain for a single vbucket
    #[must_use]
    pub fn chain(&self, vbucket: usize) -> Option<&Chain> {
        self.chains.get(vbucket)
    }

    /// Every node that appears anywhere in the map
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.chains
            .iter()
            .flat_map(|c| c.nodes().cloned())
            .collect()
    }

    /// Replace slot `turn` of chain `vbucket` with `new` and clear every
    /// deeper slot.
    ///
    /// Slots past the one just changed no longer hold valid data until
    /// replica repair runs, so they are reset to empty.
    pub fn apply_move(&mut self, turn: usize, vbucket: usize, new: NodeId) -> Result<()> {
        let chain_len = self.chain_len();
        if turn >= chain_len {
            return Err(PlanError::TurnOutOfRange { turn, chain_len });
        }
        let chain = self
            .chains
            .get_mut(vbucket)
            .ok_or(PlanError::VbucketOutOfRange(vbucket))?;
        chain.0[turn] = Some(new);
        for slot in chain.0.iter_mut().skip(turn + 1) {
            *slot = None;
        }
        Ok(())
    }
}

/// A single planned reassignment: for one vbucket, at a turn carried by
/// the caller, replace `old` with `new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// Vbucket the move applies to
    pub vbucket: usize,
    /// Node being replaced (`None` when the slot was empty)
    pub old: Option<NodeId>,
    /// Node taking over the slot
    pub new: NodeId,
}

impl Move {
    /// Create a new move
    #[must_use]
    pub fn new(vbucket: usize, old: Option<NodeId>, new: NodeId) -> Self {
        Self { vbucket, old, new }
    }
}
