//! Vbucket layout planning for a sharded, replicated key-value cluster.
//!
//! Each bucket partitions its keyspace into a fixed number of vbuckets;
//! every vbucket is served by an ordered chain of nodes (a master followed
//! by replicas in priority order). This crate computes layouts and layout
//! transitions without performing any I/O:
//!
//! - **Map primitives**: chains, maps, per-turn histograms
//! - **Initial placement**: deterministic round-robin map generation
//! - **Balancing**: master evacuation and single-turn peak shaving
//! - **Replica repair**: filling holes and evicting ejected nodes
//! - **Failover**: replica promotion with data-loss accounting
//! - **Safety**: how well the current layout survives further failures
//!
//! Everything here is pure and deterministic; the companion orchestration
//! crate owns data movement, cancellation and config commits.

pub mod balance;
pub mod failover;
pub mod map;
pub mod place;
pub mod repair;
pub mod safety;
pub mod types;
pub mod wire;

pub use balance::{balance_nodes, master_moves, DEFAULT_BALANCE_GAP};
pub use failover::{failover, FailoverOutcome};
pub use map::Histogram;
pub use place::generate_initial_map;
pub use repair::new_replicas;
pub use safety::{
    bucket_safety, failover_warnings, min_live_copies, unbalanced, BucketSafety, BucketView,
    SafetyWarning, DEFAULT_UNBALANCE_GAP,
};
pub use types::{Chain, Move, NodeId, VbMap};
pub use wire::VbMapJson;

use thiserror::Error;

/// Planning error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A map was constructed from chains of unequal length
    #[error("ragged map: chain {vbucket} has length {found}, expected {expected}")]
    RaggedChain {
        vbucket: usize,
        found: usize,
        expected: usize,
    },

    /// A vbucket id does not exist in the map
    #[error("vbucket {0} out of range")]
    VbucketOutOfRange(usize),

    /// A turn index does not exist in the chains of this map
    #[error("turn {turn} out of range for chain length {chain_len}")]
    TurnOutOfRange { turn: usize, chain_len: usize },
}

/// Result type for keel-plan operations
pub type Result<T> = std::result::Result<T, PlanError>;
