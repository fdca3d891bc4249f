//! Rebalance orchestration for keel.
//!
//! The planning crate decides where vbuckets should live; this crate
//! makes it happen against a real cluster:
//!
//! - **External seams**: narrow async traits for the config store,
//!   cluster membership, engine readiness, the vbucket mover, the
//!   janitor and config replication
//! - **Bucket facade**: validated read/update access to bucket
//!   configuration through the store's atomic update primitive
//! - **Progress**: per-node fractional progress, scaled across buckets
//!   and fanned out to subscribers
//! - **Driver**: the cancellable, fixup-on-exit rebalance and failover
//!   sequencing

pub mod buckets;
pub mod external;
pub mod progress;
pub mod rebalance;
pub mod types;

pub use buckets::BucketAdmin;
pub use external::{
    ClusterMembership, ConfigReplication, ConfigStore, EngineReadiness, Janitor,
    MemoryConfigStore, MoverHandle, MoverOutcome, NodeProgress, ProgressFn, ProgressSink,
    ReplicationControl, VbucketMover,
};
pub use progress::{scale_progress, RebalanceProgressTracker};
pub use rebalance::{Collaborators, RebalanceConfig, Rebalancer, StopHandle};
pub use types::{AuthType, BucketConfig, BucketType};

use keel_plan::PlanError;
use thiserror::Error;

/// Orchestration error types
#[derive(Debug, Error)]
pub enum OrchError {
    /// Cooperative cancellation was observed; fixup has already run
    #[error("rebalance stopped")]
    Stopped,

    /// Engine nodes never reported readiness for a bucket
    #[error("timed out waiting for memcached on bucket {bucket}")]
    WaitForMemcachedFailed { bucket: String },

    /// The named bucket does not exist (or was deleted mid-operation)
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// A bucket with that name already exists
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    /// Bucket names are limited to `[A-Za-z0-9._%-]+` and may not be
    /// `.` or `..`
    #[error("invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    /// The requested proxy port collides with a service or another bucket
    #[error("port {0} already in use")]
    PortConflict(u16),

    /// The mover terminated with a failure reason
    #[error("mover failed: {0}")]
    Mover(String),

    /// The config store rejected or mangled an operation
    #[error("config store error: {0}")]
    Store(String),

    /// Invalid driver configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A planning primitive rejected its input
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Result type for keel-orch operations
pub type Result<T> = std::result::Result<T, OrchError>;
