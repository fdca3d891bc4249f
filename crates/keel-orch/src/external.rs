//! Seams to the external collaborators the driver consumes.
//!
//! Everything the orchestration layer needs from the rest of the cluster
//! comes in through these traits: the shared config store, cluster
//! membership, per-node engine readiness, the long-running vbucket mover,
//! the janitor and config replication. Keeping the seams narrow lets the
//! driver run unchanged against the real cluster or against in-process
//! fakes in tests.

use crate::{OrchError, Result};
use async_trait::async_trait;
use keel_plan::{Move, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Value model of the shared cluster config.
pub type ConfigValue = serde_json::Value;

/// Atomic update callback: receives the current value (JSON `null` when
/// the key is absent) and returns the replacement. The store may retry
/// the callback when a concurrent writer wins the CAS.
pub type UpdateFn<'a> = &'a (dyn Fn(ConfigValue) -> Result<ConfigValue> + Send + Sync);

/// The shared cluster configuration store.
///
/// Writes are linearizable: each mutation runs the caller's function
/// under an atomic compare-and-swap.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the value under a key
    async fn get(&self, key: &str) -> Option<ConfigValue>;

    /// Read one property of an object-valued key
    async fn search_prop(&self, key: &str, subkey: &str) -> Option<ConfigValue>;

    /// Atomically replace the value under a key
    async fn update_key(&self, key: &str, update: UpdateFn<'_>) -> Result<()>;

    /// Atomically replace one property of an object-valued key
    async fn update_sub_key(&self, key: &str, subkey: &str, update: UpdateFn<'_>) -> Result<()>;
}

/// Cluster membership operations.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// The node this driver runs on
    fn local_node(&self) -> NodeId;

    /// Nodes currently active in the cluster
    async fn actual_active_nodes(&self) -> Vec<NodeId>;

    /// Mark nodes inactive; they stop taking new traffic
    async fn deactivate(&self, nodes: &[NodeId]);

    /// Remove a node from the cluster entirely
    async fn leave(&self, node: &NodeId);
}

/// Per-node data engine readiness.
#[async_trait]
pub trait EngineReadiness: Send + Sync {
    /// Whether the engine on `node` is serving the named bucket
    async fn connected(&self, node: &NodeId, bucket: &str) -> bool;
}

/// Per-node fractional progress, `0.0..=1.0`.
pub type NodeProgress = HashMap<NodeId, f64>;

/// Callback the mover invokes with per-node progress as it works.
pub type ProgressFn = Arc<dyn Fn(NodeProgress) + Send + Sync>;

/// How a mover run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoverOutcome {
    /// All moves performed
    Completed,
    /// The mover observed a stop request and quit at a safe point
    Stopped,
    /// The mover gave up; the reason is surfaced verbatim
    Failed(String),
}

/// Handle to one running batch of moves.
#[async_trait]
pub trait MoverHandle: Send {
    /// Ask the mover to stop at its next vbucket boundary; the run then
    /// finishes with [`MoverOutcome::Stopped`]
    fn stop(&self);

    /// Wait for the run to finish. Must be cancel-safe: dropping the
    /// future and calling `join` again still yields the outcome.
    async fn join(&mut self) -> MoverOutcome;
}

/// The external vbucket mover: performs the actual data migration for a
/// batch of moves, one vbucket at a time.
#[async_trait]
pub trait VbucketMover: Send + Sync {
    /// Begin moving; returns immediately with a handle
    async fn start(
        &self,
        bucket: &str,
        moves: Vec<Move>,
        progress: ProgressFn,
    ) -> Result<Box<dyn MoverHandle>>;
}

/// Post-move sanity pass over a bucket's engine state. Idempotent.
#[async_trait]
pub trait Janitor: Send + Sync {
    async fn cleanup(&self, bucket: &str) -> Result<()>;
}

/// Control over inbound replication streams for a bucket.
#[async_trait]
pub trait ReplicationControl: Send + Sync {
    /// Tear down inbound replication before the layout changes
    async fn disable_inbound(&self, bucket: &str) -> Result<()>;
}

/// Replication of the cluster config itself.
#[async_trait]
pub trait ConfigReplication: Send + Sync {
    /// Kick off asynchronous propagation of the latest config
    async fn push(&self);

    /// Block until peers acknowledge the latest config
    async fn synchronize(&self) -> Result<()>;
}

/// Receiver for scaled per-node rebalance progress.
pub trait ProgressSink: Send + Sync {
    fn update(&self, progress: &NodeProgress);
}

/// In-memory [`ConfigStore`] for tests and single-process embedding.
///
/// A process-wide lock stands in for the real store's CAS; callbacks
/// never get retried here.
#[derive(Default)]
pub struct MemoryConfigStore {
    data: RwLock<HashMap<String, ConfigValue>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Option<ConfigValue> {
        self.data.read().get(key).cloned()
    }

    async fn search_prop(&self, key: &str, subkey: &str) -> Option<ConfigValue> {
        self.data
            .read()
            .get(key)
            .and_then(|value| value.get(subkey))
            .cloned()
    }

    async fn update_key(&self, key: &str, update: UpdateFn<'_>) -> Result<()> {
        let mut data = self.data.write();
        let current = data.get(key).cloned().unwrap_or(ConfigValue::Null);
        let next = update(current)?;
        data.insert(key.to_string(), next);
        Ok(())
    }

    async fn update_sub_key(&self, key: &str, subkey: &str, update: UpdateFn<'_>) -> Result<()> {
        let mut data = self.data.write();
        let mut current = data
            .get(key)
            .cloned()
            .unwrap_or_else(|| ConfigValue::Object(serde_json::Map::new()));
        let object = current
            .as_object_mut()
            .ok_or_else(|| OrchError::Store(format!("key {key:?} is not an object")))?;
        let prop = object.remove(subkey).unwrap_or(ConfigValue::Null);
        let next = update(prop)?;
        object.insert(subkey.to_string(), next);
        data.insert(key.to_string(), current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_get_missing() {
        let store = MemoryConfigStore::new();
        assert!(store.get("nodes").await.is_none());
        assert!(store.search_prop("nodes", "active").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_update_key() {
        let store = MemoryConfigStore::new();
        store
            .update_key("counter", &|current| {
                let n = current.as_u64().unwrap_or(0);
                Ok(json!(n + 1))
            })
            .await
            .unwrap();
        assert_eq!(store.get("counter").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_memory_store_update_sub_key() {
        let store = MemoryConfigStore::new();
        store
            .update_sub_key("buckets", "configs", &|_| Ok(json!(["default"])))
            .await
            .unwrap();
        assert_eq!(
            store.search_prop("buckets", "configs").await,
            Some(json!(["default"]))
        );
        // sibling properties survive further updates
        store
            .update_sub_key("buckets", "rev", &|_| Ok(json!(7)))
            .await
            .unwrap();
        assert_eq!(
            store.search_prop("buckets", "configs").await,
            Some(json!(["default"]))
        );
    }

    #[tokio::test]
    async fn test_memory_store_update_error_leaves_value() {
        let store = MemoryConfigStore::new();
        store.update_key("k", &|_| Ok(json!("v"))).await.unwrap();
        let err = store
            .update_key("k", &|_| Err(OrchError::Store("nope".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::Store(_)));
        assert_eq!(store.get("k").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_memory_store_sub_key_on_non_object() {
        let store = MemoryConfigStore::new();
        store.update_key("k", &|_| Ok(json!(42))).await.unwrap();
        let err = store
            .update_sub_key("k", "sub", &|v| Ok(v))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::Store(_)));
    }
}
