//! The rebalance driver.
//!
//! One driver instance runs one cluster-wide rebalance; the surrounding
//! orchestrator guarantees there is never more than one. Buckets are
//! processed strictly one at a time to avoid overloading the engines.
//! Within a bucket the phase order is fixed: master moves through the
//! external mover, first-replica balancing through the mover, replica
//! repair and commit, then pure map-level balancing for deeper turns.
//!
//! Cancellation is cooperative. A stop request takes effect at the
//! explicit checks between phases and inside both waits (engine
//! readiness polling and the mover). Whenever the driver has touched a
//! bucket's map and cannot finish, it runs **fixup**: repair replicas
//! against the eject set, commit the map, and restore a server list that
//! keeps every involved node bound to the bucket. Stop requests during
//! fixup are ignored; fixup must complete.

use crate::buckets::BucketAdmin;
use crate::external::{MoverOutcome, ProgressFn};
use crate::progress::scale_progress;
use crate::types::{BucketConfig, BucketType};
use crate::{
    ClusterMembership, ConfigReplication, EngineReadiness, Janitor, OrchError, ProgressSink,
    ReplicationControl, Result, VbucketMover,
};
use keel_plan::{
    balance, failover, generate_initial_map, new_replicas, Move, NodeId, DEFAULT_BALANCE_GAP,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tunables for the rebalance driver.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// Engine readiness polling rounds before giving up
    pub readiness_attempts: u32,
    /// Delay between readiness polling rounds
    pub readiness_interval: Duration,
    /// Acceptable histogram spread when balancing a turn
    pub balance_gap: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            readiness_attempts: 10,
            readiness_interval: Duration::from_secs(1),
            balance_gap: DEFAULT_BALANCE_GAP,
        }
    }
}

impl RebalanceConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.readiness_attempts == 0 {
            return Err(OrchError::InvalidConfig(
                "readiness_attempts must be greater than 0".to_string(),
            ));
        }
        if self.readiness_interval.is_zero() {
            return Err(OrchError::InvalidConfig(
                "readiness_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// External collaborators the driver works through.
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn ClusterMembership>,
    pub readiness: Arc<dyn EngineReadiness>,
    pub mover: Arc<dyn VbucketMover>,
    pub janitor: Arc<dyn Janitor>,
    pub replication: Arc<dyn ReplicationControl>,
    pub config_replication: Arc<dyn ConfigReplication>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Cloneable handle that requests cooperative cancellation.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the driver to stop at its next safe point
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Drives one full cluster rebalance or failover.
pub struct Rebalancer {
    config: RebalanceConfig,
    buckets: BucketAdmin,
    deps: Collaborators,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Rebalancer {
    /// Create a driver over the given facade and collaborators
    pub fn new(config: RebalanceConfig, buckets: BucketAdmin, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            buckets,
            deps,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    /// A handle that can cancel this driver from another task
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Run a full rebalance: keep `keep_nodes`, drain and remove
    /// `eject_nodes`, and drop `failed_nodes` from membership.
    ///
    /// Returns [`OrchError::Stopped`] if cancelled; fixup has already run
    /// by the time that surfaces.
    pub async fn run(
        &self,
        keep_nodes: &[NodeId],
        eject_nodes: &[NodeId],
        failed_nodes: &[NodeId],
    ) -> Result<()> {
        info!(
            keep = keep_nodes.len(),
            eject = eject_nodes.len(),
            failed = failed_nodes.len(),
            "starting rebalance"
        );
        let result = self.run_inner(keep_nodes, eject_nodes, failed_nodes).await;
        if result.is_err() {
            let local = self.deps.membership.local_node();
            if failed_nodes.contains(&local) {
                // best effort: this node is being failed out of the
                // cluster itself
                self.deps.membership.leave(&local).await;
            }
        }
        result
    }

    async fn run_inner(
        &self,
        keep_nodes: &[NodeId],
        eject_nodes: &[NodeId],
        failed_nodes: &[NodeId],
    ) -> Result<()> {
        let local = self.deps.membership.local_node();

        // failed nodes go first; self is deferred to the very end
        let early: Vec<NodeId> = failed_nodes
            .iter()
            .filter(|n| **n != local)
            .cloned()
            .collect();
        if !early.is_empty() {
            self.deps.membership.deactivate(&early).await;
            for node in &early {
                self.deps.membership.leave(node).await;
            }
        }

        let buckets = self.buckets.get_buckets().await?;
        let count = buckets.len();
        for (index, bucket) in buckets.iter().enumerate() {
            self.check_stop()?;
            match bucket.bucket_type {
                BucketType::Memcached => {
                    self.buckets.set_servers(&bucket.name, keep_nodes).await?;
                }
                BucketType::Membase => {
                    self.rebalance_bucket(index, count, bucket, keep_nodes, eject_nodes)
                        .await?;
                }
            }
        }

        self.deps.config_replication.synchronize().await?;

        let mut departing: Vec<NodeId> = Vec::new();
        for node in eject_nodes.iter().chain(failed_nodes) {
            if !departing.contains(node) {
                departing.push(node.clone());
            }
        }
        if !departing.is_empty() {
            self.deps.membership.deactivate(&departing).await;
            for node in departing.iter().filter(|n| **n != local) {
                self.deps.membership.leave(node).await;
            }
            if departing.contains(&local) {
                self.deps.membership.leave(&local).await;
            }
        }
        info!("rebalance complete");
        Ok(())
    }

    /// Fail the given nodes out of every bucket: promote replicas on
    /// replicated buckets and shrink server lists everywhere.
    ///
    /// Losing the last copy of a vbucket is logged, not treated as an
    /// error; the cluster must come back with whatever survived.
    pub async fn failover_nodes(&self, failed_nodes: &[NodeId]) -> Result<()> {
        let failed: BTreeSet<NodeId> = failed_nodes.iter().cloned().collect();
        for bucket in self.buckets.get_buckets().await? {
            let survivors: Vec<NodeId> = bucket
                .servers
                .iter()
                .filter(|n| !failed.contains(*n))
                .cloned()
                .collect();
            if bucket.is_membase() {
                if let Some(map) = &bucket.map {
                    let outcome = failover(map, &failed);
                    if outcome.lost_vbuckets > 0 {
                        warn!(
                            bucket = %bucket.name,
                            lost = outcome.lost_vbuckets,
                            percent = outcome.lost_ratio() * 100.0,
                            "failover lost the last copy of some vbuckets"
                        );
                    }
                    self.buckets.set_map(&bucket.name, &outcome.map).await?;
                }
            }
            self.buckets.set_servers(&bucket.name, &survivors).await?;
        }
        self.deps.config_replication.push().await;
        Ok(())
    }

    async fn rebalance_bucket(
        &self,
        index: usize,
        count: usize,
        bucket: &BucketConfig,
        keep_nodes: &[NodeId],
        eject_nodes: &[NodeId],
    ) -> Result<()> {
        let name = bucket.name.as_str();
        info!(bucket = name, index, count, "rebalancing bucket");

        self.deps.replication.disable_inbound(name).await?;

        // every involved node serves the bucket while data moves
        let all_nodes = union(keep_nodes, eject_nodes);
        self.buckets.set_servers(name, &all_nodes).await?;

        let phases = async {
            self.wait_for_engines(name, &all_nodes).await?;
            self.deps.janitor.cleanup(name).await?;
            self.check_stop()?;
            self.move_and_balance(index, count, bucket, keep_nodes, eject_nodes)
                .await
        };
        match phases.await {
            Ok(()) => Ok(()),
            Err(err) => {
                // readiness timeouts abort before any data has moved for
                // this bucket; everything else gets the cleanup pass
                if !matches!(err, OrchError::WaitForMemcachedFailed { .. }) {
                    self.fixup(name, keep_nodes, eject_nodes).await;
                }
                Err(err)
            }
        }
    }

    async fn move_and_balance(
        &self,
        index: usize,
        count: usize,
        bucket: &BucketConfig,
        keep_nodes: &[NodeId],
        eject_nodes: &[NodeId],
    ) -> Result<()> {
        let name = bucket.name.as_str();
        let keep_set: BTreeSet<NodeId> = keep_nodes.iter().cloned().collect();
        let eject_set: BTreeSet<NodeId> = eject_nodes.iter().cloned().collect();

        let mut map = match &bucket.map {
            Some(map) => map.clone(),
            None => {
                // first placement for a never-mapped bucket
                let map =
                    generate_initial_map(bucket.num_replicas, bucket.num_vbuckets, keep_nodes);
                self.buckets.set_map(name, &map).await?;
                map
            }
        };
        if map.chain_len() == 0 {
            self.buckets.set_servers(name, keep_nodes).await?;
            return Ok(());
        }

        // masters leave every node that is not staying
        let evacuate: BTreeSet<NodeId> = map
            .nodes()
            .into_iter()
            .filter(|n| !keep_set.contains(n))
            .collect();
        let mut hists = map.histograms(keep_nodes);
        let moves = balance::master_moves(&map, &evacuate, &mut hists[0]);
        if !moves.is_empty() {
            debug!(bucket = name, moves = moves.len(), "moving masters");
            self.run_mover(index, count, name, moves.clone()).await?;
            for mv in &moves {
                map.apply_move(0, mv.vbucket, mv.new.clone())?;
            }
        }
        self.check_stop()?;

        if map.chain_len() > 1 {
            let mut hists = map.histograms(keep_nodes);
            let moves = balance::balance_nodes(&map, &mut hists[1], 1, self.config.balance_gap);
            if !moves.is_empty() {
                debug!(
                    bucket = name,
                    moves = moves.len(),
                    "balancing first replicas"
                );
                self.run_mover(index, count, name, moves.clone()).await?;
                for mv in &moves {
                    map.apply_move(1, mv.vbucket, mv.new.clone())?;
                }
            }
            self.check_stop()?;
        }

        let mut hists = map.histograms(keep_nodes);
        map = new_replicas(&map, &eject_set, &mut hists);
        self.buckets.set_map(name, &map).await?;
        self.check_stop()?;

        // deeper turns are pure map updates; repair reassigns the slots
        // the rewrite clears, so no data needs to move
        for turn in 2..map.chain_len() {
            let mut hists = map.histograms(keep_nodes);
            let moves = balance::balance_nodes(&map, &mut hists[turn], turn, self.config.balance_gap);
            for mv in &moves {
                map.apply_move(turn, mv.vbucket, mv.new.clone())?;
            }
            let mut hists = map.histograms(keep_nodes);
            map = new_replicas(&map, &eject_set, &mut hists);
            self.check_stop()?;
        }

        self.buckets.set_map(name, &map).await?;
        self.buckets.set_servers(name, keep_nodes).await?;
        self.deps.config_replication.push().await;
        info!(bucket = name, "bucket rebalanced");
        Ok(())
    }

    async fn run_mover(
        &self,
        index: usize,
        count: usize,
        bucket: &str,
        moves: Vec<Move>,
    ) -> Result<()> {
        let sink = Arc::clone(&self.deps.progress);
        let progress: ProgressFn = Arc::new(move |per_node| {
            sink.update(&scale_progress(index, count, &per_node));
        });
        let mut handle = self.deps.mover.start(bucket, moves, progress).await?;

        let mut stop_rx = self.stop_rx.clone();
        let outcome = {
            let join = handle.join();
            tokio::pin!(join);
            tokio::select! {
                outcome = &mut join => Some(outcome),
                () = wait_for_stop(&mut stop_rx) => None,
            }
        };
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                // forward the stop; the mover quits at its next vbucket
                handle.stop();
                handle.join().await
            }
        };

        match outcome {
            MoverOutcome::Completed => Ok(()),
            MoverOutcome::Stopped => Err(OrchError::Stopped),
            MoverOutcome::Failed(reason) => Err(OrchError::Mover(reason)),
        }
    }

    async fn wait_for_engines(&self, bucket: &str, nodes: &[NodeId]) -> Result<()> {
        let attempts = self.config.readiness_attempts;
        for attempt in 1..=attempts {
            self.check_stop()?;
            let mut ready = true;
            for node in nodes {
                if !self.deps.readiness.connected(node, bucket).await {
                    ready = false;
                    break;
                }
            }
            if ready {
                return Ok(());
            }
            debug!(bucket, attempt, "engines not ready yet");
            if attempt == attempts {
                break;
            }
            let mut stop_rx = self.stop_rx.clone();
            tokio::select! {
                () = sleep(self.config.readiness_interval) => {}
                () = wait_for_stop(&mut stop_rx) => return Err(OrchError::Stopped),
            }
        }
        Err(OrchError::WaitForMemcachedFailed {
            bucket: bucket.to_string(),
        })
    }

    /// Leave the bucket operable after an interrupted rebalance: repair
    /// replicas against the eject set off the last committed map and
    /// keep every involved node bound to the bucket.
    ///
    /// Stop requests are ignored here.
    async fn fixup(&self, bucket: &str, keep_nodes: &[NodeId], eject_nodes: &[NodeId]) {
        info!(bucket, "running fixup");
        let config = match self.buckets.get_bucket(bucket).await {
            Ok(config) => config,
            Err(err) => {
                warn!(bucket, error = %err, "fixup could not read bucket config");
                return;
            }
        };
        if let Some(map) = &config.map {
            let eject_set: BTreeSet<NodeId> = eject_nodes.iter().cloned().collect();
            let mut hists = map.histograms(keep_nodes);
            let repaired = new_replicas(map, &eject_set, &mut hists);
            if let Err(err) = self.buckets.set_map(bucket, &repaired).await {
                warn!(bucket, error = %err, "fixup could not commit repaired map");
            }
        }
        let all_nodes = union(keep_nodes, eject_nodes);
        if let Err(err) = self.buckets.set_servers(bucket, &all_nodes).await {
            warn!(bucket, error = %err, "fixup could not restore server list");
        }
    }

    fn check_stop(&self) -> Result<()> {
        if *self.stop_rx.borrow() {
            Err(OrchError::Stopped)
        } else {
            Ok(())
        }
    }
}

fn union(left: &[NodeId], right: &[NodeId]) -> Vec<NodeId> {
    let mut nodes = left.to_vec();
    for node in right {
        if !nodes.contains(node) {
            nodes.push(node.clone());
        }
    }
    nodes
}

async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // sender gone without a stop request: never resolve
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RebalanceConfig::default();
        assert_eq!(config.readiness_attempts, 10);
        assert_eq!(config.readiness_interval, Duration::from_secs(1));
        assert_eq!(config.balance_gap, DEFAULT_BALANCE_GAP);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let no_attempts = RebalanceConfig {
            readiness_attempts: 0,
            ..Default::default()
        };
        assert!(no_attempts.validate().is_err());

        let no_interval = RebalanceConfig {
            readiness_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(no_interval.validate().is_err());
    }

    #[test]
    fn test_union_dedups_preserving_order() {
        let left = [NodeId::from("a"), NodeId::from("b")];
        let right = [NodeId::from("b"), NodeId::from("c")];
        assert_eq!(
            union(&left, &right),
            vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]
        );
    }

    #[tokio::test]
    async fn test_wait_for_stop_sees_prior_request() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        // resolves immediately instead of waiting for another change
        wait_for_stop(&mut rx).await;
    }
}
