//! Rebalance progress: per-bucket scaling and fan-out to subscribers.

use crate::external::{NodeProgress, ProgressSink};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Scale one bucket's per-node progress into cluster-wide progress.
///
/// Bucket `i` of `n` maps its local `0.0..=1.0` fraction into the
/// `[i/n, (i+1)/n]` slice of the whole rebalance.
#[must_use]
pub fn scale_progress(
    bucket_index: usize,
    bucket_count: usize,
    per_node: &NodeProgress,
) -> NodeProgress {
    if bucket_count == 0 {
        return NodeProgress::new();
    }
    per_node
        .iter()
        .map(|(node, fraction)| {
            let scaled = (bucket_index as f64 + fraction.clamp(0.0, 1.0)) / bucket_count as f64;
            (node.clone(), scaled)
        })
        .collect()
}

/// Snapshot-plus-subscription tracker for rebalance progress.
///
/// The driver pushes scaled per-node dictionaries; observers either read
/// the latest snapshot or subscribe for every update.
#[derive(Clone)]
pub struct RebalanceProgressTracker {
    latest: Arc<RwLock<NodeProgress>>,
    update_tx: broadcast::Sender<NodeProgress>,
}

impl RebalanceProgressTracker {
    /// Create a tracker with the default channel capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a tracker with a specific channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(capacity);
        Self {
            latest: Arc::new(RwLock::new(NodeProgress::new())),
            update_tx,
        }
    }

    /// The most recent progress dictionary
    #[must_use]
    pub fn snapshot(&self) -> NodeProgress {
        self.latest.read().clone()
    }

    /// Subscribe to every future progress update
    pub fn subscribe(&self) -> broadcast::Receiver<NodeProgress> {
        self.update_tx.subscribe()
    }
}

impl ProgressSink for RebalanceProgressTracker {
    fn update(&self, progress: &NodeProgress) {
        *self.latest.write() = progress.clone();
        let _ = self.update_tx.send(progress.clone());
    }
}

impl Default for RebalanceProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_plan::NodeId;

    fn n(id: &str) -> NodeId {
        NodeId::from(id)
    }

    fn progress(pairs: &[(&str, f64)]) -> NodeProgress {
        pairs.iter().map(|(id, f)| (n(id), *f)).collect()
    }

    #[test]
    fn test_scale_first_bucket() {
        let scaled = scale_progress(0, 2, &progress(&[("a", 0.5), ("b", 1.0)]));
        assert!((scaled[&n("a")] - 0.25).abs() < f64::EPSILON);
        assert!((scaled[&n("b")] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_last_bucket() {
        let scaled = scale_progress(1, 2, &progress(&[("a", 0.0)]));
        assert!((scaled[&n("a")] - 0.5).abs() < f64::EPSILON);

        let done = scale_progress(1, 2, &progress(&[("a", 1.0)]));
        assert!((done[&n("a")] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_clamps_out_of_range_fractions() {
        let scaled = scale_progress(0, 1, &progress(&[("a", 1.5), ("b", -0.5)]));
        assert!((scaled[&n("a")] - 1.0).abs() < f64::EPSILON);
        assert!(scaled[&n("b")].abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_zero_buckets() {
        assert!(scale_progress(0, 0, &progress(&[("a", 0.5)])).is_empty());
    }

    #[test]
    fn test_tracker_snapshot() {
        let tracker = RebalanceProgressTracker::new();
        assert!(tracker.snapshot().is_empty());

        tracker.update(&progress(&[("a", 0.3)]));
        let snap = tracker.snapshot();
        assert!((snap[&n("a")] - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_tracker_subscription() {
        let tracker = RebalanceProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.update(&progress(&[("a", 0.1)]));
        tracker.update(&progress(&[("a", 0.2)]));

        let first = rx.recv().await.unwrap();
        assert!((first[&n("a")] - 0.1).abs() < f64::EPSILON);
        let second = rx.recv().await.unwrap();
        assert!((second[&n("a")] - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_without_subscribers_is_fine() {
        let tracker = RebalanceProgressTracker::new();
        tracker.update(&progress(&[("a", 0.9)]));
        assert_eq!(tracker.snapshot().len(), 1);
    }
}
