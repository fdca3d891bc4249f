//! Bucket configuration model.

use keel_plan::{BucketView, NodeId, VbMap};
use serde::{Deserialize, Serialize};

/// Kind of bucket. Only `Membase` buckets have vbucket maps; `Memcached`
/// buckets locate keys through a client-side hash ring and stay out of
/// every map-manipulating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    Membase,
    Memcached,
}

/// How clients authenticate to the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Sasl,
    None,
}

/// Configuration record for one bucket, as stored in the cluster config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub bucket_type: BucketType,
    pub num_replicas: usize,
    pub num_vbuckets: usize,
    /// Nodes currently bound to this bucket
    pub servers: Vec<NodeId>,
    /// The vbucket map; absent before first placement and for memcached
    /// buckets always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<VbMap>,
    pub ram_quota_mb: u64,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
}

impl BucketConfig {
    /// Create a replicated bucket config with no map yet
    #[must_use]
    pub fn membase(
        name: impl Into<String>,
        num_replicas: usize,
        num_vbuckets: usize,
        ram_quota_mb: u64,
    ) -> Self {
        Self {
            name: name.into(),
            bucket_type: BucketType::Membase,
            num_replicas,
            num_vbuckets,
            servers: Vec::new(),
            map: None,
            ram_quota_mb,
            auth_type: AuthType::default(),
            sasl_password: None,
            proxy_port: None,
        }
    }

    /// Create a cache bucket config
    #[must_use]
    pub fn memcached(name: impl Into<String>, ram_quota_mb: u64, proxy_port: u16) -> Self {
        Self {
            name: name.into(),
            bucket_type: BucketType::Memcached,
            num_replicas: 0,
            num_vbuckets: 0,
            servers: Vec::new(),
            map: None,
            ram_quota_mb,
            auth_type: AuthType::None,
            sasl_password: None,
            proxy_port: Some(proxy_port),
        }
    }

    /// Check whether this bucket participates in vbucket planning
    #[inline]
    #[must_use]
    pub fn is_membase(&self) -> bool {
        self.bucket_type == BucketType::Membase
    }

    /// Check whether a map has been placed for this bucket yet
    #[inline]
    #[must_use]
    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    /// The classifier's view of this bucket
    #[must_use]
    pub fn safety_view(&self) -> BucketView<'_> {
        BucketView {
            num_replicas: self.num_replicas,
            servers: &self.servers,
            map: self.map.as_ref(),
        }
    }
}
