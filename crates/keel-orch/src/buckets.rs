//! Bucket config facade: narrow, validated access to the `buckets`
//! section of the cluster config.
//!
//! All mutation goes through the store's atomic update of the `configs`
//! list, so concurrent writers never see torn bucket lists. The facade
//! owns the validation rules for bucket creation; nothing here touches
//! maps beyond storing them.

use crate::external::{ConfigStore, ConfigValue};
use crate::types::{BucketConfig, BucketType};
use crate::{OrchError, Result};
use keel_plan::{NodeId, VbMap};
use std::sync::Arc;

/// Config key holding everything bucket-related.
pub const BUCKETS_KEY: &str = "buckets";

/// Property of [`BUCKETS_KEY`] holding the ordered bucket config list.
pub const CONFIGS_PROP: &str = "configs";

/// Read/update API over the bucket section of the config store.
#[derive(Clone)]
pub struct BucketAdmin {
    store: Arc<dyn ConfigStore>,
    /// Ports owned by node-local services (data engine, proxy, admin
    /// web); bucket proxy ports may not collide with these
    reserved_ports: Arc<[u16]>,
}

impl BucketAdmin {
    /// Create a facade over a config store
    pub fn new(store: Arc<dyn ConfigStore>, reserved_ports: impl Into<Arc<[u16]>>) -> Self {
        Self {
            store,
            reserved_ports: reserved_ports.into(),
        }
    }

    /// All bucket configs, in stable stored order
    pub async fn get_buckets(&self) -> Result<Vec<BucketConfig>> {
        match self.store.search_prop(BUCKETS_KEY, CONFIGS_PROP).await {
            None => Ok(Vec::new()),
            Some(value) => decode_configs(value),
        }
    }

    /// One bucket config by name
    pub async fn get_bucket(&self, name: &str) -> Result<BucketConfig> {
        self.get_buckets()
            .await?
            .into_iter()
            .find(|b| b.name == name)
            .ok_or_else(|| OrchError::BucketNotFound(name.to_string()))
    }

    /// Store a new vbucket map for a bucket
    pub async fn set_map(&self, name: &str, map: &VbMap) -> Result<()> {
        let map = map.clone();
        self.update_bucket(name, move |bucket| {
            bucket.map = Some(map.clone());
        })
        .await
    }

    /// Replace a bucket's server list
    pub async fn set_servers(&self, name: &str, servers: &[NodeId]) -> Result<()> {
        let servers = servers.to_vec();
        self.update_bucket(name, move |bucket| {
            bucket.servers = servers.clone();
        })
        .await
    }

    /// Merge JSON properties into a bucket's stored config.
    ///
    /// When `bucket_type` is given, a bucket of a different type is
    /// treated as not found.
    pub async fn update_bucket_props(
        &self,
        bucket_type: Option<BucketType>,
        name: &str,
        props: serde_json::Map<String, ConfigValue>,
    ) -> Result<()> {
        let name = name.to_string();
        self.update_configs(move |mut configs| {
            let bucket = configs
                .iter_mut()
                .find(|b| b.name == name && bucket_type.map_or(true, |t| b.bucket_type == t))
                .ok_or_else(|| OrchError::BucketNotFound(name.clone()))?;
            let mut object = serde_json::to_value(&*bucket)
                .map_err(|e| OrchError::Store(e.to_string()))?;
            let fields = object
                .as_object_mut()
                .ok_or_else(|| OrchError::Store("bucket config is not an object".into()))?;
            for (key, value) in &props {
                fields.insert(key.clone(), value.clone());
            }
            *bucket = serde_json::from_value(object)
                .map_err(|e| OrchError::Store(e.to_string()))?;
            Ok(configs)
        })
        .await
    }

    /// Create a bucket after validating its name and proxy port
    pub async fn create_bucket(&self, config: BucketConfig) -> Result<()> {
        validate_bucket_name(&config.name)?;
        self.update_configs(move |mut configs| {
            if configs.iter().any(|b| b.name == config.name) {
                return Err(OrchError::BucketExists(config.name.clone()));
            }
            if let Some(port) = config.proxy_port {
                let taken = self.reserved_ports.contains(&port)
                    || configs.iter().any(|b| b.proxy_port == Some(port));
                if taken {
                    return Err(OrchError::PortConflict(port));
                }
            }
            configs.push(config.clone());
            Ok(configs)
        })
        .await
    }

    /// Remove a bucket entirely
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.update_configs(move |mut configs| {
            let before = configs.len();
            configs.retain(|b| b.name != name);
            if configs.len() == before {
                return Err(OrchError::BucketNotFound(name.clone()));
            }
            Ok(configs)
        })
        .await
    }

    async fn update_bucket(
        &self,
        name: &str,
        mutate: impl Fn(&mut BucketConfig) + Send + Sync,
    ) -> Result<()> {
        let name = name.to_string();
        self.update_configs(move |mut configs| {
            let bucket = configs
                .iter_mut()
                .find(|b| b.name == name)
                .ok_or_else(|| OrchError::BucketNotFound(name.clone()))?;
            mutate(bucket);
            Ok(configs)
        })
        .await
    }

    async fn update_configs(
        &self,
        apply: impl Fn(Vec<BucketConfig>) -> Result<Vec<BucketConfig>> + Send + Sync,
    ) -> Result<()> {
        self.store
            .update_sub_key(BUCKETS_KEY, CONFIGS_PROP, &|current| {
                let configs = if current.is_null() {
                    Vec::new()
                } else {
                    decode_configs(current)?
                };
                let next = apply(configs)?;
                serde_json::to_value(next).map_err(|e| OrchError::Store(e.to_string()))
            })
            .await
    }
}

fn decode_configs(value: ConfigValue) -> Result<Vec<BucketConfig>> {
    serde_json::from_value(value).map_err(|e| OrchError::Store(e.to_string()))
}

/// Check a bucket name against the allowed character set.
///
/// Names are limited to ASCII letters, digits, `.`, `_`, `%` and `-`,
/// and may not be the path components `.` or `..`.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let valid_chars = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '-'));
    if !valid_chars || name == "." || name == ".." {
        return Err(OrchError::InvalidBucketName(name.to_string()));
    }
    Ok(())
}
