//! Batch status aggregation — concurrent fan-out across the fleet.
//!
//! Model-status and GPU-status requests are issued for every node
//! concurrently; a failing node contributes empty lists for its entry
//! instead of aborting the batch. Result completeness is guaranteed:
//! every requested node key has an entry in both maps.

use std::collections::{BTreeSet, HashMap};

use tokio::task::JoinSet;
use tracing::warn;

use fleet_state::{NodeKey, NodeRecord};

use crate::client::{GpuStatus, ModelInstanceStatus};
use crate::pool::NodeClientPool;

/// Live fleet snapshot: per-node running instances and GPU status.
#[derive(Debug, Default)]
pub struct FleetStatus {
    pub instances: HashMap<NodeKey, Vec<ModelInstanceStatus>>,
    pub gpus: HashMap<NodeKey, Vec<GpuStatus>>,
}

impl FleetStatus {
    /// Count running instances per model name across the whole fleet.
    pub fn running_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for instances in self.instances.values() {
            for instance in instances {
                *counts.entry(instance.model_name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// GPU ids occupied by a running instance on the given node.
    pub fn used_gpus(&self, node_key: &str) -> BTreeSet<u32> {
        self.instances
            .get(node_key)
            .map(|instances| instances.iter().map(|i| i.gpu_id).collect())
            .unwrap_or_default()
    }
}

/// Concurrently fetch model and GPU status for every node.
///
/// Per-node failures are isolated: the failing node's entries stay
/// empty and every other node's results are returned.
pub async fn batch_status(pool: &NodeClientPool, nodes: &[NodeRecord]) -> FleetStatus {
    let mut status = FleetStatus::default();
    for node in nodes {
        status.instances.entry(node.node_key()).or_default();
        status.gpus.entry(node.node_key()).or_default();
    }

    let mut tasks = JoinSet::new();
    for node in nodes {
        let key = node.node_key();
        let client = match pool.client(&node.node_ip, node.node_port).await {
            Ok(client) => client,
            Err(e) => {
                warn!(node = %key, error = %e, "skipping node in status batch");
                continue;
            }
        };
        tasks.spawn(async move {
            let instances = match client.model_status().await {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(node = %key, error = %e, "model status unavailable");
                    Vec::new()
                }
            };
            let gpus = client.gpu_status().await;
            (key, instances, gpus)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, instances, gpus)) => {
                status.instances.insert(key.clone(), instances);
                status.gpus.insert(key, gpus);
            }
            Err(e) => warn!(error = %e, "status task panicked"),
        }
    }

    status
}

/// Concurrently health-check every node.
///
/// Nodes whose client cannot be built report `false`.
pub async fn batch_health(pool: &NodeClientPool, nodes: &[NodeRecord]) -> HashMap<NodeKey, bool> {
    let mut health = HashMap::new();
    for node in nodes {
        health.insert(node.node_key(), false);
    }

    let mut tasks = JoinSet::new();
    for node in nodes {
        let key = node.node_key();
        let client = match pool.client(&node.node_ip, node.node_port).await {
            Ok(client) => client,
            Err(e) => {
                warn!(node = %key, error = %e, "skipping node in health batch");
                continue;
            }
        };
        tasks.spawn(async move { (key, client.health_check().await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, healthy)) => {
                health.insert(key, healthy);
            }
            Err(e) => warn!(error = %e, "health task panicked"),
        }
    }

    health
}
