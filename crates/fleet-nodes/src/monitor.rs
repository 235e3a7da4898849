//! Node monitor — periodic fleet-wide health refresh.
//!
//! Batch health-checks every registered node and writes the outcome
//! back to the state store: `online` with a fresh heartbeat on
//! success, `offline` on failure. The scheduler only places work on
//! nodes this loop has marked online.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_state::{NodeStatus, StateResult, StateStore};

use crate::aggregator::batch_health;
use crate::pool::NodeClientPool;

/// Refreshes node liveness on a fixed interval.
pub struct NodeMonitor {
    state: StateStore,
    pool: Arc<NodeClientPool>,
}

impl NodeMonitor {
    pub fn new(state: StateStore, pool: Arc<NodeClientPool>) -> Self {
        Self { state, pool }
    }

    /// Health-check every node once and persist status transitions.
    ///
    /// Returns the number of nodes currently online.
    pub async fn refresh_all(&self) -> StateResult<usize> {
        let nodes = self.state.list_nodes()?;
        if nodes.is_empty() {
            debug!("no nodes registered, skipping health refresh");
            return Ok(0);
        }

        let health = batch_health(&self.pool, &nodes).await;
        let now = epoch_secs();
        let mut online = 0;

        for mut node in nodes {
            let key = node.node_key();
            let healthy = health.get(&key).copied().unwrap_or(false);
            let status = if healthy {
                online += 1;
                NodeStatus::Online
            } else {
                NodeStatus::Offline
            };

            let heartbeat_due = healthy && node.last_heartbeat != Some(now);
            if node.status != status || heartbeat_due {
                if node.status != status {
                    info!(node = %key, from = ?node.status, to = ?status, "node status changed");
                }
                node.status = status;
                if healthy {
                    node.last_heartbeat = Some(now);
                }
                node.updated_at = now;
                self.state.put_node(&node)?;
            }
        }

        debug!(online, "node health refresh complete");
        Ok(online)
    }

    /// Run the refresh loop until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "node monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.refresh_all().await {
                        warn!(error = %e, "node health refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("node monitor shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
