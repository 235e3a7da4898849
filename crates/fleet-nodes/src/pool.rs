//! Client pool — one cached RPC client per node address.
//!
//! An explicit object passed by reference into the aggregator and the
//! scheduler, not a global singleton, so tests can wire their own
//! pools against mock nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::client::NodeClient;
use crate::error::NodeResult;

/// Default per-request timeout for node RPCs.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Caches one [`NodeClient`] per `{ip}:{port}` so connections are
/// reused across calls and passes.
pub struct NodeClientPool {
    timeout: Duration,
    clients: RwLock<HashMap<String, Arc<NodeClient>>>,
}

impl NodeClientPool {
    /// Create a pool whose clients use the given RPC timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached client for a node, creating it on first use.
    pub async fn client(&self, ip: &str, port: u16) -> NodeResult<Arc<NodeClient>> {
        let key = format!("{ip}:{port}");
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Another task may have built the client between the locks.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = Arc::new(NodeClient::new(ip, port, self.timeout)?);
        clients.insert(key.clone(), client.clone());
        debug!(node = %key, "node client created");
        Ok(client)
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the pool has no cached clients.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for NodeClientPool {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_TIMEOUT)
    }
}
