//! RPC client for a single inference node.
//!
//! One client per `(ip, port)`, reusing a single reqwest client (and
//! its connection pool) across calls. All requests carry the bounded
//! timeout the client was built with; nothing here blocks
//! indefinitely. Starting models on different GPUs of the same node
//! concurrently through one client is safe — the client holds no
//! mutable state.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NodeError, NodeResult};

/// Per-GPU status reported by a node, in discovery order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuStatus {
    #[serde(alias = "gpu_id")]
    pub id: u32,
    /// Utilization percentage.
    #[serde(default)]
    pub load: f64,
    #[serde(default, alias = "memory_usage")]
    pub memory_used: f64,
    #[serde(default)]
    pub memory_total: f64,
    #[serde(default, alias = "power_usage")]
    pub power_draw: f64,
    #[serde(default)]
    pub power_limit: f64,
}

/// A running model instance reported by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInstanceStatus {
    pub model_name: String,
    pub gpu_id: u32,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub status: String,
}

/// RPC client for one node's HTTP surface.
pub struct NodeClient {
    node_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl NodeClient {
    /// Build a client for `ip:port` with a fixed per-request timeout.
    pub fn new(ip: &str, port: u16, timeout: Duration) -> NodeResult<Self> {
        let node_key = format!("{ip}:{port}");
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NodeError::Build {
                node: node_key.clone(),
                source,
            })?;
        Ok(Self {
            base_url: format!("http://{node_key}"),
            node_key,
            http,
        })
    }

    /// The `{ip}:{port}` identity of this client.
    pub fn node_key(&self) -> &str {
        &self.node_key
    }

    /// Probe the node's root endpoint.
    ///
    /// Any transport error is reported as unhealthy; this never fails.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(node = %self.node_key, error = %e, "health check failed");
                false
            }
        }
    }

    /// Fetch per-GPU status.
    ///
    /// Degrades to an empty list on any transport or protocol error so
    /// a node without GPU telemetry doesn't fail its callers.
    pub async fn gpu_status(&self) -> Vec<GpuStatus> {
        let url = format!("{}/api/v1/gpus", self.base_url);
        let resp = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(node = %self.node_key, error = %e, "gpu status request failed");
                return Vec::new();
            }
        };
        if !resp.status().is_success() {
            warn!(node = %self.node_key, status = %resp.status(), "gpu status not supported");
            return Vec::new();
        }
        match resp.json().await {
            Ok(gpus) => gpus,
            Err(e) => {
                warn!(node = %self.node_key, error = %e, "gpu status response malformed");
                Vec::new()
            }
        }
    }

    /// Fetch the list of running model instances.
    ///
    /// Unlike [`gpu_status`](Self::gpu_status) this propagates
    /// failures: a node that cannot report its instances must be
    /// visible to the caller.
    pub async fn model_status(&self) -> NodeResult<Vec<ModelInstanceStatus>> {
        let url = format!("{}/api/v1/models/status", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NodeError::transport(&url, e))?;
        if !resp.status().is_success() {
            return Err(NodeError::Rejected {
                node: self.node_key.clone(),
                operation: "model status",
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|e| NodeError::transport(&url, e))
    }

    /// Start a model on the given GPU.
    pub async fn start_model(
        &self,
        model_name: &str,
        gpu_id: u32,
        config: Option<serde_json::Value>,
    ) -> NodeResult<serde_json::Value> {
        let url = format!("{}/api/v1/models/start", self.base_url);
        let payload = serde_json::json!({
            "model_name": model_name,
            "gpu_id": gpu_id,
            "config": config.unwrap_or_else(|| serde_json::json!({})),
        });
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NodeError::transport(&url, e))?;
        if !resp.status().is_success() {
            return Err(NodeError::Rejected {
                node: self.node_key.clone(),
                operation: "start model",
                status: resp.status().as_u16(),
            });
        }
        debug!(node = %self.node_key, model = model_name, gpu_id, "model start accepted");
        resp.json().await.map_err(|e| NodeError::transport(&url, e))
    }

    /// Stop the model running on the given GPU.
    pub async fn stop_model(
        &self,
        model_name: &str,
        gpu_id: u32,
    ) -> NodeResult<serde_json::Value> {
        let url = format!("{}/api/v1/models/stop", self.base_url);
        let payload = serde_json::json!({
            "model_name": model_name,
            "gpu_id": gpu_id,
        });
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NodeError::transport(&url, e))?;
        if !resp.status().is_success() {
            return Err(NodeError::Rejected {
                node: self.node_key.clone(),
                operation: "stop model",
                status: resp.status().as_u16(),
            });
        }
        debug!(node = %self.node_key, model = model_name, gpu_id, "model stop accepted");
        resp.json().await.map_err(|e| NodeError::transport(&url, e))
    }

    /// Kill a process on the node by pid.
    pub async fn kill_process(&self, pid: u32) -> NodeResult<serde_json::Value> {
        let url = format!("{}/api/v1/processes/{pid}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| NodeError::transport(&url, e))?;
        if !resp.status().is_success() {
            return Err(NodeError::Rejected {
                node: self.node_key.clone(),
                operation: "kill process",
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|e| NodeError::transport(&url, e))
    }

    /// Fetch the node's supported models as a name → description map.
    pub async fn supported_models(&self) -> NodeResult<HashMap<String, String>> {
        let url = format!("{}/api/v1/models/supported", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NodeError::transport(&url, e))?;
        if !resp.status().is_success() {
            return Err(NodeError::Rejected {
                node: self.node_key.clone(),
                operation: "supported models",
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|e| NodeError::transport(&url, e))
    }
}
