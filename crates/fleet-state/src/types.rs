//! Domain types for the fleetgrid state store.
//!
//! These types represent the persisted registry the scheduling core
//! reads: inference models, GPU nodes, per-model queue-length history,
//! and scheduling strategy flags. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for a model.
pub type ModelId = u64;

/// Node key in `{ip}:{port}` form.
pub type NodeKey = String;

/// Default port a node's RPC surface listens on.
pub const DEFAULT_NODE_PORT: u16 = 6004;

/// Default port of the RabbitMQ management API.
pub const DEFAULT_BROKER_PORT: u16 = 15672;

// ── Model ─────────────────────────────────────────────────────────

/// A registered inference model.
///
/// The broker fields describe where queue depth for this model can be
/// observed; a model without complete broker configuration is skipped
/// by the telemetry sampler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRecord {
    pub id: ModelId,
    /// Unique model name, matching the name nodes report instances under.
    pub model_name: String,
    /// Average inference time in seconds, used to convert queue length
    /// into estimated wait. Models without one are never classified busy.
    pub average_inference_time: Option<f64>,
    pub rabbitmq_host: Option<String>,
    pub rabbitmq_port: u16,
    pub rabbitmq_queue_name: Option<String>,
    pub rabbitmq_username: Option<String>,
    pub rabbitmq_password: Option<String>,
    /// Broker vhost; "/" when unset.
    pub rabbitmq_vhost: Option<String>,
    /// Unix timestamp (seconds) when this row was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this row was last updated.
    pub updated_at: u64,
}

/// Broker connection parameters extracted from a model row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub queue_name: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl ModelRecord {
    /// Whether the model names a broker host and queue at all.
    pub fn has_broker_target(&self) -> bool {
        self.rabbitmq_host.is_some() && self.rabbitmq_queue_name.is_some()
    }

    /// Complete broker configuration, or `None` if any required field
    /// (host, queue name, credentials) is missing.
    pub fn broker_config(&self) -> Option<BrokerConfig> {
        Some(BrokerConfig {
            host: self.rabbitmq_host.clone()?,
            port: self.rabbitmq_port,
            queue_name: self.rabbitmq_queue_name.clone()?,
            username: self.rabbitmq_username.clone()?,
            password: self.rabbitmq_password.clone()?,
            vhost: self.rabbitmq_vhost.clone().unwrap_or_else(|| "/".to_string()),
        })
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Liveness status of a node, maintained by the node monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unknown,
    Online,
    Offline,
    Error,
}

/// A GPU-equipped inference node, addressed by `ip:port`.
///
/// The GPU-id and model sets are decoded into native collections at
/// this boundary; the scheduler treats a node row as a read-only
/// snapshot within a pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub node_ip: String,
    pub node_port: u16,
    /// GPU ids this node exposes for placement.
    pub available_gpu_ids: BTreeSet<u32>,
    /// Model names this node is able to run.
    pub available_models: BTreeSet<String>,
    pub status: NodeStatus,
    /// Unix timestamp (seconds) of the last successful health check.
    pub last_heartbeat: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl NodeRecord {
    /// Store key and RPC identity for this node.
    pub fn node_key(&self) -> NodeKey {
        format!("{}:{}", self.node_ip, self.node_port)
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}

// ── Queue telemetry ───────────────────────────────────────────────

/// One observed queue-depth sample for a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueLengthRecord {
    pub model_id: ModelId,
    /// Message count reported by the broker.
    pub length: u64,
    /// Unix timestamp (seconds) the sample was taken.
    pub timestamp: u64,
}

// ── Scheduling strategies ─────────────────────────────────────────

/// Name of the busy-queue scaling strategy.
pub const BUSY_QUEUE_SCALING: &str = "busy_queue_scaling";

/// A named scheduling strategy and whether it is applied each pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyRecord {
    pub name: String,
    pub active: bool,
}
