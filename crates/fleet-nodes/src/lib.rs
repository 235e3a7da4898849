//! fleet-nodes — RPC clients and status aggregation for GPU nodes.
//!
//! Each inference node exposes a small HTTP surface (health, GPU
//! status, model status, start/stop/kill, supported models). This
//! crate provides:
//!
//! - **`client`** — one bounded-timeout RPC client per node address
//! - **`pool`** — explicit client cache passed into collaborators
//! - **`aggregator`** — concurrent batch fan-out with per-node
//!   failure isolation
//! - **`monitor`** — background loop persisting node liveness
//!
//! # Error contracts
//!
//! Health checks never fail; GPU status degrades to an empty list;
//! model status and all mutating calls surface [`NodeError`] so the
//! scheduler can account for failed placements.

pub mod aggregator;
pub mod client;
pub mod error;
pub mod monitor;
pub mod pool;

pub use aggregator::{FleetStatus, batch_health, batch_status};
pub use client::{GpuStatus, ModelInstanceStatus, NodeClient};
pub use error::{NodeError, NodeResult};
pub use monitor::NodeMonitor;
pub use pool::{DEFAULT_RPC_TIMEOUT, NodeClientPool};
