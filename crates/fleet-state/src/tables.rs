//! redb table definitions for the fleetgrid state store.
//!
//! Values are JSON-serialized domain types. Models are keyed by their
//! numeric id, nodes by `{ip}:{port}`, queue history by a
//! `(model_id, seq)` pair so that per-model FIFO pruning is a range
//! delete over a key prefix.

use redb::TableDefinition;

/// Model rows keyed by model id.
pub const MODELS: TableDefinition<u64, &[u8]> = TableDefinition::new("models");

/// Node rows keyed by `{ip}:{port}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Queue-length history keyed by `(model_id, seq)`; seq is
/// monotonically increasing per model, so key order is insertion order.
pub const QUEUE_RECORDS: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("queue_records");

/// Scheduling strategy flags keyed by strategy name.
pub const STRATEGIES: TableDefinition<&str, &[u8]> = TableDefinition::new("strategies");
