//! StateStore — redb-backed persistence for fleetgrid.
//!
//! Provides typed CRUD operations over models, nodes, queue-length
//! history, and scheduling strategies. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk
//! and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MODELS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(QUEUE_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(STRATEGIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Models ────────────────────────────────────────────────────

    /// Insert or update a model row.
    pub fn put_model(&self, model: &ModelRecord) -> StateResult<()> {
        let value = serde_json::to_vec(model).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MODELS).map_err(map_err!(Table))?;
            table
                .insert(model.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(model_id = model.id, name = %model.model_name, "model stored");
        Ok(())
    }

    /// Get a model by id.
    pub fn get_model(&self, id: ModelId) -> StateResult<Option<ModelRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MODELS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let model: ModelRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(model))
            }
            None => Ok(None),
        }
    }

    /// Find a model by its unique name.
    pub fn find_model_by_name(&self, name: &str) -> StateResult<Option<ModelRecord>> {
        Ok(self
            .list_models()?
            .into_iter()
            .find(|m| m.model_name == name))
    }

    /// List all models, ordered by id.
    pub fn list_models(&self) -> StateResult<Vec<ModelRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MODELS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let model: ModelRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(model);
        }
        Ok(results)
    }

    /// Delete a model by id. Returns true if it existed.
    pub fn delete_model(&self, id: ModelId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MODELS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Nodes ─────────────────────────────────────────────────────

    /// Insert or update a node row.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        let key = node.node_key();
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "node stored");
        Ok(())
    }

    /// Get a node by its `{ip}:{port}` key.
    pub fn get_node(&self, key: &str) -> StateResult<Option<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: NodeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// List all nodes in key order.
    ///
    /// Key order is the fixed node enumeration order the scheduler
    /// relies on for deterministic passes.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: NodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(node);
        }
        Ok(results)
    }

    /// Delete a node by key. Returns true if it existed.
    pub fn delete_node(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Queue telemetry ───────────────────────────────────────────

    /// Append a queue-length sample for a model.
    ///
    /// Samples are keyed `(model_id, seq)` with a per-model increasing
    /// seq, so key order within a model is insertion order.
    pub fn append_queue_length(
        &self,
        model_id: ModelId,
        length: u64,
        timestamp: u64,
    ) -> StateResult<()> {
        let record = QueueLengthRecord {
            model_id,
            length,
            timestamp,
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(QUEUE_RECORDS).map_err(map_err!(Table))?;
            let next_seq = table
                .range((model_id, 0)..=(model_id, u64::MAX))
                .map_err(map_err!(Read))?
                .next_back()
                .transpose()
                .map_err(map_err!(Read))?
                .map(|(k, _)| k.value().1 + 1)
                .unwrap_or(0);
            table
                .insert((model_id, next_seq), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List a model's queue-length history, oldest first.
    pub fn list_queue_lengths(&self, model_id: ModelId) -> StateResult<Vec<QueueLengthRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUE_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range((model_id, 0)..=(model_id, u64::MAX))
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: QueueLengthRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Count of retained samples for a model.
    pub fn count_queue_lengths(&self, model_id: ModelId) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUE_RECORDS).map_err(map_err!(Table))?;
        let count = table
            .range((model_id, 0)..=(model_id, u64::MAX))
            .map_err(map_err!(Read))?
            .count();
        Ok(count)
    }

    /// Delete a model's oldest samples until at most `keep` remain.
    ///
    /// Returns the number of samples deleted.
    pub fn prune_queue_lengths(&self, model_id: ModelId, keep: usize) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deleted;
        {
            let mut table = txn.open_table(QUEUE_RECORDS).map_err(map_err!(Table))?;
            let keys: Vec<(u64, u64)> = table
                .range((model_id, 0)..=(model_id, u64::MAX))
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;

            let excess = keys.len().saturating_sub(keep);
            for key in keys.into_iter().take(excess) {
                table.remove(key).map_err(map_err!(Write))?;
            }
            deleted = excess;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if deleted > 0 {
            debug!(model_id, deleted, keep, "pruned queue history");
        }
        Ok(deleted)
    }

    // ── Strategies ────────────────────────────────────────────────

    /// Insert or update a strategy flag.
    pub fn put_strategy(&self, strategy: &StrategyRecord) -> StateResult<()> {
        let value = serde_json::to_vec(strategy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STRATEGIES).map_err(map_err!(Table))?;
            table
                .insert(strategy.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a strategy by name.
    pub fn get_strategy(&self, name: &str) -> StateResult<Option<StrategyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STRATEGIES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let strategy: StrategyRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(strategy))
            }
            None => Ok(None),
        }
    }

    /// List all strategies.
    pub fn list_strategies(&self) -> StateResult<Vec<StrategyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STRATEGIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let strategy: StrategyRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(strategy);
        }
        Ok(results)
    }
}
