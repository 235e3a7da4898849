//! Pass-scoped allocation ledger.
//!
//! Tracks GPU slots claimed during the current scheduling pass so the
//! decision steps never double-book a GPU before live status reflects
//! their writes. Constructed at pass start, dropped at pass end,
//! written only by the pass itself — never persisted or shared across
//! passes.

use std::collections::{BTreeSet, HashMap};

use fleet_state::NodeKey;

/// GPU slots claimed this pass, per node.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    claims: HashMap<NodeKey, BTreeSet<u32>>,
}

impl AllocationLedger {
    /// Claim a GPU on a node. Returns false if it was already claimed
    /// this pass.
    pub fn claim(&mut self, node_key: &str, gpu_id: u32) -> bool {
        self.claims
            .entry(node_key.to_string())
            .or_default()
            .insert(gpu_id)
    }

    /// Whether a GPU is already claimed on a node this pass.
    pub fn is_claimed(&self, node_key: &str, gpu_id: u32) -> bool {
        self.claims
            .get(node_key)
            .is_some_and(|gpus| gpus.contains(&gpu_id))
    }

    /// GPU ids claimed on a node this pass.
    pub fn claimed(&self, node_key: &str) -> BTreeSet<u32> {
        self.claims.get(node_key).cloned().unwrap_or_default()
    }

    /// Total claims across the fleet this pass.
    pub fn total(&self) -> usize {
        self.claims.values().map(BTreeSet::len).sum()
    }
}
