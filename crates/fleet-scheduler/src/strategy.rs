//! Busy-queue scaling strategy — one scheduling pass.
//!
//! A pass summarizes queue telemetry, classifies busy models, and
//! walks three placement steps over live fleet status: free-slot
//! filling, idle-instance replacement, and the baseline guarantee.
//! A pass-scoped [`AllocationLedger`] prevents double-booking a GPU
//! between steps; RPC failures are logged and never abort the pass.
//!
//! At most one pass may execute at a time: the ledger assumes a
//! single writer and [`StrategyRunner::run`] awaits each pass inline.
//! Running a second scheduler process against the same fleet is
//! unsafe without external leader election.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_nodes::{FleetStatus, ModelInstanceStatus, NodeClientPool, NodeResult, batch_status};
use fleet_state::{BUSY_QUEUE_SCALING, ModelId, ModelRecord, NodeRecord, StateStore};

use crate::ledger::AllocationLedger;
use crate::telemetry::{
    BUSY_WAIT_THRESHOLD_SECS, MIN_BUSY_SAMPLES, QueueSummary, RECENT_WINDOW, is_busy, summarize,
};

/// Tunables for the busy-queue scaling strategy.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Minimum retained samples before busy classification applies.
    pub min_samples: usize,
    /// Estimated-wait threshold (seconds) for busy classification.
    pub busy_wait_threshold: f64,
    /// Width of the recent-activity window.
    pub recent_window: Duration,
    /// Extra config forwarded to every `start_model` call.
    pub start_config: Option<serde_json::Value>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_samples: MIN_BUSY_SAMPLES,
            busy_wait_threshold: BUSY_WAIT_THRESHOLD_SECS,
            recent_window: RECENT_WINDOW,
            start_config: None,
        }
    }
}

/// What one scheduling pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Busy models that qualified as deploy candidates.
    pub candidates: usize,
    /// Instances started onto free GPUs.
    pub started: usize,
    /// Idle instances replaced by candidates.
    pub replaced: usize,
    /// Baseline instances started for otherwise-absent models.
    pub baseline_started: usize,
    /// Placement RPCs that failed (logged, never retried this pass).
    pub failed: usize,
}

/// The busy-queue scaling strategy.
pub struct BusyQueueStrategy {
    state: StateStore,
    pool: Arc<NodeClientPool>,
    config: StrategyConfig,
}

impl BusyQueueStrategy {
    pub fn new(state: StateStore, pool: Arc<NodeClientPool>, config: StrategyConfig) -> Self {
        Self {
            state,
            pool,
            config,
        }
    }

    /// Execute one scheduling pass.
    ///
    /// Always runs to completion; individual placement failures are
    /// counted in the report. Errors are only returned for state-store
    /// failures, where continuing would decide on stale data.
    pub async fn run_pass(&self) -> anyhow::Result<PassReport> {
        let mut report = PassReport::default();
        let mut ledger = AllocationLedger::default();
        let now = epoch_secs();

        let models = self.state.list_models()?;
        let mut summaries: HashMap<ModelId, QueueSummary> = HashMap::new();
        for model in &models {
            let records = self.state.list_queue_lengths(model.id)?;
            summaries.insert(model.id, summarize(&records, now, self.config.recent_window));
        }

        let busy: Vec<&ModelRecord> = models
            .iter()
            .filter(|m| {
                is_busy(
                    &summaries[&m.id],
                    m.average_inference_time,
                    self.config.min_samples,
                    self.config.busy_wait_threshold,
                )
            })
            .collect();

        let online_nodes: Vec<NodeRecord> = self
            .state
            .list_nodes()?
            .into_iter()
            .filter(NodeRecord::is_online)
            .collect();

        if !busy.is_empty() && !online_nodes.is_empty() {
            info!(
                busy = ?busy.iter().map(|m| m.model_name.as_str()).collect::<Vec<_>>(),
                "busy models detected"
            );

            let status = batch_status(&self.pool, &online_nodes).await;
            let running = status.running_counts();
            let mut candidates = rank_candidates(&busy, &running, &summaries);
            report.candidates = candidates.len();

            self.fill_free_slots(
                &online_nodes,
                &status,
                &mut candidates,
                &mut ledger,
                &mut report,
            )
            .await;

            if !candidates.is_empty() {
                self.replace_idle_instances(
                    &online_nodes,
                    &status,
                    &models,
                    &summaries,
                    &mut candidates,
                    &mut ledger,
                    &mut report,
                )
                .await;
            }
        }

        if online_nodes.is_empty() {
            info!("no online nodes, skipping baseline instance check");
            return Ok(report);
        }

        self.guarantee_baseline(&models, &online_nodes, &mut ledger, &mut report)
            .await;

        info!(?report, claims = ledger.total(), "scheduling pass complete");
        Ok(report)
    }

    /// Step 4: deploy candidates onto free GPUs, node by node.
    async fn fill_free_slots(
        &self,
        nodes: &[NodeRecord],
        status: &FleetStatus,
        candidates: &mut VecDeque<&ModelRecord>,
        ledger: &mut AllocationLedger,
        report: &mut PassReport,
    ) {
        'nodes: for node in nodes {
            let node_key = node.node_key();
            for gpu_id in free_gpus(node, status, ledger) {
                let Some(candidate) = candidates.pop_front() else {
                    break 'nodes;
                };
                // Once popped, a candidate is consumed whether or not
                // placement succeeds; an unsupported candidate leaves
                // this slot unfilled.
                if !node.available_models.contains(&candidate.model_name) {
                    debug!(
                        node = %node_key,
                        model = %candidate.model_name,
                        "node does not support candidate"
                    );
                    continue;
                }

                match self.start_on(node, gpu_id, candidate).await {
                    Ok(()) => {
                        ledger.claim(&node_key, gpu_id);
                        report.started += 1;
                    }
                    Err(e) => {
                        error!(
                            node = %node_key,
                            gpu_id,
                            model = %candidate.model_name,
                            error = %e,
                            "failed to start busy model"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
    }

    /// Step 5: swap idle instances for remaining candidates.
    ///
    /// An instance is idle when its model is registered and shows zero
    /// recent queue activity; instances of unregistered models are
    /// never replaced.
    #[allow(clippy::too_many_arguments)]
    async fn replace_idle_instances(
        &self,
        nodes: &[NodeRecord],
        status: &FleetStatus,
        models: &[ModelRecord],
        summaries: &HashMap<ModelId, QueueSummary>,
        candidates: &mut VecDeque<&ModelRecord>,
        ledger: &mut AllocationLedger,
        report: &mut PassReport,
    ) {
        let by_name: HashMap<&str, &ModelRecord> =
            models.iter().map(|m| (m.model_name.as_str(), m)).collect();

        'nodes: for node in nodes {
            let node_key = node.node_key();
            let Some(instances) = status.instances.get(&node_key) else {
                continue;
            };

            for instance in instances {
                if candidates.is_empty() {
                    break 'nodes;
                }
                let Some(model) = by_name.get(instance.model_name.as_str()) else {
                    continue;
                };
                let recent = summaries
                    .get(&model.id)
                    .map(|s| s.recent_avg)
                    .unwrap_or(0.0);
                if recent != 0.0 || ledger.is_claimed(&node_key, instance.gpu_id) {
                    continue;
                }

                let Some(candidate) = candidates.pop_front() else {
                    break 'nodes;
                };
                if !node.available_models.contains(&candidate.model_name) {
                    // Consumed, same as the free-slot step.
                    debug!(
                        node = %node_key,
                        model = %candidate.model_name,
                        "node does not support replacement candidate"
                    );
                    continue;
                }

                match self.replace(node, instance, candidate).await {
                    Ok(()) => {
                        ledger.claim(&node_key, instance.gpu_id);
                        report.replaced += 1;
                    }
                    Err(e) => {
                        // No rollback: the GPU is left as live status
                        // reported it.
                        error!(
                            node = %node_key,
                            gpu_id = instance.gpu_id,
                            idle = %instance.model_name,
                            model = %candidate.model_name,
                            error = %e,
                            "idle-instance replacement failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
    }

    /// Step 6: ensure every registered model has at least one
    /// instance, first-fit over online nodes.
    async fn guarantee_baseline(
        &self,
        models: &[ModelRecord],
        nodes: &[NodeRecord],
        ledger: &mut AllocationLedger,
        report: &mut PassReport,
    ) {
        // Fresh snapshot: the earlier steps changed fleet state.
        let status = batch_status(&self.pool, nodes).await;
        let running = status.running_counts();

        for model in models {
            if running.get(&model.model_name).copied().unwrap_or(0) > 0 {
                continue;
            }
            debug!(model = %model.model_name, "model has no instances, placing baseline");

            for node in nodes {
                if !node.available_models.contains(&model.model_name) {
                    continue;
                }
                let node_key = node.node_key();
                let Some(&gpu_id) = free_gpus(node, &status, ledger).first() else {
                    continue;
                };

                match self.start_on(node, gpu_id, model).await {
                    Ok(()) => {
                        ledger.claim(&node_key, gpu_id);
                        report.baseline_started += 1;
                        break;
                    }
                    Err(e) => {
                        error!(
                            node = %node_key,
                            gpu_id,
                            model = %model.model_name,
                            error = %e,
                            "baseline start failed"
                        );
                        report.failed += 1;
                        // Keep scanning the remaining nodes.
                    }
                }
            }
        }
    }

    async fn start_on(
        &self,
        node: &NodeRecord,
        gpu_id: u32,
        model: &ModelRecord,
    ) -> NodeResult<()> {
        info!(
            node = %node.node_key(),
            gpu_id,
            model = %model.model_name,
            "starting model"
        );
        let client = self.pool.client(&node.node_ip, node.node_port).await?;
        client
            .start_model(&model.model_name, gpu_id, self.config.start_config.clone())
            .await?;
        Ok(())
    }

    async fn replace(
        &self,
        node: &NodeRecord,
        instance: &ModelInstanceStatus,
        candidate: &ModelRecord,
    ) -> NodeResult<()> {
        info!(
            node = %node.node_key(),
            gpu_id = instance.gpu_id,
            idle = %instance.model_name,
            model = %candidate.model_name,
            "replacing idle instance"
        );
        let client = self.pool.client(&node.node_ip, node.node_port).await?;
        client
            .stop_model(&instance.model_name, instance.gpu_id)
            .await?;
        client
            .start_model(
                &candidate.model_name,
                instance.gpu_id,
                self.config.start_config.clone(),
            )
            .await?;
        Ok(())
    }
}

/// Deploy candidates: busy models with no running instance and recent
/// activity, highest recent average first (model id breaks ties).
fn rank_candidates<'a>(
    busy: &[&'a ModelRecord],
    running: &HashMap<String, usize>,
    summaries: &HashMap<ModelId, QueueSummary>,
) -> VecDeque<&'a ModelRecord> {
    let recent = |m: &ModelRecord| {
        summaries
            .get(&m.id)
            .map(|s| s.recent_avg)
            .unwrap_or(0.0)
    };

    let mut list: Vec<&ModelRecord> = busy
        .iter()
        .copied()
        .filter(|m| {
            running.get(&m.model_name).copied().unwrap_or(0) == 0 && recent(m) > 0.0
        })
        .collect();
    list.sort_by(|a, b| {
        recent(b)
            .total_cmp(&recent(a))
            .then(a.id.cmp(&b.id))
    });
    list.into()
}

/// Free GPUs on a node: configured − occupied per live status −
/// claimed this pass. Ascending id order keeps passes deterministic.
fn free_gpus(node: &NodeRecord, status: &FleetStatus, ledger: &AllocationLedger) -> Vec<u32> {
    let node_key = node.node_key();
    let used = status.used_gpus(&node_key);
    node.available_gpu_ids
        .iter()
        .copied()
        .filter(|gpu| !used.contains(gpu) && !ledger.is_claimed(&node_key, *gpu))
        .collect()
}

/// Applies active scheduling strategies on a fixed interval.
pub struct StrategyRunner {
    state: StateStore,
    strategy: BusyQueueStrategy,
}

impl StrategyRunner {
    pub fn new(state: StateStore, pool: Arc<NodeClientPool>, config: StrategyConfig) -> Self {
        Self {
            strategy: BusyQueueStrategy::new(state.clone(), pool, config),
            state,
        }
    }

    /// Run every active strategy once.
    pub async fn apply_active(&self) -> anyhow::Result<Option<PassReport>> {
        let active: Vec<_> = self
            .state
            .list_strategies()?
            .into_iter()
            .filter(|s| s.active)
            .collect();

        if active.is_empty() {
            debug!("no active scheduling strategies");
            return Ok(None);
        }

        let mut last = None;
        for strategy in active {
            match strategy.name.as_str() {
                BUSY_QUEUE_SCALING => {
                    last = Some(self.strategy.run_pass().await?);
                }
                other => warn!(strategy = other, "unknown scheduling strategy"),
            }
        }
        Ok(last)
    }

    /// Run the scheduling loop until shutdown is signalled.
    ///
    /// Each pass is awaited inline, so passes never overlap.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "strategy runner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.apply_active().await {
                        error!(error = %e, "scheduling pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("strategy runner shutting down");
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
