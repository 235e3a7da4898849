//! Queue telemetry sampler.
//!
//! Once per sampling interval, queries the broker's management
//! endpoint for every model with complete broker configuration,
//! appends the observed message count as a timestamped
//! `QueueLengthRecord`, and prunes each model's history back to the
//! retention bound. One model's failure never blocks the others.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_state::{BrokerConfig, StateResult, StateStore};

/// Timeout for a single management-API request.
pub const BROKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of samples retained per model.
pub const DEFAULT_RETENTION: usize = 1000;

/// Queue details returned by `GET /api/queues/{vhost}/{queue}`.
#[derive(Debug, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    messages: u64,
    #[allow(unused)]
    #[serde(default)]
    consumers: u64,
    #[allow(unused)]
    #[serde(default)]
    idle_since: Option<String>,
}

/// Outcome of one sampling sweep across all models.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleReport {
    /// Samples successfully recorded.
    pub recorded: usize,
    /// Models skipped for incomplete broker configuration.
    pub skipped: usize,
    /// Models whose broker query failed.
    pub failed: usize,
    /// Old samples deleted by retention pruning.
    pub pruned: usize,
}

/// Samples queue depth per model and maintains the retention bound.
pub struct QueueSampler {
    state: StateStore,
    http: reqwest::Client,
    retention: usize,
}

impl QueueSampler {
    pub fn new(state: StateStore, retention: usize) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(BROKER_TIMEOUT).build()?;
        Ok(Self {
            state,
            http,
            retention,
        })
    }

    /// Sample every broker-configured model once.
    ///
    /// Models without a broker host/queue are ignored; models with a
    /// target but incomplete credentials are skipped with a warning.
    /// Query failures (transport, non-200, malformed body) are logged
    /// and the sweep continues.
    pub async fn sample_all(&self) -> StateResult<SampleReport> {
        let mut report = SampleReport::default();

        for model in self
            .state
            .list_models()?
            .iter()
            .filter(|m| m.has_broker_target())
        {
            let Some(broker) = model.broker_config() else {
                warn!(
                    model = %model.model_name,
                    model_id = model.id,
                    "broker configuration incomplete, skipping"
                );
                report.skipped += 1;
                continue;
            };

            let url = queue_url(&broker);
            let response = self
                .http
                .get(&url)
                .basic_auth(&broker.username, Some(&broker.password))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => match resp.json::<QueueInfo>().await {
                    Ok(info) => {
                        self.state
                            .append_queue_length(model.id, info.messages, epoch_secs())?;
                        report.recorded += 1;
                        report.pruned +=
                            self.state.prune_queue_lengths(model.id, self.retention)?;
                        debug!(
                            model = %model.model_name,
                            length = info.messages,
                            "queue length recorded"
                        );
                    }
                    Err(e) => {
                        error!(model = %model.model_name, error = %e, "queue info response malformed");
                        report.failed += 1;
                    }
                },
                Ok(resp) => {
                    warn!(
                        model = %model.model_name,
                        status = %resp.status(),
                        "queue info request failed"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    error!(model = %model.model_name, error = %e, "queue info request errored");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run the sampling loop until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            retention = self.retention,
            "queue sampler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.sample_all().await {
                        Ok(report) => debug!(?report, "sampling sweep complete"),
                        Err(e) => error!(error = %e, "sampling sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("queue sampler shutting down");
                    break;
                }
            }
        }
    }
}

/// Management-API URL for a queue; vhost and queue name are
/// percent-encoded (the default vhost "/" becomes `%2F`).
fn queue_url(broker: &BrokerConfig) -> String {
    format!(
        "http://{}:{}/api/queues/{}/{}",
        broker.host,
        broker.port,
        urlencoding::encode(&broker.vhost),
        urlencoding::encode(&broker.queue_name),
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
