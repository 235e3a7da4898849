//! Queue telemetry summarization and busy classification.
//!
//! Two views of a model's queue history feed the scaling pass: a
//! long-window average over all retained samples (valid only with
//! enough history) and a short recent-window average used to judge
//! whether demand is current.

use std::time::Duration;

use fleet_state::QueueLengthRecord;

/// Minimum retained samples before a model can be classified busy.
pub const MIN_BUSY_SAMPLES: usize = 10;

/// Estimated aggregate wait (seconds) above which a model is busy.
pub const BUSY_WAIT_THRESHOLD_SECS: f64 = 300.0;

/// Width of the recent-activity window.
pub const RECENT_WINDOW: Duration = Duration::from_secs(300);

/// Averages computed over one model's queue history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueSummary {
    /// Retained sample count.
    pub samples: usize,
    /// Average queue length over all retained samples.
    pub long_avg: f64,
    /// Average queue length over samples inside the recent window;
    /// 0.0 when the window is empty.
    pub recent_avg: f64,
}

/// Summarize a model's history as of `now`.
pub fn summarize(
    records: &[QueueLengthRecord],
    now: u64,
    recent_window: Duration,
) -> QueueSummary {
    let samples = records.len();
    let long_avg = if samples == 0 {
        0.0
    } else {
        records.iter().map(|r| r.length as f64).sum::<f64>() / samples as f64
    };

    let cutoff = now.saturating_sub(recent_window.as_secs());
    let recent: Vec<u64> = records
        .iter()
        .filter(|r| r.timestamp >= cutoff)
        .map(|r| r.length)
        .collect();
    let recent_avg = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|&l| l as f64).sum::<f64>() / recent.len() as f64
    };

    QueueSummary {
        samples,
        long_avg,
        recent_avg,
    }
}

/// Busy classification: estimated aggregate wait strictly exceeds the
/// threshold.
///
/// Models with fewer than `min_samples` retained samples or without an
/// average inference time are never busy.
pub fn is_busy(
    summary: &QueueSummary,
    average_inference_time: Option<f64>,
    min_samples: usize,
    threshold: f64,
) -> bool {
    if summary.samples < min_samples {
        return false;
    }
    let Some(inference_time) = average_inference_time else {
        return false;
    };
    summary.long_avg * inference_time > threshold
}
