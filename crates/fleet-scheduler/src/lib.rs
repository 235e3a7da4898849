//! fleet-scheduler — the busy-queue scaling control loop.
//!
//! Every pass turns queue telemetry plus live fleet status into
//! start/stop decisions:
//!
//! ```text
//! summarize telemetry
//!   → classify busy models (long_avg * inference_time > 300s, ≥10 samples)
//!   → rank candidates (busy, no instance, recent activity)
//!   → fill free GPUs
//!   → replace idle instances
//!   → baseline guarantee (every model gets one instance, first-fit)
//! ```
//!
//! A pass-scoped allocation ledger keeps the steps from double-booking
//! a GPU; there are no retries — the next pass is the retry.

pub mod ledger;
pub mod strategy;
pub mod telemetry;

pub use ledger::AllocationLedger;
pub use strategy::{BusyQueueStrategy, PassReport, StrategyConfig, StrategyRunner};
pub use telemetry::{
    BUSY_WAIT_THRESHOLD_SECS, MIN_BUSY_SAMPLES, QueueSummary, RECENT_WINDOW, is_busy, summarize,
};
