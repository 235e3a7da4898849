//! fleet-telemetry — queue depth sampling for fleetgrid.
//!
//! Periodically queries the RabbitMQ management API for every model
//! with complete broker configuration and persists the observed queue
//! length as a time series the scheduler summarizes. History per
//! model is bounded: after each successful write the oldest excess
//! samples are pruned.

pub mod sampler;

pub use sampler::{DEFAULT_RETENTION, QueueSampler, SampleReport};
