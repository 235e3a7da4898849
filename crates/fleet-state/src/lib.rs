//! fleet-state — embedded state store for fleetgrid.
//!
//! Persists the registry the scheduling core reads each pass: model
//! rows (with broker connection details), node rows (with typed
//! GPU-id and model sets), per-model queue-length history, and
//! scheduling strategy flags. Backed by redb with JSON-serialized
//! values; supports an in-memory backend for tests.
//!
//! Queue history is append-only per model and pruned oldest-first to
//! a retention bound by the telemetry sampler.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
