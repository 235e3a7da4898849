//! Node RPC error types.

use thiserror::Error;

/// Result type alias for node RPC operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors surfaced by mutating node RPCs.
///
/// Status queries mostly degrade instead of erroring (see
/// [`crate::client::NodeClient`]); start/stop/kill surface these so the
/// scheduler can log the failed placement and move on.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to build node client for {node}: {source}")]
    Build {
        node: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node {node} rejected {operation}: status {status}")]
    Rejected {
        node: String,
        operation: &'static str,
        status: u16,
    },
}

impl NodeError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }
}
