//! Error types for the agent.

use shadow_sync_engine::SyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that stop the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Shadow synchronization failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// No `Host` line in the machine's section of the adapter file.
    #[error("no Host entry for machine '{machine}' in {path}")]
    HostNotFound {
        /// Adapter configuration file.
        path: PathBuf,
        /// Machine section searched.
        machine: String,
    },

    /// An address that is not a dotted IPv4 address.
    #[error("invalid adapter address '{address}' from {origin}")]
    InvalidAddress {
        /// Where the address came from.
        origin: &'static str,
        /// The offending text.
        address: String,
    },

    /// The parameter service reports the adapter as offline.
    #[error("adapter offline (status: {0})")]
    AdapterOffline(String),

    /// The parameter service answered with an unexpected document.
    #[error("malformed adapter address response: {0}")]
    MalformedResponse(String),

    /// The machine stopped reporting as available.
    #[error("machine '{0}' is not available")]
    MachineUnavailable(String),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl AgentError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}
