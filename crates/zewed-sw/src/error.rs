//! Worker error types.

use thiserror::Error;
use zewed_cache::StorageError;
use zewed_sync::QueueError;

use crate::clients::ClientError;
use crate::config::ConfigError;
use crate::network::NetworkError;
use crate::notify::DisplayError;

/// Machine-readable failure reasons surfaced in synthetic responses and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The network could not be reached.
    NetworkUnavailable,
    /// A partition read or write failed.
    StorageFailure,
    /// The request could not be classified (malformed URL).
    ClassificationMismatch,
    /// A queued record could not be replayed.
    SyncReplayFailure,
    /// Pre-population of a new version failed.
    InstallFailed,
}

impl FailureReason {
    /// Reason code as it appears in payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NetworkUnavailable => "network_unavailable",
            FailureReason::StorageFailure => "storage_failure",
            FailureReason::ClassificationMismatch => "classification_mismatch",
            FailureReason::SyncReplayFailure => "sync_replay_failure",
            FailureReason::InstallFailed => "install_failed",
        }
    }
}

/// Errors returned by worker operations that are allowed to fail.
///
/// Request handling never returns one of these; it always ends in a response.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Install of {version} failed: {} precache entries failed", failures.len())]
    InstallFailed {
        version: String,
        failures: Vec<String>,
    },

    #[error("No active version")]
    NotActive,

    #[error("State error: {0}")]
    State(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),
}

impl WorkerError {
    /// Reason code for this error, if it maps onto one.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            WorkerError::InstallFailed { .. } => Some(FailureReason::InstallFailed),
            WorkerError::Storage(_) => Some(FailureReason::StorageFailure),
            WorkerError::Queue(_) => Some(FailureReason::SyncReplayFailure),
            WorkerError::Network(_) => Some(FailureReason::NetworkUnavailable),
            _ => None,
        }
    }
}

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
