//! # Zewed Sync
//!
//! Durable queue of user actions taken while offline (job applications,
//! favorite toggles), replayed by the worker's sync coordinator once
//! connectivity returns.
//!
//! ## Features
//!
//! - **Records**: auto-assigned id, intent tag, opaque JSON payload, status
//! - **Indexes**: by status, by intent, and by originating job id
//! - **Durability**: SQLite via `rusqlite`, with versioned schema migrations
//! - **Non-blocking**: every query runs on tokio's blocking pool
//!
//! ## Status transitions
//!
//! ```text
//! pending ──replay ok──→ submitted ──retention──→ (purged)
//!    │  ↑
//!    │  └──next trigger──┐
//!    └──replay rejected──→ failed
//! ```

use thiserror::Error;

pub mod queue;
pub mod record;
mod schema;

pub use queue::{StatusCounts, SyncQueue};
pub use record::{SyncIntent, SyncRecord, SyncStatus};

/// Errors raised by the sync queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync record not found: {0}")]
    NotFound(i64),

    #[error("Invalid record data: {0}")]
    InvalidData(String),

    #[error("Queue connection poisoned")]
    Poisoned,

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
