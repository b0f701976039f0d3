//! Sync queue record types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::QueueError;

/// What a queued record asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncIntent {
    /// Submit a job application.
    ApplicationSubmit,
    /// Save or unsave a job.
    FavoriteToggle,
}

impl SyncIntent {
    /// Every intent, in replay order.
    pub const ALL: [SyncIntent; 2] = [SyncIntent::ApplicationSubmit, SyncIntent::FavoriteToggle];

    /// Tag string stored on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncIntent::ApplicationSubmit => "application-submit",
            SyncIntent::FavoriteToggle => "favorite-toggle",
        }
    }
}

impl fmt::Display for SyncIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncIntent {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application-submit" => Ok(SyncIntent::ApplicationSubmit),
            "favorite-toggle" => Ok(SyncIntent::FavoriteToggle),
            other => Err(QueueError::InvalidData(format!("unknown intent: {}", other))),
        }
    }
}

/// Replay status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for replay.
    Pending,
    /// Confirmed by the server.
    Submitted,
    /// Rejected on the last attempt; replayed again on the next trigger.
    Failed,
}

impl SyncStatus {
    /// Status string stored on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Submitted => "submitted",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether a record in this status is picked up by the next replay.
    pub fn is_replayable(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed)
    }
}

impl FromStr for SyncStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "submitted" => Ok(SyncStatus::Submitted),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(QueueError::InvalidData(format!("unknown status: {}", other))),
        }
    }
}

/// A queued user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Auto-assigned id; also the insertion order.
    pub id: i64,

    /// Intent tag.
    pub intent: SyncIntent,

    /// Opaque payload sent on replay.
    pub payload: JsonValue,

    /// Replay status.
    pub status: SyncStatus,

    /// Originating job id, lifted from the payload.
    pub job_id: Option<String>,

    /// Creation time (epoch millis).
    pub created_at: i64,

    /// Last status change (epoch millis).
    pub updated_at: i64,
}

/// Pull the job id out of a payload (`job_id` or `jobId`, string or number).
pub(crate) fn job_id_of(payload: &JsonValue) -> Option<String> {
    let value = payload.get("job_id").or_else(|| payload.get("jobId"))?;
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
