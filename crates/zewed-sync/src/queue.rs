//! SQLite-backed sync queue.

use rusqlite::{params, Connection, Row};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use zewed_common::Clock;

use crate::record::job_id_of;
use crate::{schema, QueueError, QueueResult, SyncIntent, SyncRecord, SyncStatus};

const RECORD_COLUMNS: &str = "id, intent, payload, status, job_id, created_at, updated_at";

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub submitted: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Records that the next replay would pick up.
    pub fn replayable(&self) -> usize {
        self.pending + self.failed
    }
}

/// Durable queue of offline user actions.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct SyncQueue {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue").finish_non_exhaustive()
    }
}

impl SyncQueue {
    /// Open or create the queue database at `path`.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        schema::prepare(&conn, clock.now_millis())?;
        info!(path = %path.display(), "Opened sync queue");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Open a throwaway in-memory queue.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::prepare(&conn, clock.now_millis())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, R>(&self, f: F) -> QueueResult<R>
    where
        F: FnOnce(&Connection) -> QueueResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| QueueError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
    }

    /// Queue a new `pending` record.
    pub async fn enqueue(&self, intent: SyncIntent, payload: JsonValue) -> QueueResult<SyncRecord> {
        let now = self.clock.now_millis();
        let job_id = job_id_of(&payload);
        let payload_text = serde_json::to_string(&payload)?;

        let record = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO sync_records (intent, payload, status, job_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        intent.as_str(),
                        payload_text,
                        SyncStatus::Pending.as_str(),
                        job_id,
                        now,
                        now
                    ],
                )?;
                Ok(SyncRecord {
                    id: conn.last_insert_rowid(),
                    intent,
                    payload,
                    status: SyncStatus::Pending,
                    job_id,
                    created_at: now,
                    updated_at: now,
                })
            })
            .await?;

        debug!(
            id = record.id,
            intent = %record.intent,
            job_id = ?record.job_id,
            "Queued sync record"
        );
        Ok(record)
    }

    /// Fetch one record.
    pub async fn get(&self, id: i64) -> QueueResult<Option<SyncRecord>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM sync_records WHERE id = ?", RECORD_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(record_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Records of `intent` awaiting replay (`pending` or `failed`), oldest first.
    pub async fn replayable(&self, intent: SyncIntent) -> QueueResult<Vec<SyncRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM sync_records WHERE intent = ? AND status IN ('pending', 'failed') ORDER BY id ASC",
                RECORD_COLUMNS
            );
            query_records(conn, &sql, params![intent.as_str()])
        })
        .await
    }

    /// Records in a given status, oldest first.
    pub async fn by_status(&self, status: SyncStatus) -> QueueResult<Vec<SyncRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM sync_records WHERE status = ? ORDER BY id ASC",
                RECORD_COLUMNS
            );
            query_records(conn, &sql, params![status.as_str()])
        })
        .await
    }

    /// Records originating from a job, oldest first.
    pub async fn by_job(&self, job_id: &str) -> QueueResult<Vec<SyncRecord>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM sync_records WHERE job_id = ? ORDER BY id ASC",
                RECORD_COLUMNS
            );
            query_records(conn, &sql, params![job_id])
        })
        .await
    }

    /// Mark a record as confirmed by the server.
    ///
    /// Returns `false` if it was already submitted.
    pub async fn mark_submitted(&self, id: i64) -> QueueResult<bool> {
        self.transition(id, SyncStatus::Submitted).await
    }

    /// Mark a record as rejected on this attempt. It stays replayable.
    pub async fn mark_failed(&self, id: i64) -> QueueResult<bool> {
        self.transition(id, SyncStatus::Failed).await
    }

    async fn transition(&self, id: i64, to: SyncStatus) -> QueueResult<bool> {
        let now = self.clock.now_millis();
        let changed = self
            .with_conn(move |conn| {
                // submitted is final; only replayable records move
                let changed = conn.execute(
                    "UPDATE sync_records SET status = ?, updated_at = ?
                     WHERE id = ? AND status IN ('pending', 'failed')",
                    params![to.as_str(), now, id],
                )?;
                if changed == 0 {
                    let exists: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM sync_records WHERE id = ?",
                        params![id],
                        |row| row.get(0),
                    )?;
                    if exists == 0 {
                        return Err(QueueError::NotFound(id));
                    }
                }
                Ok(changed > 0)
            })
            .await?;

        debug!(id, status = to.as_str(), changed, "Sync record transition");
        Ok(changed)
    }

    /// Count records per status.
    pub async fn counts(&self) -> QueueResult<StatusCounts> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM sync_records GROUP BY status")?;
            let mut rows = stmt.query([])?;
            let mut counts = StatusCounts::default();
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let count = usize::try_from(count).unwrap_or(0);
                match status.parse::<SyncStatus>()? {
                    SyncStatus::Pending => counts.pending = count,
                    SyncStatus::Submitted => counts.submitted = count,
                    SyncStatus::Failed => counts.failed = count,
                }
            }
            Ok(counts)
        })
        .await
    }

    /// Delete `submitted` records last touched before `cutoff_millis`.
    pub async fn purge_submitted_before(&self, cutoff_millis: i64) -> QueueResult<usize> {
        let purged = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM sync_records WHERE status = 'submitted' AND updated_at < ?",
                    params![cutoff_millis],
                )?)
            })
            .await?;
        if purged > 0 {
            info!(purged, "Purged submitted sync records");
        }
        Ok(purged)
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> QueueResult<Vec<SyncRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(record_from_row(row)?);
    }
    Ok(records)
}

fn record_from_row(row: &Row<'_>) -> QueueResult<SyncRecord> {
    let intent: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(SyncRecord {
        id: row.get(0)?,
        intent: intent.parse()?,
        payload: serde_json::from_str(&payload)?,
        status: status.parse()?,
        job_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
