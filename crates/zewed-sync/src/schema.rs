//! Queue database schema and migrations.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::QueueResult;

/// Database schema version for migrations.
pub(crate) const SCHEMA_VERSION: i32 = 1;

/// Bring a connection up to the current schema.
pub(crate) fn prepare(conn: &Connection, now_millis: i64) -> QueueResult<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )
        .unwrap_or(false);

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        0
    };

    if version < 1 {
        create_schema_v1(conn, now_millis)?;
        info!(version = SCHEMA_VERSION, "Created sync queue schema");
    }

    Ok(())
}

fn create_schema_v1(conn: &Connection, now_millis: i64) -> QueueResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            intent TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            job_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_status ON sync_records(status);
        CREATE INDEX IF NOT EXISTS idx_sync_intent_status ON sync_records(intent, status);
        CREATE INDEX IF NOT EXISTS idx_sync_job ON sync_records(job_id);
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, now_millis],
    )?;

    Ok(())
}
