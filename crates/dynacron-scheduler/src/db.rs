use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the job, log and command tables (idempotent). Also turns on
/// foreign key enforcement for this connection, which SQLite leaves off by
/// default; without it the log table's `ON DELETE SET NULL` does nothing.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS dcron_jobs (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type       TEXT    NOT NULL,
            record_id         TEXT,               -- NULL for class-level jobs
            enabled           INTEGER NOT NULL DEFAULT 1,
            resolved_enable   INTEGER NOT NULL DEFAULT 1,
            resolved_pattern  TEXT,               -- NULL until a pattern validates
            next_run          TEXT,               -- RFC 3339 or NULL
            last_resolved     TEXT,               -- RFC 3339 or NULL
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        );

        -- One job per source: a single class row per type, one row per record.
        CREATE UNIQUE INDEX IF NOT EXISTS ux_dcron_jobs_class
            ON dcron_jobs (source_type) WHERE record_id IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS ux_dcron_jobs_instance
            ON dcron_jobs (source_type, record_id) WHERE record_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS dcron_logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id      INTEGER REFERENCES dcron_jobs (id) ON DELETE SET NULL,
            source      TEXT    NOT NULL,
            message     TEXT    NOT NULL,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dcron_logs_job ON dcron_logs (job_id, id);

        CREATE TABLE IF NOT EXISTS dcron_shell_commands (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            cron_schedule  TEXT    NOT NULL DEFAULT '* * * * *',
            shell_command  TEXT    NOT NULL,
            enabled        INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS dcron_dynacron_commands (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            cron_schedule     TEXT    NOT NULL DEFAULT '* * * * *',
            dynacron_command  TEXT    NOT NULL,
            enabled           INTEGER NOT NULL DEFAULT 1
        );
        ",
    )?;
    Ok(())
}
