use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{Job, JobFilter, LogEntry, LogFilter, SourceRef},
};

const JOB_COLUMNS: &str = "id, source_type, record_id, enabled, resolved_enable,
    resolved_pattern, next_run, last_resolved, created_at, updated_at";

/// SQLite-backed job registry and execution log.
///
/// Every mutation of a job row is a single statement, so a concurrent
/// reader sees either the old row or the new one, never a mix.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        Self::from_shared(Arc::new(Mutex::new(conn)))
    }

    /// Share a connection with other stores (e.g. the shell command table).
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self { conn })
    }

    /// All jobs matching `filter`, ordered by id.
    #[instrument(skip(self))]
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM dcron_jobs
             WHERE (?1 IS NULL OR enabled = ?1)
               AND (?2 IS NULL OR source_type = ?2)
             ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(
                rusqlite::params![filter.enabled, filter.source_type],
                row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM dcron_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn find_job(&self, source: &SourceRef) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        find_by_source(&conn, source)
    }

    /// Return the job for `source`, creating a fresh unscheduled one if
    /// there is none. The flag is true when a row was inserted.
    #[instrument(skip(self), fields(source = %source))]
    pub fn get_or_create(&self, source: &SourceRef) -> Result<(Job, bool)> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dcron_jobs (source_type, record_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![source.type_id(), source.record_id(), now],
        )?;
        // read back: covers both the fresh insert and an existing row
        let job = find_by_source(&conn, source)?.ok_or(SchedulerError::Database(
            rusqlite::Error::QueryReturnedNoRows,
        ))?;
        if inserted > 0 {
            info!(job_id = job.id, "job created");
        }
        Ok((job, inserted > 0))
    }

    /// Persist the fields owned by resolution.
    pub fn save_resolution(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE dcron_jobs
             SET resolved_pattern = ?1, next_run = ?2, resolved_enable = ?3,
                 last_resolved = ?4, updated_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                job.resolved_pattern,
                job.next_run.map(|t| t.to_rfc3339()),
                job.resolved_enable,
                job.last_resolved.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                job.id
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: job.id });
        }
        Ok(())
    }

    /// Move `next_run` forward after a due check.
    pub fn advance(&self, id: i64, next_run: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE dcron_jobs SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![
                next_run.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }

    /// The one job field an operator may edit.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE dcron_jobs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        info!(job_id = id, enabled, "job enabled flag changed");
        let job = conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM dcron_jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )?;
        Ok(job)
    }

    /// Delete a job. Its log rows are kept with `job_id` cleared.
    pub fn delete_job(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM dcron_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }

    /// Append one entry to the execution log of `job`.
    pub fn append_log(&self, job: &Job, message: &str) -> Result<LogEntry> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let source = job.source.to_string();
        conn.execute(
            "INSERT INTO dcron_logs (job_id, source, message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![job.id, source, message, now_str],
        )?;
        debug!(job_id = job.id, %message, "log entry written");
        Ok(LogEntry {
            id: conn.last_insert_rowid(),
            job_id: Some(job.id),
            source,
            message: message.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Log entries, newest first.
    pub fn list_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source, message, created_at, updated_at
             FROM dcron_logs
             WHERE (?1 IS NULL OR job_id = ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        // SQLite treats a negative LIMIT as "no limit"
        let limit = filter.limit.map_or(-1, |l| l as i64);
        let logs = stmt
            .query_map(rusqlite::params![filter.job_id, limit], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    source: row.get(2)?,
                    message: row.get(3)?,
                    created_at: timestamp(row, 4)?,
                    updated_at: timestamp(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}

fn find_by_source(conn: &Connection, source: &SourceRef) -> Result<Option<Job>> {
    let job = match source.record_id() {
        None => conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM dcron_jobs
                     WHERE source_type = ?1 AND record_id IS NULL"
                ),
                [source.type_id()],
                row_to_job,
            )
            .optional()?,
        Some(record_id) => conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM dcron_jobs
                     WHERE source_type = ?1 AND record_id = ?2"
                ),
                [source.type_id(), record_id],
                row_to_job,
            )
            .optional()?,
    };
    Ok(job)
}

/// Map a SQLite row to a `Job`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let type_id: String = row.get(1)?;
    let source = match row.get::<_, Option<String>>(2)? {
        None => SourceRef::Class { type_id },
        Some(record_id) => SourceRef::Instance { type_id, record_id },
    };
    Ok(Job {
        id: row.get(0)?,
        source,
        enabled: row.get(3)?,
        resolved_enable: row.get(4)?,
        resolved_pattern: row.get(5)?,
        next_run: optional_timestamp(row, 6)?,
        last_resolved: optional_timestamp(row, 7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn optional_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_timestamp(idx, &raw))
        .transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
