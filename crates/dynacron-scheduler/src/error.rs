use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Everything here is fatal to a reconcile/run cycle. Per-job problems
/// (bad cron expressions, missing run capabilities, failing runs) are not
/// errors at this level; they end up in the job log instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: i64 },

    /// No scheduled command with the given ID exists in its table.
    #[error("Command not found: {id}")]
    CommandNotFound { id: i64 },

    /// Two source types were registered under the same identifier.
    #[error("Source type already registered: {type_id}")]
    DuplicateSourceType { type_id: String },

    /// A source type failed to enumerate or look up its records.
    #[error("Source type {type_id} failed: {reason}")]
    Source { type_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
