//! `dynacron-scheduler`: dynamic cron job registry with SQLite persistence.
//!
//! # Overview
//!
//! Sources register with a [`source::SourceRegistry`]. A class source yields
//! one job for its whole type; an instance source yields one job per record.
//! The [`engine::SchedulerEngine`] reconciles the `dcron_jobs` table against
//! the registry, resolves each job's pattern into a cached `next_run`, and
//! dispatches due jobs, appending one `dcron_logs` row per attempt.
//!
//! # Patterns
//!
//! | Form                      | Meaning                                     |
//! |---------------------------|---------------------------------------------|
//! | `*/5 * * * *`             | Classic 5-field cron (minute resolution)    |
//! | `0 */5 * * * *`           | 6-field cron with seconds                   |
//! | `0 9 * * MON; 30 17 * * FRI` | Several clauses; the soonest one wins    |
//! | `@hourly`                 | Named schedules                             |
//!
//! An invalid clause makes the whole pattern invalid and the job unscheduled.
//!
//! # Dispatch
//!
//! | Source kind | Tried in order                     |
//! |-------------|------------------------------------|
//! | class       | `run_as_class()`, then `run()`     |
//! | instance    | `run_as_instance()`, then `run()`  |
//!
//! [`command`] provides two ready-made instance sources: stored shell
//! commands and stored `dynacron` subcommands.

pub mod command;
pub mod db;
pub mod engine;
pub mod error;
pub mod locks;
pub mod pattern;
pub mod source;
pub mod store;
pub mod types;

pub use command::{
    CommandKind, CommandSourceType, CommandStore, ScheduledCommand, DYNACRON_COMMAND_TYPE,
    SHELL_COMMAND_TYPE,
};
pub use engine::{RunOutcome, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use source::{Capabilities, Record, RunCapability, Source, SourceRegistry, SourceType};
pub use store::JobStore;
pub use types::{BatchReport, Job, JobFilter, LogEntry, LogFilter, ReconcileReport, SourceRef};
