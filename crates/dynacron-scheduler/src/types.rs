use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a schedulable source, and the registry key of its job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// "Run once per type": the type itself is the source.
    Class { type_id: String },
    /// One specific record of a type.
    Instance { type_id: String, record_id: String },
}

impl SourceRef {
    pub fn class(type_id: impl Into<String>) -> Self {
        SourceRef::Class {
            type_id: type_id.into(),
        }
    }

    pub fn instance(type_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        SourceRef::Instance {
            type_id: type_id.into(),
            record_id: record_id.into(),
        }
    }

    pub fn type_id(&self) -> &str {
        match self {
            SourceRef::Class { type_id } | SourceRef::Instance { type_id, .. } => type_id,
        }
    }

    /// `None` for class sources.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            SourceRef::Class { .. } => None,
            SourceRef::Instance { record_id, .. } => Some(record_id),
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self, SourceRef::Class { .. })
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Class { type_id } => write!(f, "{type_id}"),
            SourceRef::Instance { type_id, record_id } => write!(f, "{type_id} :: {record_id}"),
        }
    }
}

/// A persisted job record: the scheduling state of one discovered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub source: SourceRef,
    /// Operator switch. The job never runs while this is false.
    pub enabled: bool,
    /// The source's own enablement as of the last resolution.
    pub resolved_enable: bool,
    /// Expression that last validated; `None` means unscheduled.
    pub resolved_pattern: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_resolved: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Due when never scheduled or when `next_run` has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_run {
            None => true,
            Some(next) => next <= now,
        }
    }

    /// Both the operator flag and the source's own flag must allow running.
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.resolved_enable
    }
}

/// One execution attempt, as recorded in `dcron_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    /// `None` once the owning job has been deleted.
    pub job_id: Option<i64>,
    /// Display form of the job's [`SourceRef`] at the time of writing.
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin-side filter for [`crate::store::JobStore::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub enabled: Option<bool>,
    pub source_type: Option<String>,
}

impl JobFilter {
    pub fn enabled_only() -> Self {
        Self {
            enabled: Some(true),
            source_type: None,
        }
    }
}

/// Admin-side filter for [`crate::store::JobStore::list_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub job_id: Option<i64>,
    pub limit: Option<usize>,
}

/// Counters produced by one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub resolved: usize,
    pub deleted: usize,
}

/// Counters produced by one batch of `run_if_due` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub considered: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn job(next_run: Option<DateTime<Utc>>) -> Job {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Job {
            id: 1,
            source: SourceRef::instance("backups", "7"),
            enabled: true,
            resolved_enable: true,
            resolved_pattern: None,
            next_run,
            last_resolved: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn unscheduled_job_is_due() {
        assert!(job(None).is_due(Utc::now()));
    }

    #[test]
    fn due_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        assert!(job(Some(now)).is_due(now));
        assert!(!job(Some(now + Duration::seconds(1))).is_due(now));
    }

    #[test]
    fn source_ref_display() {
        assert_eq!(SourceRef::class("reports").to_string(), "reports");
        assert_eq!(
            SourceRef::instance("shell_command", "3").to_string(),
            "shell_command :: 3"
        );
    }
}
