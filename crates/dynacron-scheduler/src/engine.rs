use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use dynacron_core::config::SchedulerConfig;
use futures_util::{stream, FutureExt, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::{Result, SchedulerError},
    locks::JobLocks,
    pattern,
    source::{RunCapability, Source, SourceRegistry},
    store::JobStore,
    types::{BatchReport, Job, JobFilter, ReconcileReport, SourceRef},
};

/// What one `run_if_due` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `next_run` is still in the future.
    NotDue,
    /// The source vanished since the last reconcile.
    SourceMissing,
    /// No valid schedule could be resolved; nothing was run.
    Unscheduled,
    /// Schedule advanced, but the job or its source is switched off.
    Disabled,
    Executed(RunCapability),
    /// The source implements no run method usable for its kind.
    NoCapability,
    Failed {
        capability: RunCapability,
        error: String,
    },
    TimedOut {
        capability: RunCapability,
        after: Duration,
    },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunOutcome::NoCapability | RunOutcome::Failed { .. } | RunOutcome::TimedOut { .. }
        )
    }

    /// Text recorded in the job log for a dispatch, `None` when nothing
    /// was dispatched.
    pub fn log_message(&self, source: &SourceRef) -> Option<String> {
        match self {
            RunOutcome::Executed(capability) => Some(format!("Success - `{capability}` called")),
            RunOutcome::NoCapability => {
                let specific = if source.is_class() {
                    RunCapability::ClassRun
                } else {
                    RunCapability::InstanceRun
                };
                Some(format!(
                    "Failure - No `{specific}` or `{}` method",
                    RunCapability::GenericRun
                ))
            }
            RunOutcome::Failed { capability, error } => {
                Some(format!("Failure - `{capability}` returned an error: {error}"))
            }
            RunOutcome::TimedOut { capability, after } => Some(format!(
                "Failure - `{capability}` timed out after {}s",
                after.as_secs()
            )),
            RunOutcome::NotDue
            | RunOutcome::SourceMissing
            | RunOutcome::Unscheduled
            | RunOutcome::Disabled => None,
        }
    }
}

/// Discovers sources, keeps their jobs resolved, and runs the due ones.
pub struct SchedulerEngine {
    store: JobStore,
    sources: Arc<SourceRegistry>,
    locks: JobLocks,
    config: SchedulerConfig,
}

impl SchedulerEngine {
    pub fn new(store: JobStore, sources: Arc<SourceRegistry>, config: SchedulerConfig) -> Self {
        Self {
            store,
            sources,
            locks: JobLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }

    /// Sync the job table with the live set of sources.
    ///
    /// Every live source gets a job (created on first sighting) and is
    /// resolved; every job whose source is gone is deleted.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut stale: HashMap<SourceRef, Job> = self
            .store
            .list_jobs(&JobFilter::default())?
            .into_iter()
            .map(|job| (job.source.clone(), job))
            .collect();

        for source_type in self.sources.types() {
            let type_id = source_type.type_id().to_string();

            if let Some(source) = source_type.class_source() {
                self.discover(SourceRef::class(&type_id), source, &mut stale, &mut report)
                    .await?;
            }

            if source_type.provides_instances() {
                let records = source_type
                    .list_records()
                    .map_err(|e| SchedulerError::Source {
                        type_id: type_id.clone(),
                        reason: e.to_string(),
                    })?;
                for record in records {
                    let source_ref = SourceRef::instance(&type_id, record.id);
                    self.discover(source_ref, record.source, &mut stale, &mut report)
                        .await?;
                }
            }
        }

        for (source, job) in stale {
            let guard = self.locks.acquire(&source).await;
            match self.store.delete_job(job.id) {
                Ok(()) | Err(SchedulerError::JobNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            drop(guard);
            self.locks.forget(&source);
            report.deleted += 1;
            info!(job_id = job.id, %source, "stale job deleted");
        }

        info!(
            created = report.created,
            resolved = report.resolved,
            deleted = report.deleted,
            "reconcile complete"
        );
        Ok(report)
    }

    async fn discover(
        &self,
        source_ref: SourceRef,
        source: Arc<dyn Source>,
        stale: &mut HashMap<SourceRef, Job>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        stale.remove(&source_ref);
        let _guard = self.locks.acquire(&source_ref).await;
        let (job, created) = self.store.get_or_create(&source_ref)?;
        if created {
            report.created += 1;
        }
        self.resolve_with(job, source.as_ref())?;
        report.resolved += 1;
        Ok(())
    }

    /// Re-read one job's source and refresh its cached schedule.
    ///
    /// Returns `None` when the job's source no longer exists.
    pub async fn resolve(&self, job_id: i64) -> Result<Option<Job>> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        let _guard = self.locks.acquire(&job.source).await;
        let job = self
            .store
            .get_job(job_id)?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        match self.sources.lookup(&job.source)? {
            Some(source) => self.resolve_with(job, source.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    /// Caller holds the job's lock.
    fn resolve_with(&self, mut job: Job, source: &dyn Source) -> Result<Job> {
        let now = Local::now();
        let expr = source.schedule();

        // a changed expression invalidates the cached next run
        if job.resolved_pattern.as_deref() != Some(expr.as_str()) {
            if let Some(old) = &job.resolved_pattern {
                info!(job_id = job.id, source = %job.source, %old, new = %expr, "schedule changed");
            }
            job.resolved_pattern = None;
            job.next_run = None;
        }

        if job.resolved_pattern.is_none() {
            match pattern::next_after(&expr, &now) {
                Ok(next) => {
                    job.next_run = Some(next.with_timezone(&Utc));
                    job.resolved_pattern = Some(expr);
                }
                Err(e) if expr.trim().is_empty() => {
                    debug!(job_id = job.id, source = %job.source, "no schedule: {e}");
                }
                Err(e) => {
                    warn!(job_id = job.id, source = %job.source, "job left unscheduled: {e}");
                }
            }
        }

        job.resolved_enable = source.enabled().unwrap_or(true);
        job.last_resolved = Some(now.with_timezone(&Utc));
        self.store.save_resolution(&job)?;
        Ok(job)
    }

    /// Run the job if it is due, recording the dispatch in its log.
    ///
    /// The schedule is advanced before the enabled check, so a disabled job
    /// keeps moving forward instead of piling up missed windows. Failures
    /// of the source's own run method are logged, not returned.
    #[instrument(skip(self))]
    pub async fn run_if_due(&self, job_id: i64) -> Result<RunOutcome> {
        let source_ref = self
            .store
            .get_job(job_id)?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?
            .source;
        let _guard = self.locks.acquire(&source_ref).await;

        // re-read: another worker may have advanced it while we waited
        let mut job = self
            .store
            .get_job(job_id)?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        if !job.is_due(Utc::now()) {
            return Ok(RunOutcome::NotDue);
        }

        let Some(source) = self.sources.lookup(&job.source)? else {
            debug!(source = %job.source, "source missing; left for the next reconcile");
            return Ok(RunOutcome::SourceMissing);
        };

        if job.resolved_pattern.is_none() {
            job = self.resolve_with(job, source.as_ref())?;
            if job.resolved_pattern.is_none() {
                return Ok(RunOutcome::Unscheduled);
            }
        }

        match job.resolved_pattern.as_deref().and_then(pattern::validate) {
            Some(next) => {
                self.store.advance(job.id, Some(next))?;
                job.next_run = Some(next);
            }
            None => {
                // no occurrence left (e.g. a year-pinned clause): this window
                // is the last one, later calls see an unscheduled job
                info!(source = %job.source, "schedule exhausted");
                job.resolved_pattern = None;
                job.next_run = None;
                self.store.save_resolution(&job)?;
            }
        }

        if !job.is_runnable() {
            debug!(
                source = %job.source,
                enabled = job.enabled,
                resolved_enable = job.resolved_enable,
                "job disabled; schedule advanced only"
            );
            return Ok(RunOutcome::Disabled);
        }

        let capability = RunCapability::probe(&job.source, source.capabilities());
        let outcome = self.dispatch(source.as_ref(), capability).await;
        if let Some(message) = outcome.log_message(&job.source) {
            self.store.append_log(&job, &message)?;
        }
        if outcome.is_failure() {
            warn!(source = %job.source, ?outcome, "job run failed");
        } else {
            info!(source = %job.source, %capability, next_run = ?job.next_run, "job executed");
        }
        Ok(outcome)
    }

    async fn dispatch(&self, source: &dyn Source, capability: RunCapability) -> RunOutcome {
        let run = match capability {
            RunCapability::ClassRun => source.run_as_class(),
            RunCapability::InstanceRun => source.run_as_instance(),
            RunCapability::GenericRun => source.run(),
            RunCapability::None => return RunOutcome::NoCapability,
        };
        // panics surface as a Failed outcome
        let run = AssertUnwindSafe(run).catch_unwind();

        let result = match self.config.dispatch_timeout() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    return RunOutcome::TimedOut {
                        capability,
                        after: limit,
                    }
                }
            },
            None => run.await,
        };

        match result {
            Ok(Ok(())) => RunOutcome::Executed(capability),
            Ok(Err(e)) => RunOutcome::Failed {
                capability,
                error: format!("{e:#}"),
            },
            Err(_panic) => RunOutcome::Failed {
                capability,
                error: "panicked".to_string(),
            },
        }
    }

    /// `run_if_due` for every enabled job, at most `max_concurrency` at a time.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let jobs = self.store.list_jobs(&JobFilter::enabled_only())?;
        let mut report = BatchReport {
            considered: jobs.len(),
            ..BatchReport::default()
        };

        let ids: Vec<i64> = jobs.iter().map(|job| job.id).collect();
        let outcomes: Vec<RunOutcome> = stream::iter(ids)
            .map(|id| self.run_listed(id))
            .buffer_unordered(self.config.effective_concurrency())
            .try_collect()
            .await?;

        for outcome in &outcomes {
            match outcome {
                RunOutcome::Executed(_) => report.executed += 1,
                o if o.is_failure() => report.failed += 1,
                _ => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn run_listed(&self, job_id: i64) -> Result<RunOutcome> {
        match self.run_if_due(job_id).await {
            // deleted between listing and running
            Err(SchedulerError::JobNotFound { .. }) => Ok(RunOutcome::SourceMissing),
            other => other,
        }
    }

    /// One driver cycle: reconcile, then run everything that is due.
    pub async fn cycle(&self) -> Result<(ReconcileReport, BatchReport)> {
        let reconciled = self.reconcile().await?;
        let batch = self.run_batch().await?;
        info!(
            considered = batch.considered,
            executed = batch.executed,
            failed = batch.failed,
            skipped = batch.skipped,
            "batch complete"
        );
        Ok((reconciled, batch))
    }

    /// Driver loop. Runs a cycle every `poll_interval_secs` until `shutdown`
    /// broadcasts `true`. A store failure ends the loop with the error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrency = self.config.effective_concurrency(),
            "scheduler engine started"
        );

        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!("scheduler cycle aborted: {e}");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
