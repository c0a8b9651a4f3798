//! Built-in instance sources backed by command tables.
//!
//! Two kinds ship with the scheduler:
//!
//! | Kind       | Table                       | Runs                               |
//! |------------|-----------------------------|------------------------------------|
//! | `Shell`    | `dcron_shell_commands`      | `sh -c <command>`                  |
//! | `Dynacron` | `dcron_dynacron_commands`   | the `dynacron` binary with args    |
//!
//! Each row is one job. A run fails on a non-zero exit status.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    source::{Capabilities, Record, Source, SourceType},
};

/// `source_type` of shell command jobs.
pub const SHELL_COMMAND_TYPE: &str = "shell_command";
/// `source_type` of scheduled `dynacron` subcommand jobs.
pub const DYNACRON_COMMAND_TYPE: &str = "dynacron_command";

pub const DEFAULT_CRON_SCHEDULE: &str = "* * * * *";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Shell,
    Dynacron,
}

impl CommandKind {
    pub fn type_id(self) -> &'static str {
        match self {
            CommandKind::Shell => SHELL_COMMAND_TYPE,
            CommandKind::Dynacron => DYNACRON_COMMAND_TYPE,
        }
    }

    fn table(self) -> &'static str {
        match self {
            CommandKind::Shell => "dcron_shell_commands",
            CommandKind::Dynacron => "dcron_dynacron_commands",
        }
    }

    fn column(self) -> &'static str {
        match self {
            CommandKind::Shell => "shell_command",
            CommandKind::Dynacron => "dynacron_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCommand {
    pub id: i64,
    pub cron_schedule: String,
    pub command: String,
    pub enabled: bool,
}

/// CRUD over one command table.
#[derive(Clone)]
pub struct CommandStore {
    conn: Arc<Mutex<Connection>>,
    kind: CommandKind,
}

impl CommandStore {
    pub fn new(conn: Arc<Mutex<Connection>>, kind: CommandKind) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self { conn, kind })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn add(&self, cron_schedule: &str, command: &str) -> Result<ScheduledCommand> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (cron_schedule, {}, enabled) VALUES (?1, ?2, 1)",
                self.kind.table(),
                self.kind.column()
            ),
            rusqlite::params![cron_schedule, command],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, kind = ?self.kind, %cron_schedule, "command added");
        Ok(ScheduledCommand {
            id,
            cron_schedule: cron_schedule.to_string(),
            command: command.to_string(),
            enabled: true,
        })
    }

    pub fn list(&self) -> Result<Vec<ScheduledCommand>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, cron_schedule, {}, enabled FROM {} ORDER BY id",
            self.kind.column(),
            self.kind.table()
        ))?;
        let rows = stmt
            .query_map([], row_to_command)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get(&self, id: i64) -> Result<Option<ScheduledCommand>> {
        let conn = self.conn.lock().unwrap();
        let cmd = conn
            .query_row(
                &format!(
                    "SELECT id, cron_schedule, {}, enabled FROM {} WHERE id = ?1",
                    self.kind.column(),
                    self.kind.table()
                ),
                [id],
                row_to_command,
            )
            .optional()?;
        Ok(cmd)
    }

    pub fn remove(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.kind.table()),
            [id],
        )?;
        if n == 0 {
            return Err(SchedulerError::CommandNotFound { id });
        }
        info!(id, kind = ?self.kind, "command removed");
        Ok(())
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.update(id, "enabled", &enabled)
    }

    /// Replace the schedule. The job keeps its id; the next resolve sees the
    /// changed expression and recomputes `next_run`.
    pub fn set_schedule(&self, id: i64, cron_schedule: &str) -> Result<()> {
        self.update(id, "cron_schedule", &cron_schedule)
    }

    fn update(&self, id: i64, column: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            &format!(
                "UPDATE {} SET {column} = ?1 WHERE id = ?2",
                self.kind.table()
            ),
            rusqlite::params![value, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::CommandNotFound { id });
        }
        Ok(())
    }
}

fn row_to_command(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledCommand> {
    Ok(ScheduledCommand {
        id: row.get(0)?,
        cron_schedule: row.get(1)?,
        command: row.get(2)?,
        enabled: row.get(3)?,
    })
}

/// How a stored command line is executed.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// `sh -c <command>`.
    Shell,
    /// `<program> <args...>`, args split on whitespace.
    Program(PathBuf),
}

/// Registers a command table as an instance source type.
pub struct CommandSourceType {
    store: CommandStore,
    launcher: Arc<Launcher>,
}

impl CommandSourceType {
    pub fn shell(store: CommandStore) -> Self {
        Self::new(store, Launcher::Shell)
    }

    /// Scheduled subcommands of `program`, normally the running `dynacron`
    /// executable.
    pub fn program(store: CommandStore, program: impl Into<PathBuf>) -> Self {
        Self::new(store, Launcher::Program(program.into()))
    }

    fn new(store: CommandStore, launcher: Launcher) -> Self {
        Self {
            store,
            launcher: Arc::new(launcher),
        }
    }

    fn source(&self, command: ScheduledCommand) -> Arc<dyn Source> {
        Arc::new(CommandSource {
            command,
            launcher: Arc::clone(&self.launcher),
        })
    }
}

impl SourceType for CommandSourceType {
    fn type_id(&self) -> &str {
        self.store.kind().type_id()
    }

    fn provides_instances(&self) -> bool {
        true
    }

    fn list_records(&self) -> anyhow::Result<Vec<Record>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|cmd| Record::new(cmd.id.to_string(), self.source(cmd)))
            .collect())
    }

    fn find_record(&self, record_id: &str) -> anyhow::Result<Option<Arc<dyn Source>>> {
        let Ok(id) = record_id.parse::<i64>() else {
            return Ok(None);
        };
        Ok(self.store.get(id)?.map(|cmd| self.source(cmd)))
    }
}

/// One stored command, as a schedulable source.
pub struct CommandSource {
    command: ScheduledCommand,
    launcher: Arc<Launcher>,
}

#[async_trait]
impl Source for CommandSource {
    fn schedule(&self) -> String {
        self.command.cron_schedule.clone()
    }

    fn enabled(&self) -> Option<bool> {
        Some(self.command.enabled)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::generic()
    }

    async fn run(&self) -> anyhow::Result<()> {
        let cmd = &self.command.command;
        debug!(id = self.command.id, "exec: {cmd}");
        let mut process = match self.launcher.as_ref() {
            Launcher::Shell => {
                let mut p = tokio::process::Command::new("sh");
                p.arg("-c").arg(cmd);
                p
            }
            Launcher::Program(program) => {
                let mut p = tokio::process::Command::new(program);
                p.args(cmd.split_whitespace());
                p
            }
        };
        let output = process
            .stdin(std::process::Stdio::null())
            // the engine drops this future on dispatch timeout
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn `{cmd}`"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("`{cmd}` exited with {}: {}", output.status, stderr.trim());
        }
        debug!(
            id = self.command.id,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "command finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RunOutcome, SchedulerEngine};
    use crate::source::{RunCapability, SourceRegistry};
    use crate::store::JobStore;
    use crate::types::{JobFilter, LogFilter, SourceRef};
    use chrono::{Duration, Utc};
    use dynacron_core::config::SchedulerConfig;

    fn shared() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))
    }

    fn source(launcher: Launcher, command: &str) -> CommandSource {
        CommandSource {
            command: ScheduledCommand {
                id: 1,
                cron_schedule: DEFAULT_CRON_SCHEDULE.to_string(),
                command: command.to_string(),
                enabled: true,
            },
            launcher: Arc::new(launcher),
        }
    }

    #[test]
    fn store_crud() {
        let store = CommandStore::new(shared(), CommandKind::Shell).unwrap();
        let a = store.add("*/5 * * * *", "echo a").unwrap();
        let b = store.add(DEFAULT_CRON_SCHEDULE, "echo b").unwrap();
        assert_eq!(store.list().unwrap(), vec![a.clone(), b.clone()]);

        store.set_enabled(a.id, false).unwrap();
        store.set_schedule(a.id, "0 0 * * *").unwrap();
        let a = store.get(a.id).unwrap().unwrap();
        assert!(!a.enabled);
        assert_eq!(a.cron_schedule, "0 0 * * *");

        store.remove(b.id).unwrap();
        assert!(store.get(b.id).unwrap().is_none());
        assert!(matches!(
            store.remove(b.id),
            Err(SchedulerError::CommandNotFound { .. })
        ));
        assert!(matches!(
            store.set_schedule(b.id, "* * * * *"),
            Err(SchedulerError::CommandNotFound { .. })
        ));
    }

    #[test]
    fn kinds_use_separate_tables() {
        let conn = shared();
        let shell = CommandStore::new(conn.clone(), CommandKind::Shell).unwrap();
        let subcommands = CommandStore::new(conn, CommandKind::Dynacron).unwrap();
        shell.add(DEFAULT_CRON_SCHEDULE, "true").unwrap();
        subcommands.add("@hourly", "logs --limit 5").unwrap();

        assert_eq!(shell.list().unwrap().len(), 1);
        let listed = subcommands.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].command, "logs --limit 5");
    }

    #[test]
    fn source_type_exposes_rows() {
        let store = CommandStore::new(shared(), CommandKind::Shell).unwrap();
        let cmd = store.add("*/5 * * * *", "true").unwrap();
        store.set_enabled(cmd.id, false).unwrap();
        let ty = CommandSourceType::shell(store);
        assert_eq!(ty.type_id(), SHELL_COMMAND_TYPE);

        let records = ty.list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, cmd.id.to_string());
        assert_eq!(records[0].source.schedule(), "*/5 * * * *");
        assert_eq!(records[0].source.enabled(), Some(false));

        assert!(ty.find_record(&cmd.id.to_string()).unwrap().is_some());
        assert!(ty.find_record("404").unwrap().is_none());
        assert!(ty.find_record("not-a-number").unwrap().is_none());
    }

    #[tokio::test]
    async fn shell_run_reports_exit_status() {
        source(Launcher::Shell, "true").run().await.unwrap();

        let err = source(Launcher::Shell, "echo oops >&2; exit 3")
            .run()
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("oops"), "{msg}");
    }

    #[tokio::test]
    async fn program_run_passes_split_args() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        source(Launcher::Program("touch".into()), &marker.display().to_string())
            .run()
            .await
            .unwrap();
        assert!(marker.exists());

        let err = source(Launcher::Program("false".into()), "run --once")
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("run --once"));
    }

    #[tokio::test]
    async fn scheduled_command_runs_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");

        let conn = shared();
        let jobs = JobStore::from_shared(conn.clone()).unwrap();
        let commands = CommandStore::new(conn, CommandKind::Shell).unwrap();
        let cmd = commands
            .add("*/5 * * * *", &format!("touch '{}'", marker.display()))
            .unwrap();

        let sources = Arc::new(SourceRegistry::new());
        sources
            .register(Arc::new(CommandSourceType::shell(commands.clone())))
            .unwrap();
        let engine = SchedulerEngine::new(jobs, sources, SchedulerConfig::default());
        engine.reconcile().await.unwrap();

        let src = SourceRef::instance(SHELL_COMMAND_TYPE, cmd.id.to_string());
        let job = engine.store().find_job(&src).unwrap().unwrap();
        engine
            .store()
            .advance(job.id, Some(Utc::now() - Duration::minutes(1)))
            .unwrap();

        let outcome = engine.run_if_due(job.id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Executed(RunCapability::GenericRun));
        assert!(marker.exists());
        let logs = engine
            .store()
            .list_logs(&LogFilter {
                job_id: Some(job.id),
                limit: None,
            })
            .unwrap();
        assert_eq!(logs[0].message, "Success - `run()` called");

        // removing the row removes the job
        commands.remove(cmd.id).unwrap();
        engine.reconcile().await.unwrap();
        assert!(engine
            .store()
            .list_jobs(&JobFilter::default())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn edited_schedule_keeps_the_job() {
        let conn = shared();
        let jobs = JobStore::from_shared(conn.clone()).unwrap();
        let commands = CommandStore::new(conn, CommandKind::Shell).unwrap();
        let cmd = commands.add("0 0 1 1 *", "true").unwrap();

        let sources = Arc::new(SourceRegistry::new());
        sources
            .register(Arc::new(CommandSourceType::shell(commands.clone())))
            .unwrap();
        let engine = SchedulerEngine::new(jobs, sources, SchedulerConfig::default());
        engine.reconcile().await.unwrap();
        let src = SourceRef::instance(SHELL_COMMAND_TYPE, cmd.id.to_string());
        let before = engine.store().find_job(&src).unwrap().unwrap();

        commands.set_schedule(cmd.id, "*/5 * * * *").unwrap();
        engine.reconcile().await.unwrap();
        let after = engine.store().find_job(&src).unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.resolved_pattern.as_deref(), Some("*/5 * * * *"));
        assert!(after.next_run < before.next_run);
    }
}
