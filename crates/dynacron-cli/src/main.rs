use std::sync::{Arc, Mutex};

use clap::Parser;
use dynacron_core::DynacronConfig;
use dynacron_scheduler::{
    CommandKind, CommandSourceType, CommandStore, JobFilter, JobStore, LogFilter, SchedulerEngine,
    SourceRegistry,
};
use serde::Serialize;
use tracing::info;

mod cli;
mod output;

use cli::{Cli, CommandAction, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dynacron=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > DYNACRON_CONFIG env > ~/.dynacron/dynacron.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("DYNACRON_CONFIG").ok());
    let config = DynacronConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        DynacronConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let conn = Arc::new(Mutex::new(db));

    let jobs = JobStore::from_shared(conn.clone())?;
    let shell_commands = CommandStore::new(conn.clone(), CommandKind::Shell)?;
    let subcommands = CommandStore::new(conn, CommandKind::Dynacron)?;

    let sources = Arc::new(SourceRegistry::new());
    sources.register(Arc::new(CommandSourceType::shell(shell_commands.clone())))?;
    sources.register(Arc::new(CommandSourceType::program(
        subcommands.clone(),
        std::env::current_exe()?,
    )))?;

    let engine = SchedulerEngine::new(jobs, sources, config.scheduler.clone());

    match cli.command {
        Commands::Run { once: true } => {
            let (reconciled, batch) = engine.cycle().await?;
            print(cli.json, &(reconciled, batch), || {
                format!(
                    "reconciled: {} created, {} resolved, {} deleted\n\
                     dispatched: {} considered, {} executed, {} failed, {} skipped",
                    reconciled.created,
                    reconciled.resolved,
                    reconciled.deleted,
                    batch.considered,
                    batch.executed,
                    batch.failed,
                    batch.skipped
                )
            })?;
        }
        Commands::Run { once: false } => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping");
                }
                let _ = shutdown_tx.send(true);
            });
            engine.run(shutdown_rx).await?;
        }
        Commands::Jobs {
            enabled,
            source_type,
        } => {
            // discover first so the listing reflects current sources
            engine.reconcile().await?;
            let list = engine.store().list_jobs(&JobFilter {
                enabled,
                source_type,
            })?;
            print(cli.json, &list, || output::jobs_table(&list))?;
        }
        Commands::Enable { id } => toggle(cli.json, engine.store(), id, true)?,
        Commands::Disable { id } => toggle(cli.json, engine.store(), id, false)?,
        Commands::Logs { job, limit } => {
            let logs = engine.store().list_logs(&LogFilter {
                job_id: job,
                limit: Some(limit),
            })?;
            print(cli.json, &logs, || output::logs_table(&logs))?;
        }
        Commands::Shell { action } => manage(cli.json, &shell_commands, action)?,
        Commands::Subcommand { action } => manage(cli.json, &subcommands, action)?,
    }

    Ok(())
}

fn toggle(json: bool, store: &JobStore, id: i64, on: bool) -> anyhow::Result<()> {
    let job = store.set_enabled(id, on)?;
    print(json, &job, || {
        format!(
            "job {} ({}) {}",
            job.id,
            job.source,
            if on { "enabled" } else { "disabled" }
        )
    })
}

fn manage(json: bool, commands: &CommandStore, action: CommandAction) -> anyhow::Result<()> {
    let kind = commands.kind().type_id();
    match action {
        CommandAction::Add { command, schedule } => {
            warn_if_invalid(&schedule);
            let cmd = commands.add(&schedule, &command)?;
            print(json, &cmd, || format!("{kind} {} added", cmd.id))
        }
        CommandAction::List => {
            let list = commands.list()?;
            print(json, &list, || output::commands_table(&list))
        }
        CommandAction::Remove { id } => {
            commands.remove(id)?;
            print(json, &serde_json::json!({ "removed": id }), || {
                format!("{kind} {id} removed")
            })
        }
        CommandAction::Enable { id } => {
            commands.set_enabled(id, true)?;
            print(json, &serde_json::json!({ "enabled": id }), || {
                format!("{kind} {id} enabled")
            })
        }
        CommandAction::Disable { id } => {
            commands.set_enabled(id, false)?;
            print(json, &serde_json::json!({ "disabled": id }), || {
                format!("{kind} {id} disabled")
            })
        }
        CommandAction::Schedule { id, schedule } => {
            warn_if_invalid(&schedule);
            commands.set_schedule(id, &schedule)?;
            print(
                json,
                &serde_json::json!({ "id": id, "cron_schedule": schedule }),
                || format!("{kind} {id} rescheduled to `{schedule}`"),
            )
        }
    }
}

fn warn_if_invalid(schedule: &str) {
    if dynacron_scheduler::pattern::validate(schedule).is_none() {
        tracing::warn!(%schedule, "pattern does not validate; the job will stay unscheduled");
    }
}

fn print<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
