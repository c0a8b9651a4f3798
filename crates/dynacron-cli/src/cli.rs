//! CLI definitions for dynacron.

use clap::{Parser, Subcommand};

/// Dynamic cron job registry.
#[derive(Parser)]
#[command(name = "dynacron")]
#[command(about = "Discover, schedule and run cron jobs declared by registered sources")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (overrides DYNACRON_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Reconcile and dispatch due jobs until interrupted
    Run {
        /// Run a single reconcile + dispatch cycle, then exit
        #[arg(long)]
        once: bool,
    },

    /// Reconcile, then list jobs
    Jobs {
        /// Only jobs whose operator flag matches
        #[arg(long)]
        enabled: Option<bool>,

        /// Only jobs of this source type
        #[arg(long)]
        source_type: Option<String>,
    },

    /// Turn a job on
    Enable {
        /// Job ID
        id: i64,
    },

    /// Turn a job off; its schedule keeps advancing without running
    Disable {
        /// Job ID
        id: i64,
    },

    /// Show run history, newest first
    Logs {
        /// Only entries of this job
        #[arg(long)]
        job: Option<i64>,

        /// Maximum number of entries
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Manage scheduled shell commands
    Shell {
        #[command(subcommand)]
        action: CommandAction,
    },

    /// Manage scheduled dynacron subcommands (e.g. "logs --limit 20")
    Subcommand {
        #[command(subcommand)]
        action: CommandAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum CommandAction {
    /// Add a command
    Add {
        /// Command line (`sh -c` for shell, arguments for subcommands)
        command: String,

        /// Cron pattern; several clauses may be joined with `;`
        #[arg(short, long, default_value = dynacron_scheduler::command::DEFAULT_CRON_SCHEDULE)]
        schedule: String,
    },

    /// List stored commands
    List,

    /// Delete a command
    Remove {
        /// Command ID
        id: i64,
    },

    /// Enable a command
    Enable {
        /// Command ID
        id: i64,
    },

    /// Disable a command
    Disable {
        /// Command ID
        id: i64,
    },

    /// Replace a command's cron pattern, keeping its job and log history
    Schedule {
        /// Command ID
        id: i64,

        /// New cron pattern
        schedule: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_once() {
        let cli = Cli::try_parse_from(["dynacron", "run", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { once: true }));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_job_filters() {
        let cli = Cli::try_parse_from([
            "dynacron",
            "--json",
            "jobs",
            "--enabled",
            "false",
            "--source-type",
            "shell_command",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Jobs {
                enabled,
                source_type,
            } => {
                assert_eq!(enabled, Some(false));
                assert_eq!(source_type.as_deref(), Some("shell_command"));
            }
            _ => panic!("expected jobs"),
        }
    }

    #[test]
    fn shell_add_defaults_to_every_minute() {
        let cli = Cli::try_parse_from(["dynacron", "shell", "add", "echo hi"]).unwrap();
        match cli.command {
            Commands::Shell {
                action: CommandAction::Add { command, schedule },
            } => {
                assert_eq!(command, "echo hi");
                assert_eq!(schedule, "* * * * *");
            }
            _ => panic!("expected shell add"),
        }
    }

    #[test]
    fn shell_schedule_takes_id_and_pattern() {
        let cli =
            Cli::try_parse_from(["dynacron", "shell", "schedule", "4", "*/10 * * * *"]).unwrap();
        match cli.command {
            Commands::Shell {
                action: CommandAction::Schedule { id, schedule },
            } => {
                assert_eq!(id, 4);
                assert_eq!(schedule, "*/10 * * * *");
            }
            _ => panic!("expected shell schedule"),
        }
    }

    #[test]
    fn subcommand_add_keeps_args_as_one_line() {
        let cli = Cli::try_parse_from([
            "dynacron",
            "subcommand",
            "add",
            "logs --limit 20",
            "--schedule",
            "@daily",
        ])
        .unwrap();
        match cli.command {
            Commands::Subcommand {
                action: CommandAction::Add { command, schedule },
            } => {
                assert_eq!(command, "logs --limit 20");
                assert_eq!(schedule, "@daily");
            }
            _ => panic!("expected subcommand add"),
        }
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["dynacron", "logs", "--job", "3", "-c", "/tmp/d.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/d.toml"));
        assert!(matches!(
            cli.command,
            Commands::Logs {
                job: Some(3),
                limit: 50
            }
        ));
    }
}
