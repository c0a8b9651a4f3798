//! Plain-text tables for the admin commands.

use chrono::{DateTime, Local, Utc};
use dynacron_scheduler::{Job, LogEntry, ScheduledCommand};

fn when(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

pub(crate) fn jobs_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "no jobs".to_string();
    }
    let mut out = format!(
        "{:<6} {:<32} {:<7} {:<7} {:<20} {}\n",
        "ID", "SOURCE", "ENABLED", "ACTIVE", "NEXT RUN", "PATTERN"
    );
    for job in jobs {
        out.push_str(&format!(
            "{:<6} {:<32} {:<7} {:<7} {:<20} {}\n",
            job.id,
            job.source.to_string(),
            yes_no(job.enabled),
            yes_no(job.resolved_enable),
            when(job.next_run),
            job.resolved_pattern.as_deref().unwrap_or("(unscheduled)"),
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

pub(crate) fn logs_table(logs: &[LogEntry]) -> String {
    if logs.is_empty() {
        return "no log entries".to_string();
    }
    logs.iter()
        .map(|l| {
            let job = l
                .job_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}  [{job}] {}  {}",
                when(Some(l.created_at)),
                l.source,
                l.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn commands_table(cmds: &[ScheduledCommand]) -> String {
    if cmds.is_empty() {
        return "no commands".to_string();
    }
    let mut out = format!("{:<6} {:<7} {:<24} {}\n", "ID", "ENABLED", "SCHEDULE", "COMMAND");
    for c in cmds {
        out.push_str(&format!(
            "{:<6} {:<7} {:<24} {}\n",
            c.id,
            yes_no(c.enabled),
            c.cron_schedule,
            c.command
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynacron_scheduler::SourceRef;

    fn job(pattern: Option<&str>) -> Job {
        let now = Utc::now();
        Job {
            id: 7,
            source: SourceRef::instance("shell_command", "3"),
            enabled: true,
            resolved_enable: false,
            resolved_pattern: pattern.map(String::from),
            next_run: None,
            last_resolved: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn job_rows_show_source_and_pattern() {
        let table = jobs_table(&[job(Some("*/5 * * * *")), job(None)]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("shell_command :: 3"));
        assert!(lines[1].contains("*/5 * * * *"));
        assert!(lines[2].ends_with("(unscheduled)"));
    }

    #[test]
    fn orphaned_log_has_no_job_id() {
        let now = Utc::now();
        let entry = LogEntry {
            id: 1,
            job_id: None,
            source: "reports".into(),
            message: "Success - `run()` called".into(),
            created_at: now,
            updated_at: now,
        };
        let out = logs_table(&[entry]);
        assert!(out.contains("[-] reports"));
    }

    #[test]
    fn empty_tables() {
        assert_eq!(jobs_table(&[]), "no jobs");
        assert_eq!(logs_table(&[]), "no log entries");
        assert_eq!(commands_table(&[]), "no commands");
    }
}
