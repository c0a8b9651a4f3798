//! Schedule expression parsing and next-run computation.
//!
//! An expression is one or more cron clauses joined by `;`. The combined
//! schedule is the union of its clauses, so the next run is the earliest
//! next occurrence of any clause. A single bad clause invalidates the whole
//! expression.
//!
//! Clauses use standard 5-field cron (`min hour dom month dow`, Sunday is
//! `0` or `7`). The `cron` crate wants a leading seconds field and numbers
//! Sunday as `1`, so 5-field clauses are rewritten before parsing. 6/7-field
//! clauses and `@daily`-style aliases are handed to the `cron` crate as is.

use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};
use cron::Schedule;
use thiserror::Error;

/// Clause separator inside a multi-clause expression.
pub const CLAUSE_SEPARATOR: char = ';';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron clause {clause:?}: {reason}")]
pub struct InvalidPattern {
    pub clause: String,
    pub reason: String,
}

/// Earliest occurrence of `expr` strictly after `now`.
pub fn next_after<Tz: TimeZone>(
    expr: &str,
    now: &DateTime<Tz>,
) -> Result<DateTime<Tz>, InvalidPattern> {
    let mut earliest: Option<DateTime<Tz>> = None;
    for clause in expr.split(CLAUSE_SEPARATOR) {
        let schedule = parse_clause(clause)?;
        let next = schedule
            .after(now)
            .next()
            .ok_or_else(|| InvalidPattern {
                clause: clause.trim().to_string(),
                reason: "no future occurrence".to_string(),
            })?;
        earliest = match earliest {
            Some(current) if current <= next => Some(current),
            _ => Some(next),
        };
    }
    // split() always yields at least one item, and every item either
    // returned early or set `earliest`
    earliest.ok_or_else(|| InvalidPattern {
        clause: expr.to_string(),
        reason: "empty expression".to_string(),
    })
}

/// Validate `expr` against the local wall clock.
///
/// Returns the next run time in UTC, or `None` when any clause is invalid.
pub fn validate(expr: &str) -> Option<DateTime<Utc>> {
    next_after(expr, &Local::now())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse one clause into a `cron` schedule.
pub fn parse_clause(clause: &str) -> Result<Schedule, InvalidPattern> {
    let trimmed = clause.trim();
    if trimmed.is_empty() {
        return Err(InvalidPattern {
            clause: String::new(),
            reason: "empty clause".to_string(),
        });
    }
    Schedule::from_str(&normalize_clause(trimmed)).map_err(|e| InvalidPattern {
        clause: trimmed.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite a standard 5-field clause into the `cron` crate's 6-field form.
fn normalize_clause(clause: &str) -> String {
    let fields: Vec<&str> = clause.split_whitespace().collect();
    if fields.len() != 5 {
        return clause.to_string();
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_day_of_week(fields[4])
    )
}

/// Map numeric day-of-week values from `0..=7` (0 and 7 = Sunday) to the
/// `cron` crate's `1..=7` (1 = Sunday). Names and wildcards pass through.
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let translated = match base.split_once('-') {
                Some((start, end)) => match (start.parse::<u8>(), end.parse::<u8>()) {
                    // "0-7" and "0-6" both mean every day
                    (Ok(0), Ok(6 | 7)) => "1-7".to_string(),
                    // Sunday as the upper bound wraps to the crate's day 1
                    (Ok(s), Ok(7)) if s <= 6 => {
                        return match step {
                            Some(step) => format!("{}-7/{step},1", s + 1),
                            None => format!("{}-7,1", s + 1),
                        };
                    }
                    (Ok(s), Ok(e)) if s <= 6 && e <= 6 => {
                        format!("{}-{}", shift_day(s), shift_day(e))
                    }
                    _ => base.to_string(),
                },
                None => match base.parse::<u8>() {
                    Ok(day) if day <= 7 => shift_day(day).to_string(),
                    _ => base.to_string(),
                },
            };
            match step {
                Some(step) => format!("{translated}/{step}"),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_day(day: u8) -> u8 {
    if day == 7 {
        1
    } else {
        day + 1
    }
}
