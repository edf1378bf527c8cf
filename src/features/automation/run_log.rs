//! Append-only log of rule runs.
//!
//! One row per rule evaluation that reached the executor, holding the
//! per-action outcome list as JSON.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::action::ActionType;
use crate::error::CrmError;
use crate::storage::{json_column, parse_timestamp, sql_time, Database, OptionalExt};

const RUN_COLUMNS_SQL: &str = "id, organization_id, rule_id, rule_name, record_id, trigger, status, dry_run, started_at, finished_at, action_log";

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every action ran (or was simulated) without failure
    Completed,
    /// At least one action failed
    Failed,
    /// Conditions did not match
    Skipped,
    /// Suspended by a `wait` action
    Waiting,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Waiting => "waiting",
        }
    }

    /// Parse from a stored string. Unknown values read as failed.
    #[must_use]
    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "skipped" => Self::Skipped,
            "waiting" => Self::Waiting,
            _ => Self::Failed,
        }
    }
}

/// Outcome of one action within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    /// Not attempted because an earlier action halted the rule
    Skipped,
    /// Simulated in a dry run
    DryRun,
}

impl ActionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::DryRun => "dry_run",
        }
    }
}

/// A single entry in a run's action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Position of the action in the rule
    pub index: usize,
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub message: String,
}

/// A rule run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRun {
    pub id: Option<i64>,
    pub organization_id: String,
    pub rule_id: i64,
    pub rule_name: String,
    pub record_id: Option<i64>,
    /// Event label (`on_create`, `manual`, `resume`, ...)
    pub trigger: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub actions: Vec<ActionLogEntry>,
}

impl RuleRun {
    /// Number of actions with the given status.
    #[must_use]
    pub fn count(&self, status: ActionStatus) -> usize {
        self.actions.iter().filter(|a| a.status == status).count()
    }
}

/// Run log store.
pub struct RunLog<'a> {
    db: &'a Database,
}

impl<'a> RunLog<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a finished run and assign its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append(&self, run: &mut RuleRun) -> Result<i64, CrmError> {
        let conn = self.db.connection();
        conn.execute(
            r"INSERT INTO rule_runs (organization_id, rule_id, rule_name, record_id, trigger, status, dry_run, started_at, finished_at, action_log)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.organization_id,
                run.rule_id,
                run.rule_name,
                run.record_id,
                run.trigger,
                run.status.as_str(),
                run.dry_run,
                sql_time(&run.started_at),
                sql_time(&run.finished_at),
                serde_json::to_string(&run.actions)?,
            ],
        )
        .map_err(|e| CrmError::Database(format!("Failed to append run: {e}")))?;

        let id = conn.last_insert_rowid();
        run.id = Some(id);
        Ok(id)
    }

    /// Load a run by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, organization_id: &str, id: i64) -> Result<Option<RuleRun>, CrmError> {
        self.db
            .connection()
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS_SQL} FROM rule_runs WHERE organization_id = ?1 AND id = ?2"
                ),
                params![organization_id, id],
                row_to_run,
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to load run {id}: {e}")))
    }

    /// Most recent runs first, optionally for one rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(
        &self,
        organization_id: &str,
        rule_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RuleRun>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(&format!(
                r"SELECT {RUN_COLUMNS_SQL} FROM rule_runs
                  WHERE organization_id = ?1 AND (?2 IS NULL OR rule_id = ?2)
                  ORDER BY id DESC
                  LIMIT ?3"
            ))
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![organization_id, rule_id, limit], row_to_run)
            .map_err(|e| CrmError::Database(format!("Failed to query runs: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

fn row_to_run(row: &Row<'_>) -> Result<RuleRun, rusqlite::Error> {
    let status: String = row.get(6)?;
    let started_at: String = row.get(8)?;
    let finished_at: String = row.get(9)?;
    let actions: String = row.get(10)?;
    let now = Utc::now();

    Ok(RuleRun {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        rule_id: row.get(2)?,
        rule_name: row.get(3)?,
        record_id: row.get(4)?,
        trigger: row.get(5)?,
        status: RunStatus::from_string(&status),
        dry_run: row.get(7)?,
        started_at: parse_timestamp(&started_at, now),
        finished_at: parse_timestamp(&finished_at, now),
        actions: json_column(10, &actions)?,
    })
}

/// Format a run for display.
#[must_use]
pub fn format_run(run: &RuleRun) -> String {
    use colored::Colorize;

    let status = match run.status {
        RunStatus::Completed => run.status.as_str().green(),
        RunStatus::Failed => run.status.as_str().red(),
        RunStatus::Skipped => run.status.as_str().dimmed(),
        RunStatus::Waiting => run.status.as_str().yellow(),
    };

    let mut lines = vec![format!(
        "Run #{} {} on record {} ({}){} {}",
        run.id.unwrap_or_default(),
        run.rule_name.bold(),
        run.record_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
        run.trigger,
        if run.dry_run { " [dry run]" } else { "" },
        status
    )];

    for entry in &run.actions {
        let marker = match entry.status {
            ActionStatus::Success => "✓".green(),
            ActionStatus::Failed => "✗".red(),
            ActionStatus::Skipped => "-".dimmed(),
            ActionStatus::DryRun => "~".cyan(),
        };
        lines.push(format!(
            "  {marker} {}. {}: {}",
            entry.index + 1,
            entry.action_type.display_name(),
            entry.message
        ));
    }

    lines.join("\n")
}
