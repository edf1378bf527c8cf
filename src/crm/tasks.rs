//! Follow-up tasks created by automations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::types::Task;
use crate::error::CrmError;
use crate::storage::{parse_optional_timestamp, parse_timestamp, sql_time, Database};

/// Task store.
pub struct TaskStore<'a> {
    db: &'a Database,
}

impl<'a> TaskStore<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a task and return it with its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create(
        &self,
        organization_id: &str,
        record_id: Option<i64>,
        title: &str,
        description: Option<&str>,
        assignee_id: Option<&str>,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Task, CrmError> {
        if title.trim().is_empty() {
            return Err(CrmError::Validation("Task title is empty".to_string()));
        }

        let now = Utc::now();
        let conn = self.db.connection();
        conn.execute(
            r"INSERT INTO tasks (organization_id, record_id, title, description, assignee_id, due_at, status, created_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7)",
            params![
                organization_id,
                record_id,
                title,
                description,
                assignee_id,
                due_at.as_ref().map(sql_time),
                sql_time(&now),
            ],
        )
        .map_err(|e| CrmError::Database(format!("Failed to create task: {e}")))?;

        Ok(Task {
            id: Some(conn.last_insert_rowid()),
            organization_id: organization_id.to_string(),
            record_id,
            title: title.to_string(),
            description: description.map(String::from),
            assignee_id: assignee_id.map(String::from),
            due_at,
            status: "open".to_string(),
            created_at: now,
        })
    }

    /// Tasks attached to a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn for_record(&self, organization_id: &str, record_id: i64) -> Result<Vec<Task>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                r"SELECT id, organization_id, record_id, title, description, assignee_id, due_at, status, created_at
                  FROM tasks WHERE organization_id = ?1 AND record_id = ?2
                  ORDER BY id ASC",
            )
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![organization_id, record_id], row_to_task)
            .map_err(|e| CrmError::Database(format!("Failed to query tasks: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

fn row_to_task(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let created_at: String = row.get(8)?;
    Ok(Task {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        record_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        assignee_id: row.get(5)?,
        due_at: parse_optional_timestamp(row.get(6)?),
        status: row.get(7)?,
        created_at: parse_timestamp(&created_at, Utc::now()),
    })
}
