//! Database migrations for crmflow.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened.

use rusqlite::Connection;

use crate::error::CrmError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, CrmError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| CrmError::Database(format!("Failed to get schema version: {e}")))
}

fn set_version(conn: &Connection, version: i32) -> Result<(), CrmError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| CrmError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), CrmError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        tracing::debug!(version, "applying migration");
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), CrmError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(CrmError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: records, rules and the run log.
fn migrate_v1(conn: &Connection) -> Result<(), CrmError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            owner_id TEXT,
            status TEXT,
            stage TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_org_type
        ON records(organization_id, entity_type);

        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            entity_type TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 100,
            trigger TEXT NOT NULL,
            conditions TEXT NOT NULL,
            actions TEXT NOT NULL,
            run_count INTEGER NOT NULL DEFAULT 0,
            last_run TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (organization_id, name)
        );

        CREATE TABLE IF NOT EXISTS rule_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            rule_id INTEGER NOT NULL,
            rule_name TEXT NOT NULL,
            record_id INTEGER,
            trigger TEXT NOT NULL,
            status TEXT NOT NULL,
            dry_run INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            action_log TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_rule_runs_rule
        ON rule_runs(organization_id, rule_id);
        ",
    )
    .map_err(|e| CrmError::Database(format!("Migration v1 failed: {e}")))
}

/// Migration v2: scheduler queue, tasks and the message outbox.
fn migrate_v2(conn: &Connection) -> Result<(), CrmError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            run_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_status
        ON scheduled_jobs(status, run_at);

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            record_id INTEGER,
            title TEXT NOT NULL,
            description TEXT,
            assignee_id TEXT,
            due_at TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            record_id INTEGER,
            channel TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            created_at TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| CrmError::Database(format!("Migration v2 failed: {e}")))
}
