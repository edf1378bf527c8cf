//! `SQLite` database connection and operations.
//!
//! The database is stored at `~/.crmflow/crmflow.db` and contains tables for:
//! - CRM records, tasks and the message outbox
//! - Automation rules and their run log
//! - The scheduler job queue

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::config::Paths;
use crate::error::CrmError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open() -> Result<Self, CrmError> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, CrmError> {
        let conn = Connection::open(path).map_err(|e| {
            CrmError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        Self::init(conn)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, CrmError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CrmError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CrmError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(|e| CrmError::Database(format!("Failed to configure connection: {e}")))?;

        let db = Self { conn };
        migrations::run(&db.conn)?;

        Ok(db)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, CrmError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Fixed-width RFC 3339 text, so timestamp columns compare correctly as strings.
pub(crate) fn sql_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 column, falling back to `fallback` for garbage.
pub(crate) fn parse_timestamp(value: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or(fallback, |t| t.with_timezone(&Utc))
}

/// Parse an optional RFC 3339 column.
pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    })
}

/// Adds `optional()` to row lookups.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Map a JSON column decode failure into a rusqlite conversion error.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), migrations::CURRENT_VERSION);
    }

    #[test]
    fn test_reopen_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::open_at(&db_path).unwrap();
            assert!(db.schema_version().unwrap() > 0);
        }

        {
            let db = Database::open_at(&db_path).unwrap();
            assert_eq!(db.schema_version().unwrap(), migrations::CURRENT_VERSION);
        }
        assert!(db_path.exists());
    }

    #[test]
    fn test_parse_timestamp_fallback() {
        let fallback = Utc::now();
        assert_eq!(parse_timestamp("garbage", fallback), fallback);
        assert!(parse_optional_timestamp(Some("2024-01-01T00:00:00Z".into())).is_some());
        assert!(parse_optional_timestamp(None).is_none());
    }

    #[test]
    fn test_sql_time_orders_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(sql_time(&early) < sql_time(&late));
        assert_eq!(parse_timestamp(&sql_time(&early), late), early.trunc_subsecs(6));
    }
}
