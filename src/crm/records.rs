//! Record persistence.

use chrono::Utc;
use rusqlite::{params, Row};

use super::types::Record;
use crate::error::CrmError;
use crate::storage::{json_column, parse_timestamp, sql_time, Database, OptionalExt};

const RECORD_COLUMNS_SQL: &str = "id, organization_id, entity_type, owner_id, status, stage, tags, data, created_at, updated_at";

/// Tenant-scoped record store.
pub struct RecordStore<'a> {
    db: &'a Database,
}

impl<'a> RecordStore<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new record and assign its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the record already has an ID or the insert fails.
    pub fn create(&self, record: &mut Record) -> Result<(), CrmError> {
        if record.id.is_some() {
            return Err(CrmError::Conflict("Record already has an id".to_string()));
        }
        if !record.data.is_object() {
            return Err(CrmError::Validation("data must be a JSON object".to_string()));
        }

        let now = Utc::now();
        record.created_at = now;
        record.updated_at = now;

        let conn = self.db.connection();
        conn.execute(
            r"INSERT INTO records (organization_id, entity_type, owner_id, status, stage, tags, data, created_at, updated_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.organization_id,
                record.entity_type,
                record.owner_id,
                record.status,
                record.stage,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.data)?,
                sql_time(&now),
                sql_time(&now),
            ],
        )
        .map_err(|e| CrmError::Database(format!("Failed to insert record: {e}")))?;

        record.id = Some(conn.last_insert_rowid());
        Ok(())
    }

    /// Load a record by ID within an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, organization_id: &str, id: i64) -> Result<Option<Record>, CrmError> {
        self.db
            .connection()
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS_SQL} FROM records WHERE organization_id = ?1 AND id = ?2"
                ),
                params![organization_id, id],
                row_to_record,
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to load record {id}: {e}")))
    }

    /// Load a record, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such record exists in the organization.
    pub fn require(&self, organization_id: &str, id: i64) -> Result<Record, CrmError> {
        self.get(organization_id, id)?
            .ok_or_else(|| CrmError::NotFound(format!("Record: {id}")))
    }

    /// Persist every mutable column of a record and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is unsaved, missing, or the update fails.
    pub fn update(&self, record: &mut Record) -> Result<(), CrmError> {
        let id = record
            .id
            .ok_or_else(|| CrmError::Validation("Cannot update an unsaved record".to_string()))?;

        record.updated_at = Utc::now();

        let rows = self
            .db
            .connection()
            .execute(
                r"UPDATE records SET
                  owner_id = ?1, status = ?2, stage = ?3, tags = ?4, data = ?5, updated_at = ?6
                  WHERE organization_id = ?7 AND id = ?8",
                params![
                    record.owner_id,
                    record.status,
                    record.stage,
                    serde_json::to_string(&record.tags)?,
                    serde_json::to_string(&record.data)?,
                    sql_time(&record.updated_at),
                    record.organization_id,
                    id,
                ],
            )
            .map_err(|e| CrmError::Database(format!("Failed to update record {id}: {e}")))?;

        if rows == 0 {
            return Err(CrmError::NotFound(format!("Record: {id}")));
        }
        Ok(())
    }

    /// List records of an organization, optionally filtered by entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(
        &self,
        organization_id: &str,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(&format!(
                r"SELECT {RECORD_COLUMNS_SQL} FROM records
                  WHERE organization_id = ?1 AND (?2 IS NULL OR entity_type = ?2)
                  ORDER BY id ASC
                  LIMIT ?3"
            ))
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![organization_id, entity_type, limit], row_to_record)
            .map_err(|e| CrmError::Database(format!("Failed to query records: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

fn row_to_record(row: &Row<'_>) -> Result<Record, rusqlite::Error> {
    let tags: String = row.get(6)?;
    let data: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let now = Utc::now();

    Ok(Record {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        entity_type: row.get(2)?,
        owner_id: row.get(3)?,
        status: row.get(4)?,
        stage: row.get(5)?,
        tags: json_column(6, &tags)?,
        data: json_column(7, &data)?,
        created_at: parse_timestamp(&created_at, now),
        updated_at: parse_timestamp(&updated_at, now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(&db);

        let mut record = Record::new("acme", "lead")
            .with_status("new")
            .with_data(json!({ "email": "ann@example.com" }));
        store.create(&mut record).unwrap();
        let id = record.id.unwrap();

        let loaded = store.get("acme", id).unwrap().unwrap();
        assert_eq!(loaded.status.as_deref(), Some("new"));
        assert_eq!(loaded.field("email"), json!("ann@example.com"));
    }

    #[test]
    fn test_organization_scoping() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(&db);

        let mut record = Record::new("acme", "lead");
        store.create(&mut record).unwrap();

        assert!(store.get("globex", record.id.unwrap()).unwrap().is_none());
        assert!(store.require("globex", record.id.unwrap()).is_err());
        assert!(store.list("globex", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_update() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(&db);

        let mut record = Record::new("acme", "deal");
        store.create(&mut record).unwrap();

        record.stage = Some("won".to_string());
        record.add_tags(&["closed".to_string()]);
        store.update(&mut record).unwrap();

        let loaded = store.require("acme", record.id.unwrap()).unwrap();
        assert_eq!(loaded.stage.as_deref(), Some("won"));
        assert_eq!(loaded.tags, vec!["closed"]);
    }

    #[test]
    fn test_update_unsaved_fails() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(&db);

        let mut record = Record::new("acme", "deal");
        assert!(store.update(&mut record).is_err());
    }

    #[test]
    fn test_list_filters_entity_type() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(&db);

        store.create(&mut Record::new("acme", "lead")).unwrap();
        store.create(&mut Record::new("acme", "deal")).unwrap();
        store.create(&mut Record::new("acme", "lead")).unwrap();

        assert_eq!(store.list("acme", Some("lead"), 10).unwrap().len(), 2);
        assert_eq!(store.list("acme", None, 10).unwrap().len(), 3);
        assert_eq!(store.list("acme", None, 1).unwrap().len(), 1);
    }
}
