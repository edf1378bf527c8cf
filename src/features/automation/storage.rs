//! Storage for automation rules.
//!
//! Rules live in the `rules` table, scoped by organization. Trigger,
//! conditions and actions are stored as JSON columns; YAML is only used for
//! import and export through [`RuleSet`].

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, Row};
use serde::{Deserialize, Serialize};

use super::rule::{Rule, TriggerType};
use crate::error::CrmError;
use crate::storage::{
    json_column, parse_optional_timestamp, parse_timestamp, sql_time, Database, OptionalExt,
};

const RULE_COLUMNS_SQL: &str = "id, organization_id, name, description, entity_type, enabled, priority, trigger, conditions, actions, run_count, last_run, created_at, updated_at";

/// Storage for automation rules.
pub struct RuleStorage<'a> {
    db: &'a Database,
}

impl<'a> RuleStorage<'a> {
    /// Create a new rule storage.
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Validate and insert a new rule, assigning its ID.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad definition, a conflict if the
    /// name is taken in the organization, or a database error.
    pub fn create(&self, rule: &mut Rule) -> Result<i64, CrmError> {
        rule.validate()?;
        if self.load(&rule.organization_id, &rule.name)?.is_some() {
            return Err(CrmError::Conflict(format!(
                "Rule already exists: {}",
                rule.name
            )));
        }

        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;

        let conn = self.db.connection();
        conn.execute(
            r"INSERT INTO rules (organization_id, name, description, entity_type, enabled, priority, trigger, conditions, actions, run_count, last_run, created_at, updated_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rule.organization_id,
                rule.name,
                rule.description,
                rule.entity_type,
                rule.enabled,
                rule.priority,
                serde_json::to_string(&rule.trigger)?,
                serde_json::to_string(&rule.conditions)?,
                serde_json::to_string(&rule.actions)?,
                rule.run_count,
                rule.last_run.as_ref().map(sql_time),
                sql_time(&rule.created_at),
                sql_time(&rule.updated_at),
            ],
        )
        .map_err(|e| write_error(&rule.name, &e))?;

        let id = conn.last_insert_rowid();
        rule.id = Some(id);
        tracing::info!(rule = %rule.name, rule_id = id, "rule created");
        Ok(id)
    }

    /// Save the definition of an existing rule.
    ///
    /// Counters (`run_count`, `last_run`) are left as stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule is invalid, unsaved, missing, or its new
    /// name collides with another rule.
    pub fn update(&self, rule: &mut Rule) -> Result<(), CrmError> {
        rule.validate()?;
        let id = rule
            .id
            .ok_or_else(|| CrmError::Validation("Cannot update an unsaved rule".to_string()))?;

        rule.updated_at = Utc::now();

        let rows = self
            .db
            .connection()
            .execute(
                r"UPDATE rules SET
                  name = ?1, description = ?2, entity_type = ?3, enabled = ?4, priority = ?5,
                  trigger = ?6, conditions = ?7, actions = ?8, updated_at = ?9
                  WHERE organization_id = ?10 AND id = ?11",
                params![
                    rule.name,
                    rule.description,
                    rule.entity_type,
                    rule.enabled,
                    rule.priority,
                    serde_json::to_string(&rule.trigger)?,
                    serde_json::to_string(&rule.conditions)?,
                    serde_json::to_string(&rule.actions)?,
                    sql_time(&rule.updated_at),
                    rule.organization_id,
                    id,
                ],
            )
            .map_err(|e| write_error(&rule.name, &e))?;

        if rows == 0 {
            return Err(CrmError::NotFound(format!("Rule: {id}")));
        }
        Ok(())
    }

    /// Create the rule, or replace the definition of the same-named rule.
    ///
    /// Returns `true` when a new rule was created.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or the write fails.
    pub fn upsert(&self, rule: &mut Rule) -> Result<bool, CrmError> {
        match self.load(&rule.organization_id, &rule.name)? {
            Some(existing) => {
                rule.id = existing.id;
                rule.run_count = existing.run_count;
                rule.last_run = existing.last_run;
                rule.created_at = existing.created_at;
                self.update(rule)?;
                Ok(false)
            }
            None => {
                rule.id = None;
                self.create(rule)?;
                Ok(true)
            }
        }
    }

    /// Load a rule by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load(&self, organization_id: &str, name: &str) -> Result<Option<Rule>, CrmError> {
        self.db
            .connection()
            .query_row(
                &format!(
                    "SELECT {RULE_COLUMNS_SQL} FROM rules WHERE organization_id = ?1 AND name = ?2"
                ),
                params![organization_id, name],
                row_to_rule,
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to load rule {name}: {e}")))
    }

    /// Load a rule by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, organization_id: &str, id: i64) -> Result<Option<Rule>, CrmError> {
        self.db
            .connection()
            .query_row(
                &format!(
                    "SELECT {RULE_COLUMNS_SQL} FROM rules WHERE organization_id = ?1 AND id = ?2"
                ),
                params![organization_id, id],
                row_to_rule,
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to load rule {id}: {e}")))
    }

    /// Find a rule by name, falling back to a numeric ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither matches.
    pub fn find(&self, organization_id: &str, name_or_id: &str) -> Result<Rule, CrmError> {
        if let Some(rule) = self.load(organization_id, name_or_id)? {
            return Ok(rule);
        }
        if let Ok(id) = name_or_id.parse::<i64>() {
            if let Some(rule) = self.get(organization_id, id)? {
                return Ok(rule);
            }
        }
        Err(CrmError::NotFound(format!("Rule: {name_or_id}")))
    }

    /// List all rules of an organization in execution order.
    ///
    /// # Errors
    ///
    /// Returns an error if rules cannot be listed.
    pub fn list(&self, organization_id: &str) -> Result<Vec<Rule>, CrmError> {
        self.query(
            &format!(
                r"SELECT {RULE_COLUMNS_SQL} FROM rules
                  WHERE organization_id = ?1
                  ORDER BY priority ASC, id ASC"
            ),
            params![organization_id],
        )
    }

    /// Enabled rules of an organization in execution order.
    ///
    /// # Errors
    ///
    /// Returns an error if rules cannot be listed.
    pub fn list_enabled(&self, organization_id: &str) -> Result<Vec<Rule>, CrmError> {
        self.query(
            &format!(
                r"SELECT {RULE_COLUMNS_SQL} FROM rules
                  WHERE organization_id = ?1 AND enabled = 1
                  ORDER BY priority ASC, id ASC"
            ),
            params![organization_id],
        )
    }

    /// Enabled scheduled rules across every organization.
    ///
    /// # Errors
    ///
    /// Returns an error if rules cannot be listed.
    pub fn list_scheduled(&self) -> Result<Vec<Rule>, CrmError> {
        let rules = self.query(
            &format!(
                r"SELECT {RULE_COLUMNS_SQL} FROM rules
                  WHERE enabled = 1
                  ORDER BY organization_id ASC, priority ASC, id ASC"
            ),
            [],
        )?;
        Ok(rules
            .into_iter()
            .filter(|r| r.trigger.trigger_type == TriggerType::Scheduled)
            .collect())
    }

    /// Delete a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be deleted.
    pub fn delete(&self, organization_id: &str, id: i64) -> Result<bool, CrmError> {
        let rows = self
            .db
            .connection()
            .execute(
                "DELETE FROM rules WHERE organization_id = ?1 AND id = ?2",
                params![organization_id, id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to delete rule {id}: {e}")))?;
        Ok(rows > 0)
    }

    /// Enable or disable a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rule does not exist.
    pub fn set_enabled(&self, organization_id: &str, id: i64, enabled: bool) -> Result<(), CrmError> {
        let rows = self
            .db
            .connection()
            .execute(
                "UPDATE rules SET enabled = ?1, updated_at = ?2 WHERE organization_id = ?3 AND id = ?4",
                params![enabled, sql_time(&Utc::now()), organization_id, id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to toggle rule {id}: {e}")))?;
        if rows == 0 {
            return Err(CrmError::NotFound(format!("Rule: {id}")));
        }
        Ok(())
    }

    /// Count a live execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_run(&self, organization_id: &str, id: i64, at: DateTime<Utc>) -> Result<(), CrmError> {
        self.db
            .connection()
            .execute(
                "UPDATE rules SET run_count = run_count + 1, last_run = ?1 WHERE organization_id = ?2 AND id = ?3",
                params![sql_time(&at), organization_id, id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to record run for rule {id}: {e}")))?;
        Ok(())
    }

    /// Set `last_run` without counting a run (used when a scheduled rule is
    /// queued).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_last_run(&self, organization_id: &str, id: i64, at: DateTime<Utc>) -> Result<(), CrmError> {
        self.db
            .connection()
            .execute(
                "UPDATE rules SET last_run = ?1 WHERE organization_id = ?2 AND id = ?3",
                params![sql_time(&at), organization_id, id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to update rule {id}: {e}")))?;
        Ok(())
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Rule>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params, row_to_rule)
            .map_err(|e| CrmError::Database(format!("Failed to query rules: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

fn write_error(name: &str, e: &rusqlite::Error) -> CrmError {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            CrmError::Conflict(format!("Rule already exists: {name}"))
        }
        _ => CrmError::Database(format!("Failed to save rule {name}: {e}")),
    }
}

fn row_to_rule(row: &Row<'_>) -> Result<Rule, rusqlite::Error> {
    let trigger: String = row.get(7)?;
    let conditions: String = row.get(8)?;
    let actions: String = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    let now = Utc::now();

    Ok(Rule {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        entity_type: row.get(4)?,
        enabled: row.get(5)?,
        priority: row.get(6)?,
        trigger: json_column(7, &trigger)?,
        conditions: json_column(8, &conditions)?,
        actions: json_column(9, &actions)?,
        run_count: row.get(10)?,
        last_run: parse_optional_timestamp(row.get(11)?),
        created_at: parse_timestamp(&created_at, now),
        updated_at: parse_timestamp(&updated_at, now),
    })
}

/// Rule set for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules in this set
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Create a new rule set.
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule.
    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Export to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, CrmError> {
        serde_yaml::to_string(self)
            .map_err(|e| CrmError::Config(format!("Failed to serialize rules: {e}")))
    }

    /// Import from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_yaml(yaml: &str) -> Result<Self, CrmError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CrmError::Validation(format!("Failed to parse rules: {e}")))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}
