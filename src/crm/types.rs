//! CRM entity types.
//!
//! A [`Record`] is a generic entity (lead, deal, ticket, ...) made of a few
//! typed columns plus an opaque JSON `data` object. Rules address both
//! through dotted field paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CrmError;
use crate::storage::sql_time;

/// Columns addressable by name. Everything else lives under `data.`.
pub const RECORD_COLUMNS: &[&str] = &[
    "id",
    "organization_id",
    "entity_type",
    "owner_id",
    "status",
    "stage",
    "tags",
    "created_at",
    "updated_at",
];

/// Columns that actions are allowed to write.
const WRITABLE_COLUMNS: &[&str] = &["owner_id", "status", "stage", "tags"];

/// Normalize a field path: column names stay as they are, `data.x` stays,
/// and any other bare name becomes `data.<name>`.
#[must_use]
pub fn normalize_field(path: &str) -> String {
    let path = path.trim();
    if RECORD_COLUMNS.contains(&path) || path == "data" || path.starts_with("data.") {
        path.to_string()
    } else {
        format!("data.{path}")
    }
}

/// Whether actions may write this field path.
#[must_use]
pub fn is_writable_field(path: &str) -> bool {
    let path = normalize_field(path);
    WRITABLE_COLUMNS.contains(&path.as_str()) || path.starts_with("data.") || path == "data"
}

/// A tenant-scoped CRM record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<i64>,
    pub organization_id: String,
    pub entity_type: String,
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub stage: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "empty_object")]
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Record {
    /// Create a new, unsaved record.
    #[must_use]
    pub fn new(organization_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            organization_id: organization_id.into(),
            entity_type: entity_type.into(),
            owner_id: None,
            status: None,
            stage: None,
            tags: Vec::new(),
            data: empty_object(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the data blob.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the status column.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the stage column.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Set the owner column.
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Resolve a field path. Unknown fields resolve to `Value::Null`.
    #[must_use]
    pub fn field(&self, path: &str) -> Value {
        let path = normalize_field(path);
        match path.as_str() {
            "id" => self.id.map_or(Value::Null, Value::from),
            "organization_id" => Value::String(self.organization_id.clone()),
            "entity_type" => Value::String(self.entity_type.clone()),
            "owner_id" => optional_string(self.owner_id.as_ref()),
            "status" => optional_string(self.status.as_ref()),
            "stage" => optional_string(self.stage.as_ref()),
            "tags" => Value::from(self.tags.clone()),
            "created_at" => Value::String(sql_time(&self.created_at)),
            "updated_at" => Value::String(sql_time(&self.updated_at)),
            "data" => self.data.clone(),
            other => {
                let rest = other.strip_prefix("data.").unwrap_or(other);
                rest.split('.')
                    .try_fold(&self.data, |node, key| lookup(node, key))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
        }
    }

    /// Write a field path.
    ///
    /// # Errors
    ///
    /// Returns a validation error for read-only columns, values of the wrong
    /// shape, or a data path that crosses a non-object value.
    pub fn set_field(&mut self, path: &str, value: Value) -> Result<(), CrmError> {
        let path = normalize_field(path);

        if RECORD_COLUMNS.contains(&path.as_str()) {
            if !WRITABLE_COLUMNS.contains(&path.as_str()) {
                return Err(CrmError::Validation(format!("Field is read-only: {path}")));
            }
            match path.as_str() {
                "owner_id" => self.owner_id = value_to_optional_string(&value),
                "status" => self.status = value_to_optional_string(&value),
                "stage" => self.stage = value_to_optional_string(&value),
                _ => self.tags = value_to_tags(&value)?,
            }
            return Ok(());
        }

        if path == "data" {
            if !value.is_object() {
                return Err(CrmError::Validation("data must be a JSON object".to_string()));
            }
            self.data = value;
            return Ok(());
        }

        let rest = path.strip_prefix("data.").unwrap_or(&path);
        let keys: Vec<&str> = rest.split('.').collect();
        let Some((last, parents)) = keys.split_last() else {
            return Err(CrmError::Validation(format!("Invalid field path: {path}")));
        };

        if !self.data.is_object() {
            self.data = empty_object();
        }
        let mut node = &mut self.data;
        for key in parents {
            let Value::Object(map) = node else {
                return Err(CrmError::Validation(format!(
                    "Cannot set {path}: {key} is not an object"
                )));
            };
            node = map.entry((*key).to_string()).or_insert_with(empty_object);
        }
        match node {
            Value::Object(map) => {
                map.insert((*last).to_string(), value);
                Ok(())
            }
            _ => Err(CrmError::Validation(format!(
                "Cannot set {path}: parent is not an object"
            ))),
        }
    }

    /// Add tags, skipping ones already present. Returns how many were added.
    pub fn add_tags(&mut self, tags: &[String]) -> usize {
        let mut added = 0;
        for tag in tags {
            if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                self.tags.push(tag.clone());
                added += 1;
            }
        }
        added
    }

    /// Remove tags (case-insensitive). Returns how many were removed.
    pub fn remove_tags(&mut self, tags: &[String]) -> usize {
        let before = self.tags.len();
        self.tags
            .retain(|t| !tags.iter().any(|r| r.eq_ignore_ascii_case(t)));
        before - self.tags.len()
    }

    /// Field paths whose values differ between `self` (old) and `updated`.
    ///
    /// Data keys are compared one level deep and reported as `data.<key>`.
    #[must_use]
    pub fn changed_fields(&self, updated: &Self) -> Vec<String> {
        let mut changed = Vec::new();

        for column in WRITABLE_COLUMNS {
            if self.field(column) != updated.field(column) {
                changed.push((*column).to_string());
            }
        }

        let empty = Map::new();
        let old = self.data.as_object().unwrap_or(&empty);
        let new = updated.data.as_object().unwrap_or(&empty);
        let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if old.get(key) != new.get(key) {
                changed.push(format!("data.{key}"));
            }
        }

        changed
    }

    /// Display label: `data.name`, then `data.email`, then the id.
    #[must_use]
    pub fn label(&self) -> String {
        for key in ["name", "full_name", "title", "email"] {
            if let Some(Value::String(s)) = self.data.get(key) {
                if !s.is_empty() {
                    return s.clone();
                }
            }
        }
        self.id
            .map_or_else(|| format!("new {}", self.entity_type), |id| format!("{} #{id}", self.entity_type))
    }
}

fn lookup<'v>(node: &'v Value, key: &str) -> Option<&'v Value> {
    match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn optional_string(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.clone()))
}

fn value_to_optional_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn value_to_tags(value: &Value) -> Result<Vec<String>, CrmError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| CrmError::Validation("tags must be strings".to_string()))
            })
            .collect(),
        _ => Err(CrmError::Validation(
            "tags must be a list or comma-separated string".to_string(),
        )),
    }
}

/// A follow-up task created by an automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<i64>,
    pub organization_id: String,
    pub record_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery channel for outbox messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }

    #[must_use]
    pub fn from_string(s: &str) -> Self {
        match s {
            "sms" => Self::Sms,
            _ => Self::Email,
        }
    }
}

/// A message waiting for the external delivery process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Option<i64>,
    pub organization_id: String,
    pub record_id: Option<i64>,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_writable_field() {
        assert!(is_writable_field("status"));
        assert!(is_writable_field("email"));
        assert!(is_writable_field("data.address.city"));
        assert!(!is_writable_field("id"));
        assert!(!is_writable_field("created_at"));
    }

    fn lead() -> Record {
        Record::new("acme", "lead")
            .with_status("new")
            .with_tags(vec!["vip".to_string()])
            .with_data(json!({
                "email": "ann@example.com",
                "premium": 120.5,
                "address": { "state": "TX" },
                "plans": ["gold", "silver"]
            }))
    }

    #[test]
    fn test_field_resolution() {
        let record = lead();

        assert_eq!(record.field("status"), json!("new"));
        assert_eq!(record.field("stage"), Value::Null);
        assert_eq!(record.field("email"), json!("ann@example.com"));
        assert_eq!(record.field("data.address.state"), json!("TX"));
        assert_eq!(record.field("plans.1"), json!("silver"));
        assert_eq!(record.field("tags"), json!(["vip"]));
        assert_eq!(record.field("missing.deep.path"), Value::Null);
    }

    #[test]
    fn test_set_field() {
        let mut record = lead();

        record.set_field("stage", json!("qualified")).unwrap();
        record.set_field("data.address.zip", json!("73301")).unwrap();
        record.set_field("score", json!(42)).unwrap();

        assert_eq!(record.stage.as_deref(), Some("qualified"));
        assert_eq!(record.field("address.zip"), json!("73301"));
        assert_eq!(record.field("data.score"), json!(42));
    }

    #[test]
    fn test_data_key_named_data() {
        let mut record = Record::new("acme", "lead")
            .with_data(json!({ "x": "top", "data": { "x": "nested" } }));

        assert_eq!(record.field("data.x"), json!("top"));
        assert_eq!(record.field("data.data.x"), json!("nested"));

        record.set_field("data.data.y", json!(1)).unwrap();
        assert_eq!(record.data["data"]["y"], json!(1));
        assert!(record.data.get("y").is_none());
    }

    #[test]
    fn test_set_field_rejects_read_only_and_bad_paths() {
        let mut record = lead();

        assert!(record.set_field("id", json!(5)).is_err());
        assert!(record.set_field("entity_type", json!("deal")).is_err());
        assert!(record.set_field("email.local", json!("x")).is_err());
    }

    #[test]
    fn test_tags() {
        let mut record = lead();

        assert_eq!(record.add_tags(&["VIP".to_string(), "renewal".to_string()]), 1);
        assert_eq!(record.tags, vec!["vip", "renewal"]);
        assert_eq!(record.remove_tags(&["Vip".to_string()]), 1);
        assert_eq!(record.tags, vec!["renewal"]);
    }

    #[test]
    fn test_changed_fields() {
        let old = lead();
        let mut new = old.clone();
        new.status = Some("contacted".to_string());
        new.set_field("premium", json!(99)).unwrap();
        new.set_field("notes", json!("called")).unwrap();

        assert_eq!(
            old.changed_fields(&new),
            vec!["status", "data.notes", "data.premium"]
        );
    }

    #[test]
    fn test_normalize_field() {
        assert_eq!(normalize_field("status"), "status");
        assert_eq!(normalize_field("email"), "data.email");
        assert_eq!(normalize_field("data.email"), "data.email");
    }

    #[test]
    fn test_label() {
        let record = Record::new("acme", "deal").with_data(json!({ "name": "Big Deal" }));
        assert_eq!(record.label(), "Big Deal");
        assert_eq!(Record::new("acme", "deal").label(), "new deal");
    }
}
