//! Automation rule definitions.
//!
//! Rules define when (trigger), for which records (conditions) and what
//! (actions) the engine does.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::Action;
use super::condition::{Condition, ConditionGroup};
use crate::crm::{normalize_field, Record};
use crate::error::CrmError;
use crate::storage::sql_time;

/// An automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule ID
    #[serde(default)]
    pub id: Option<i64>,
    /// Owning organization
    #[serde(default)]
    pub organization_id: String,
    /// Rule name, unique within the organization
    pub name: String,
    /// Rule description
    #[serde(default)]
    pub description: Option<String>,
    /// Only records of this entity type are considered
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Whether the rule is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Priority (lower = runs first)
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Trigger that activates this rule
    pub trigger: Trigger,
    /// Condition tree that must evaluate to true
    #[serde(default)]
    pub conditions: ConditionGroup,
    /// Actions to perform, in order
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Number of live executions
    #[serde(default)]
    pub run_count: i64,
    /// Last live execution (or last scheduling, for scheduled rules)
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const fn default_enabled() -> bool {
    true
}

const fn default_priority() -> i32 {
    100
}

impl Rule {
    /// Create a new rule.
    #[must_use]
    pub fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            organization_id: String::new(),
            name: name.into(),
            description: None,
            entity_type: None,
            enabled: true,
            priority: default_priority(),
            trigger,
            conditions: ConditionGroup::default(),
            actions: Vec::new(),
            run_count: 0,
            last_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the owning organization.
    #[must_use]
    pub fn for_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = organization_id.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict the rule to one entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Replace the condition tree.
    #[must_use]
    pub fn with_conditions(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = conditions;
        self
    }

    /// Add a condition to the top-level group.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.rules.push(condition.into());
        self
    }

    /// Add an action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Set priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the rule can ever see this record.
    #[must_use]
    pub fn applies_to(&self, record: &Record) -> bool {
        record.organization_id == self.organization_id
            && self
                .entity_type
                .as_deref()
                .map_or(true, |t| t.eq_ignore_ascii_case(&record.entity_type))
    }

    /// Check if all conditions are met.
    #[must_use]
    pub fn conditions_met(&self, context: &RuleContext) -> bool {
        self.conditions.matches(context)
    }

    /// Check if the trigger fires for the context's event and record.
    #[must_use]
    pub fn should_trigger(&self, context: &RuleContext) -> bool {
        self.enabled && self.applies_to(&context.record) && self.trigger.should_fire(context)
    }

    /// Whether a scheduled rule is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.trigger.config {
            TriggerConfig::Schedule(schedule) if self.trigger.trigger_type == TriggerType::Scheduled => {
                schedule.is_due(now, self.last_run.as_ref())
            }
            _ => false,
        }
    }

    /// Check the rule definition before it is stored.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first problem found.
    pub fn validate(&self) -> Result<(), CrmError> {
        if self.name.trim().is_empty() {
            return Err(CrmError::Validation("Rule name is empty".to_string()));
        }
        if self.organization_id.trim().is_empty() {
            return Err(CrmError::Validation(format!(
                "Rule '{}' has no organization",
                self.name
            )));
        }
        if self.actions.is_empty() {
            return Err(CrmError::Validation(format!(
                "Rule '{}' has no actions",
                self.name
            )));
        }
        self.trigger.validate()?;
        self.conditions.validate()?;
        for (index, action) in self.actions.iter().enumerate() {
            action.validate().map_err(|e| match e {
                CrmError::Validation(msg) => {
                    CrmError::Validation(format!("Action {}: {msg}", index + 1))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Trigger that activates a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger type
    pub trigger_type: TriggerType,
    /// Additional configuration
    #[serde(default)]
    pub config: TriggerConfig,
}

impl Trigger {
    /// Fires when a record is created.
    #[must_use]
    pub const fn on_create() -> Self {
        Self {
            trigger_type: TriggerType::OnCreate,
            config: TriggerConfig::None,
        }
    }

    /// Fires when a record is updated, optionally only for some fields.
    #[must_use]
    pub fn on_update(watched_fields: Vec<String>) -> Self {
        Self {
            trigger_type: TriggerType::OnUpdate,
            config: if watched_fields.is_empty() {
                TriggerConfig::None
            } else {
                TriggerConfig::Update { watched_fields }
            },
        }
    }

    /// Create a scheduled trigger.
    #[must_use]
    pub const fn scheduled(schedule: Schedule) -> Self {
        Self {
            trigger_type: TriggerType::Scheduled,
            config: TriggerConfig::Schedule(schedule),
        }
    }

    /// Fires on webform submissions, optionally for one form only.
    #[must_use]
    pub const fn webform(form_id: Option<String>) -> Self {
        Self {
            trigger_type: TriggerType::Webform,
            config: TriggerConfig::Webform { form_id },
        }
    }

    /// Create a manual trigger.
    #[must_use]
    pub const fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            config: TriggerConfig::None,
        }
    }

    /// Check if the trigger fires for the context's event.
    #[must_use]
    pub fn should_fire(&self, context: &RuleContext) -> bool {
        match (self.trigger_type, &context.event) {
            (TriggerType::OnCreate, RecordEvent::Created)
            | (TriggerType::Scheduled, RecordEvent::Scheduled)
            | (TriggerType::Manual, RecordEvent::Manual) => true,
            (TriggerType::OnUpdate, RecordEvent::Updated) => match &self.config {
                TriggerConfig::Update { watched_fields } if !watched_fields.is_empty() => {
                    watched_fields.iter().any(|watched| {
                        let watched = normalize_field(watched);
                        context.changed_fields.iter().any(|changed| {
                            let changed = normalize_field(changed);
                            changed == watched
                                || watched.starts_with(&format!("{changed}."))
                                || changed.starts_with(&format!("{watched}."))
                        })
                    })
                }
                _ => true,
            },
            (TriggerType::Webform, RecordEvent::Webform { form_id }) => match &self.config {
                TriggerConfig::Webform {
                    form_id: Some(wanted),
                } => wanted == form_id,
                _ => true,
            },
            _ => false,
        }
    }

    /// Check the trigger configuration against its type.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a mismatched or incomplete config.
    pub fn validate(&self) -> Result<(), CrmError> {
        match (self.trigger_type, &self.config) {
            (TriggerType::Scheduled, TriggerConfig::Schedule(schedule)) => schedule.validate(),
            (TriggerType::Scheduled, _) => Err(CrmError::Validation(
                "Scheduled trigger needs a schedule".to_string(),
            )),
            (TriggerType::OnUpdate, TriggerConfig::Update { .. } | TriggerConfig::None)
            | (TriggerType::Webform, TriggerConfig::Webform { .. } | TriggerConfig::None)
            | (TriggerType::OnCreate | TriggerType::Manual, TriggerConfig::None) => Ok(()),
            (trigger_type, _) => Err(CrmError::Validation(format!(
                "Trigger config does not fit a {} trigger",
                trigger_type.as_str()
            ))),
        }
    }

    /// Short human description.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.config {
            TriggerConfig::Schedule(schedule) => format!("scheduled ({})", schedule.describe()),
            TriggerConfig::Update { watched_fields } if !watched_fields.is_empty() => {
                format!("on_update ({})", watched_fields.join(", "))
            }
            TriggerConfig::Webform {
                form_id: Some(form_id),
            } => format!("webform ({form_id})"),
            _ => self.trigger_type.as_str().to_string(),
        }
    }
}

/// Types of triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Record created
    OnCreate,
    /// Record updated
    OnUpdate,
    /// Time-based schedule
    Scheduled,
    /// Webform submitted
    Webform,
    /// Manually triggered
    Manual,
}

impl TriggerType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OnCreate => "on_create",
            Self::OnUpdate => "on_update",
            Self::Scheduled => "scheduled",
            Self::Webform => "webform",
            Self::Manual => "manual",
        }
    }

    /// Get display name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::OnCreate => "On Create",
            Self::OnUpdate => "On Update",
            Self::Scheduled => "Scheduled",
            Self::Webform => "Webform",
            Self::Manual => "Manual",
        }
    }
}

/// Trigger configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Schedule configuration
    Schedule(Schedule),
    /// Fields whose change fires an update trigger
    Update {
        #[serde(default)]
        watched_fields: Vec<String>,
    },
    /// Form filter for webform triggers
    Webform {
        #[serde(default)]
        form_id: Option<String>,
    },
    /// No configuration
    #[default]
    None,
}

/// Schedule for time-based triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule type
    pub schedule_type: ScheduleType,
    /// Time of day (for daily/weekly)
    #[serde(default)]
    pub time: Option<NaiveTime>,
    /// Days of week (for weekly)
    #[serde(default)]
    pub days: Option<Vec<Weekday>>,
    /// Interval in minutes (for interval-based)
    #[serde(default)]
    pub interval_minutes: Option<i64>,
}

impl Schedule {
    /// Create a daily schedule.
    #[must_use]
    pub const fn daily(time: NaiveTime) -> Self {
        Self {
            schedule_type: ScheduleType::Daily,
            time: Some(time),
            days: None,
            interval_minutes: None,
        }
    }

    /// Create a weekly schedule.
    #[must_use]
    pub const fn weekly(days: Vec<Weekday>, time: NaiveTime) -> Self {
        Self {
            schedule_type: ScheduleType::Weekly,
            time: Some(time),
            days: Some(days),
            interval_minutes: None,
        }
    }

    /// Create an interval schedule.
    #[must_use]
    pub const fn every_minutes(minutes: i64) -> Self {
        Self {
            schedule_type: ScheduleType::Interval,
            time: None,
            days: None,
            interval_minutes: Some(minutes),
        }
    }

    /// Check if the schedule is due at `now`, given the last run.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, last_run: Option<&DateTime<Utc>>) -> bool {
        match self.schedule_type {
            ScheduleType::Daily => self
                .time
                .is_some_and(|time| now.time() >= time && !ran_today(now, last_run)),
            ScheduleType::Weekly => match (&self.time, &self.days) {
                (Some(time), Some(days)) => {
                    days.contains(&now.weekday())
                        && now.time() >= *time
                        && !ran_today(now, last_run)
                }
                _ => false,
            },
            ScheduleType::Interval => match (self.interval_minutes, last_run) {
                (Some(_), None) => true,
                (Some(interval), Some(last)) => {
                    now.signed_duration_since(*last).num_minutes() >= interval
                }
                (None, _) => false,
            },
        }
    }

    /// Check the schedule fields against its type.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing time, day list or interval.
    pub fn validate(&self) -> Result<(), CrmError> {
        let ok = match self.schedule_type {
            ScheduleType::Daily => self.time.is_some(),
            ScheduleType::Weekly => {
                self.time.is_some() && self.days.as_ref().is_some_and(|d| !d.is_empty())
            }
            ScheduleType::Interval => self.interval_minutes.is_some_and(|m| m > 0),
        };
        if ok {
            Ok(())
        } else {
            Err(CrmError::Validation(format!(
                "Incomplete {} schedule",
                self.schedule_type.as_str()
            )))
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let time = self
            .time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        match self.schedule_type {
            ScheduleType::Daily => format!("daily at {time}"),
            ScheduleType::Weekly => {
                let days = self
                    .days
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("weekly on {days} at {time}")
            }
            ScheduleType::Interval => {
                format!("every {} min", self.interval_minutes.unwrap_or_default())
            }
        }
    }
}

fn ran_today(now: DateTime<Utc>, last_run: Option<&DateTime<Utc>>) -> bool {
    last_run.is_some_and(|last| last.date_naive() == now.date_naive())
}

/// Types of schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Run daily at a specific time
    Daily,
    /// Run weekly on specific days
    Weekly,
    /// Run at regular intervals
    Interval,
}

impl ScheduleType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Interval => "interval",
        }
    }
}

/// What happened to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEvent {
    Created,
    Updated,
    Webform { form_id: String },
    Scheduled,
    Manual,
    /// Continuation of a rule after a `wait` action
    Resumed,
}

impl RecordEvent {
    /// Label stored in the run log.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "on_create",
            Self::Updated => "on_update",
            Self::Webform { .. } => "webform",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Resumed => "resume",
        }
    }
}

/// Context for rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// Current time
    pub now: DateTime<Utc>,
    /// Event being handled
    pub event: RecordEvent,
    /// Record as currently stored
    pub record: Record,
    /// Fields changed by the event (for `on_update`)
    pub changed_fields: Vec<String>,
    /// Name of the rule being executed
    pub rule_name: Option<String>,
    /// Variables for substitution
    pub variables: HashMap<String, String>,
}

impl RuleContext {
    /// Create a context for a record and event at the current time.
    #[must_use]
    pub fn new(record: Record, event: RecordEvent) -> Self {
        Self {
            now: Utc::now(),
            event,
            record,
            changed_fields: Vec::new(),
            rule_name: None,
            variables: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub fn with_changed_fields(mut self, changed_fields: Vec<String>) -> Self {
        self.changed_fields = changed_fields;
        self
    }

    #[must_use]
    pub fn with_rule_name(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_name = Some(rule_name.into());
        self
    }

    /// Add a variable.
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Replace `{placeholder}` tokens in a template.
    ///
    /// Built-ins (`today`, `now`, `rule_name`, `record_id`,
    /// `organization_id`) win over variables, which win over record fields.
    /// Unknown or null placeholders are left as written.
    #[must_use]
    pub fn substitute(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];

            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let name = &after[..end];
            if !is_placeholder_name(name) {
                out.push('{');
                rest = after;
                continue;
            }

            match self.placeholder(name) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }

    /// Substitute every string inside a JSON value.
    #[must_use]
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.substitute_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn placeholder(&self, name: &str) -> Option<String> {
        match name {
            "today" => return Some(self.now.format("%Y-%m-%d").to_string()),
            "now" => return Some(sql_time(&self.now)),
            "rule_name" => return self.rule_name.clone(),
            "record_id" => return self.record.id.map(|id| id.to_string()),
            "organization_id" => return Some(self.record.organization_id.clone()),
            _ => {}
        }

        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }

        match self.record.field(name) {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other => Some(other.to_string()),
        }
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
