//! Actions for automation rules.
//!
//! Actions define what happens when a rule fires. They are plain data; the
//! engine dispatches on [`ActionParams`] to perform them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rule::RuleContext;
use crate::crm::is_writable_field;
use crate::error::CrmError;

const WEBHOOK_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Longest accepted `wait` (one year).
pub const MAX_WAIT_MINUTES: i64 = 60 * 24 * 366;

/// Furthest accepted task due date (ten years).
pub const MAX_DUE_IN_DAYS: i64 = 3660;

/// An action to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action parameters, tagged by `type`
    #[serde(flatten)]
    pub params: ActionParams,
    /// Keep running the remaining actions if this one fails
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
}

impl Action {
    /// Create a new action.
    #[must_use]
    pub const fn new(params: ActionParams) -> Self {
        Self {
            params,
            continue_on_error: false,
        }
    }

    /// Let the rule continue after this action fails.
    #[must_use]
    pub const fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Create an update field action.
    #[must_use]
    pub fn update_field(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(ActionParams::UpdateField {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Create a send email action.
    #[must_use]
    pub fn send_email(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(ActionParams::SendEmail {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        })
    }

    /// Create a send SMS action.
    #[must_use]
    pub fn send_sms(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(ActionParams::SendSms {
            to: to.into(),
            body: body.into(),
        })
    }

    /// Create a create task action.
    #[must_use]
    pub fn create_task(title: impl Into<String>) -> Self {
        Self::new(ActionParams::CreateTask {
            title: title.into(),
            description: None,
            assignee: None,
            due_in_days: None,
        })
    }

    /// Assign a fixed owner.
    #[must_use]
    pub fn assign_owner(owner_id: impl Into<String>) -> Self {
        Self::new(ActionParams::AssignOwner {
            owner_id: Some(owner_id.into()),
            pool: Vec::new(),
        })
    }

    /// Assign owners round-robin from a pool.
    #[must_use]
    pub fn round_robin(pool: Vec<String>) -> Self {
        Self::new(ActionParams::AssignOwner {
            owner_id: None,
            pool,
        })
    }

    /// Create an add tags action.
    #[must_use]
    pub fn add_tags(tags: Vec<String>) -> Self {
        Self::new(ActionParams::AddTag { tags })
    }

    /// Create a remove tags action.
    #[must_use]
    pub fn remove_tags(tags: Vec<String>) -> Self {
        Self::new(ActionParams::RemoveTag { tags })
    }

    /// Create a POST webhook action with the record as body.
    #[must_use]
    pub fn webhook(url: impl Into<String>) -> Self {
        Self::new(ActionParams::CallWebhook {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        })
    }

    /// Pause the rule and resume the remaining actions later.
    #[must_use]
    pub const fn wait(minutes: i64) -> Self {
        Self::new(ActionParams::Wait { minutes })
    }

    /// Create a log message action.
    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ActionParams::Log {
            message: message.into(),
        })
    }

    /// The action's type.
    #[must_use]
    pub const fn action_type(&self) -> ActionType {
        self.params.action_type()
    }

    /// Apply variable substitution to parameters.
    #[must_use]
    pub fn with_substitution(&self, context: &RuleContext) -> Self {
        let params = match &self.params {
            ActionParams::UpdateField { field, value } => ActionParams::UpdateField {
                field: field.clone(),
                value: context.substitute_value(value),
            },
            ActionParams::SendEmail { to, subject, body } => ActionParams::SendEmail {
                to: context.substitute(to),
                subject: context.substitute(subject),
                body: context.substitute(body),
            },
            ActionParams::SendSms { to, body } => ActionParams::SendSms {
                to: context.substitute(to),
                body: context.substitute(body),
            },
            ActionParams::CreateTask {
                title,
                description,
                assignee,
                due_in_days,
            } => ActionParams::CreateTask {
                title: context.substitute(title),
                description: description.as_ref().map(|d| context.substitute(d)),
                assignee: assignee.as_ref().map(|a| context.substitute(a)),
                due_in_days: *due_in_days,
            },
            ActionParams::AssignOwner { owner_id, pool } => ActionParams::AssignOwner {
                owner_id: owner_id.as_ref().map(|o| context.substitute(o)),
                pool: pool.clone(),
            },
            ActionParams::AddTag { tags } => ActionParams::AddTag {
                tags: tags.iter().map(|t| context.substitute(t)).collect(),
            },
            ActionParams::RemoveTag { tags } => ActionParams::RemoveTag {
                tags: tags.iter().map(|t| context.substitute(t)).collect(),
            },
            ActionParams::CallWebhook {
                url,
                method,
                headers,
                body,
            } => ActionParams::CallWebhook {
                url: context.substitute(url),
                method: method.clone(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), context.substitute(v)))
                    .collect(),
                body: body.as_ref().map(|b| context.substitute_value(b)),
            },
            ActionParams::Wait { minutes } => ActionParams::Wait { minutes: *minutes },
            ActionParams::Log { message } => ActionParams::Log {
                message: context.substitute(message),
            },
        };

        Self {
            params,
            continue_on_error: self.continue_on_error,
        }
    }

    /// What the action would do, for dry runs and rule listings.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.params {
            ActionParams::UpdateField { field, value } => format!("Set {field} = {value}"),
            ActionParams::SendEmail { to, subject, .. } => {
                format!("Email {to}: \"{subject}\"")
            }
            ActionParams::SendSms { to, .. } => format!("SMS {to}"),
            ActionParams::CreateTask {
                title,
                assignee,
                due_in_days,
                ..
            } => {
                let mut text = format!("Create task \"{title}\"");
                if let Some(assignee) = assignee {
                    text.push_str(&format!(" for {assignee}"));
                }
                if let Some(days) = due_in_days {
                    text.push_str(&format!(" due in {days} day(s)"));
                }
                text
            }
            ActionParams::AssignOwner {
                owner_id: Some(owner_id),
                ..
            } => format!("Assign owner {owner_id}"),
            ActionParams::AssignOwner { pool, .. } => {
                format!("Assign owner round-robin from [{}]", pool.join(", "))
            }
            ActionParams::AddTag { tags } => format!("Add tags: {}", tags.join(", ")),
            ActionParams::RemoveTag { tags } => format!("Remove tags: {}", tags.join(", ")),
            ActionParams::CallWebhook { url, method, .. } => {
                format!("{} {url}", method.to_uppercase())
            }
            ActionParams::Wait { minutes } => format!("Wait {minutes} minute(s)"),
            ActionParams::Log { message } => format!("Log: {message}"),
        }
    }

    /// Check the parameters before a rule is stored.
    ///
    /// # Errors
    ///
    /// Returns a validation error for missing or malformed parameters.
    pub fn validate(&self) -> Result<(), CrmError> {
        let invalid =
            |msg: &str| -> Result<(), CrmError> { Err(CrmError::Validation(msg.to_string())) };

        match &self.params {
            ActionParams::UpdateField { field, .. } => {
                if field.trim().is_empty() {
                    return invalid("update_field needs a field");
                }
                if !is_writable_field(field) {
                    return Err(CrmError::Validation(format!("Field is read-only: {field}")));
                }
            }
            ActionParams::SendEmail { to, subject, body } => {
                if to.trim().is_empty() || subject.trim().is_empty() || body.trim().is_empty() {
                    return invalid("send_email needs to, subject and body");
                }
            }
            ActionParams::SendSms { to, body } => {
                if to.trim().is_empty() || body.trim().is_empty() {
                    return invalid("send_sms needs to and body");
                }
            }
            ActionParams::CreateTask {
                title, due_in_days, ..
            } => {
                if title.trim().is_empty() {
                    return invalid("create_task needs a title");
                }
                if due_in_days.is_some_and(|d| d < 0) {
                    return invalid("due_in_days must not be negative");
                }
                if due_in_days.is_some_and(|d| d > MAX_DUE_IN_DAYS) {
                    return Err(CrmError::Validation(format!(
                        "due_in_days must be at most {MAX_DUE_IN_DAYS}"
                    )));
                }
            }
            ActionParams::AssignOwner { owner_id, pool } => {
                let has_owner = owner_id.as_ref().is_some_and(|o| !o.trim().is_empty());
                if !has_owner && pool.is_empty() {
                    return invalid("assign_owner needs an owner_id or a pool");
                }
            }
            ActionParams::AddTag { tags } | ActionParams::RemoveTag { tags } => {
                if tags.iter().all(|t| t.trim().is_empty()) {
                    return invalid("tag actions need at least one tag");
                }
            }
            ActionParams::CallWebhook { url, method, .. } => {
                let templated = url.starts_with('{');
                if !templated && !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(CrmError::Validation(format!("Invalid webhook URL: {url}")));
                }
                if !WEBHOOK_METHODS.contains(&method.to_uppercase().as_str()) {
                    return Err(CrmError::Validation(format!(
                        "Unsupported webhook method: {method}"
                    )));
                }
            }
            ActionParams::Wait { minutes } => {
                if *minutes <= 0 {
                    return invalid("wait needs a positive number of minutes");
                }
                if *minutes > MAX_WAIT_MINUTES {
                    return Err(CrmError::Validation(format!(
                        "wait must be at most {MAX_WAIT_MINUTES} minutes"
                    )));
                }
            }
            ActionParams::Log { message } => {
                if message.trim().is_empty() {
                    return invalid("log needs a message");
                }
            }
        }
        Ok(())
    }
}

/// Types of actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    UpdateField,
    SendEmail,
    SendSms,
    CreateTask,
    AssignOwner,
    AddTag,
    RemoveTag,
    CallWebhook,
    Wait,
    Log,
}

impl ActionType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateField => "update_field",
            Self::SendEmail => "send_email",
            Self::SendSms => "send_sms",
            Self::CreateTask => "create_task",
            Self::AssignOwner => "assign_owner",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::CallWebhook => "call_webhook",
            Self::Wait => "wait",
            Self::Log => "log",
        }
    }

    /// Get display name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::UpdateField => "Update Field",
            Self::SendEmail => "Send Email",
            Self::SendSms => "Send SMS",
            Self::CreateTask => "Create Task",
            Self::AssignOwner => "Assign Owner",
            Self::AddTag => "Add Tag",
            Self::RemoveTag => "Remove Tag",
            Self::CallWebhook => "Call Webhook",
            Self::Wait => "Wait",
            Self::Log => "Log Message",
        }
    }
}

/// Parameters for actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionParams {
    /// Set a column or `data.<path>`
    UpdateField { field: String, value: Value },
    /// Queue an email in the outbox
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    /// Queue an SMS in the outbox
    SendSms { to: String, body: String },
    /// Create a follow-up task
    CreateTask {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_days: Option<i64>,
    },
    /// Fixed owner, or round-robin over `pool`
    AssignOwner {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pool: Vec<String>,
    },
    AddTag { tags: Vec<String> },
    RemoveTag { tags: Vec<String> },
    /// HTTP call; the body defaults to the record
    CallWebhook {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    /// Suspend and resume the remaining actions later
    Wait { minutes: i64 },
    /// Structured log line
    Log { message: String },
}

fn default_method() -> String {
    "POST".to_string()
}

impl ActionParams {
    #[must_use]
    pub const fn action_type(&self) -> ActionType {
        match self {
            Self::UpdateField { .. } => ActionType::UpdateField,
            Self::SendEmail { .. } => ActionType::SendEmail,
            Self::SendSms { .. } => ActionType::SendSms,
            Self::CreateTask { .. } => ActionType::CreateTask,
            Self::AssignOwner { .. } => ActionType::AssignOwner,
            Self::AddTag { .. } => ActionType::AddTag,
            Self::RemoveTag { .. } => ActionType::RemoveTag,
            Self::CallWebhook { .. } => ActionType::CallWebhook,
            Self::Wait { .. } => ActionType::Wait,
            Self::Log { .. } => ActionType::Log,
        }
    }
}

/// Result of executing an action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Whether the action succeeded
    pub success: bool,
    /// Output message
    pub message: Option<String>,
    /// Error if failed
    pub error: Option<String>,
    /// ID of a created task or message
    pub created_id: Option<i64>,
}

impl ActionResult {
    /// Create a success result.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            success: true,
            message: None,
            error: None,
            created_id: None,
        }
    }

    /// Create a success result with message.
    #[must_use]
    pub fn success_with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            created_id: None,
        }
    }

    /// Create a success result with created ID.
    #[must_use]
    pub fn success_with_id(message: impl Into<String>, id: i64) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            created_id: Some(id),
        }
    }

    /// Create a failure result.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            created_id: None,
        }
    }

    /// Message or error text for the run log.
    #[must_use]
    pub fn summary(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::Record;
    use crate::features::automation::rule::RecordEvent;
    use serde_json::json;

    fn ctx() -> RuleContext {
        let mut record = Record::new("acme", "lead")
            .with_owner("agent-7")
            .with_data(json!({ "first_name": "Ann", "email": "ann@example.com" }));
        record.id = Some(9);
        RuleContext::new(record, RecordEvent::Created).with_rule_name("welcome")
    }

    #[test]
    fn test_action_result() {
        let success = ActionResult::success();
        assert!(success.success);

        let failure = ActionResult::failure("Something went wrong");
        assert!(!failure.success);
        assert_eq!(failure.error, Some("Something went wrong".to_string()));
        assert_eq!(failure.summary(), "Something went wrong");
    }

    #[test]
    fn test_deserialize_tagged_actions() {
        let actions: Vec<Action> = serde_json::from_value(json!([
            { "type": "update_field", "field": "status", "value": "contacted" },
            { "type": "send_email", "to": "{email}", "subject": "Hi", "body": "Hello {first_name}" },
            { "type": "call_webhook", "url": "https://hooks.example.com/x", "continue_on_error": true },
            { "type": "assign_owner", "pool": ["a", "b"] }
        ]))
        .unwrap();

        assert_eq!(actions[0].action_type(), ActionType::UpdateField);
        assert!(!actions[0].continue_on_error);
        assert!(actions[2].continue_on_error);
        match &actions[2].params {
            ActionParams::CallWebhook { method, body, .. } => {
                assert_eq!(method, "POST");
                assert!(body.is_none());
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn test_serialize_round_trips_flattened_type() {
        let action = Action::add_tags(vec!["warm".to_string()]).continue_on_error();
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "add_tag");
        assert_eq!(value["continue_on_error"], true);

        let plain = serde_json::to_value(Action::log("x")).unwrap();
        assert!(plain.get("continue_on_error").is_none());
    }

    #[test]
    fn test_substitution() {
        let ctx = ctx();
        let action = Action::send_email("{email}", "Welcome {first_name}", "Rule {rule_name} for #{record_id}")
            .with_substitution(&ctx);

        match action.params {
            ActionParams::SendEmail { to, subject, body } => {
                assert_eq!(to, "ann@example.com");
                assert_eq!(subject, "Welcome Ann");
                assert_eq!(body, "Rule welcome for #9");
            }
            other => panic!("unexpected params: {other:?}"),
        }

        let update = Action::update_field("data.greeting", json!({ "text": "Hi {first_name}" }))
            .with_substitution(&ctx);
        match update.params {
            ActionParams::UpdateField { value, .. } => assert_eq!(value["text"], "Hi Ann"),
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(Action::wait(30).describe(), "Wait 30 minute(s)");
        assert_eq!(
            Action::webhook("https://x.test/h").describe(),
            "POST https://x.test/h"
        );
        assert!(Action::round_robin(vec!["a".to_string(), "b".to_string()])
            .describe()
            .contains("round-robin"));
    }

    #[test]
    fn test_validate() {
        assert!(Action::update_field("status", "won").validate().is_ok());
        assert!(Action::update_field("created_at", "x").validate().is_err());
        assert!(Action::send_email("", "s", "b").validate().is_err());
        assert!(Action::create_task(" ").validate().is_err());
        assert!(Action::round_robin(Vec::new()).validate().is_err());
        assert!(Action::add_tags(Vec::new()).validate().is_err());
        assert!(Action::webhook("ftp://nope").validate().is_err());
        assert!(Action::webhook("{data.callback_url}").validate().is_ok());
        assert!(Action::wait(0).validate().is_err());
        assert!(Action::log("ok").validate().is_ok());
    }

    #[test]
    fn test_validate_upper_bounds() {
        assert!(Action::wait(MAX_WAIT_MINUTES).validate().is_ok());
        assert!(Action::wait(MAX_WAIT_MINUTES + 1).validate().is_err());
        assert!(Action::wait(i64::MAX / 2).validate().is_err());

        let task = |days| {
            Action::new(ActionParams::CreateTask {
                title: "Follow up".to_string(),
                description: None,
                assignee: None,
                due_in_days: Some(days),
            })
        };
        assert!(task(MAX_DUE_IN_DAYS).validate().is_ok());
        assert!(matches!(
            task(i64::MAX).validate(),
            Err(CrmError::Validation(_))
        ));
    }
}
