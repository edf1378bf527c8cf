//! Automation engine for executing rules.
//!
//! The engine matches records against rules and executes their actions in
//! order. Every action's side effect is persisted as soon as it succeeds;
//! a later failure never rolls back earlier actions.

use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use super::action::{ActionParams, ActionResult, ActionType};
use super::rule::{RecordEvent, Rule, RuleContext};
use super::run_log::{ActionLogEntry, ActionStatus, RuleRun, RunLog, RunStatus};
use super::storage::RuleStorage;
use super::webhook::{WebhookRequest, WebhookSender};
use crate::config::Config;
use crate::crm::{normalize_field, Channel, Outbox, Record, RecordStore, TaskStore};
use crate::error::CrmError;
use crate::features::scheduler::{Job, JobQueue};
use crate::storage::{sql_time, Database};

/// Configuration for the automation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dry run mode (log what would happen, change nothing)
    pub dry_run: bool,
    /// Maximum actions per rule
    pub max_actions: usize,
    /// Retry budget for jobs created by `wait` actions
    pub job_max_retries: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_actions: 25,
            job_max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Build from the loaded configuration file.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.engine.dry_run,
            max_actions: config.engine.max_actions,
            job_max_retries: config.scheduler.max_retries,
        }
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Result of running the engine over an event or a scheduled rule.
#[derive(Debug, Default, Serialize)]
pub struct EngineResult {
    /// Rules (or rule/record pairs) evaluated
    pub rules_evaluated: usize,
    /// Rules whose trigger and conditions matched
    pub rules_triggered: usize,
    /// Actions executed or simulated
    pub actions_executed: usize,
    /// Actions failed
    pub actions_failed: usize,
    /// Runs written to the run log
    pub runs: Vec<RuleRun>,
}

impl EngineResult {
    /// Create an empty result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether any run ended failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.runs.iter().any(|r| r.status == RunStatus::Failed)
    }

    fn absorb(&mut self, run: RuleRun) {
        self.actions_executed += run.count(ActionStatus::Success) + run.count(ActionStatus::DryRun);
        self.actions_failed += run.count(ActionStatus::Failed);
        self.runs.push(run);
    }
}

/// The automation engine.
pub struct AutomationEngine<'a> {
    db: &'a Database,
    webhook: &'a dyn WebhookSender,
    config: EngineConfig,
}

impl<'a> AutomationEngine<'a> {
    /// Create a new automation engine with default settings.
    #[must_use]
    pub fn new(db: &'a Database, webhook: &'a dyn WebhookSender) -> Self {
        Self::with_config(db, webhook, EngineConfig::default())
    }

    /// Create engine with custom config.
    #[must_use]
    pub const fn with_config(
        db: &'a Database,
        webhook: &'a dyn WebhookSender,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            webhook,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every enabled rule of the record's organization that fires for
    /// this event.
    ///
    /// Rules run in priority order. The record is reloaded before each rule
    /// so later rules see the changes made by earlier ones. Rules whose
    /// trigger or conditions do not match leave no trace in the run log.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is unsaved or storage fails.
    pub fn handle_event(
        &self,
        event: &RecordEvent,
        record: &Record,
        changed_fields: &[String],
    ) -> Result<EngineResult, CrmError> {
        let record_id = record.id.ok_or_else(|| {
            CrmError::Validation("Cannot run rules for an unsaved record".to_string())
        })?;
        let organization_id = record.organization_id.as_str();

        let rules = RuleStorage::new(self.db).list_enabled(organization_id)?;
        let records = RecordStore::new(self.db);
        let mut result = EngineResult::empty();

        for rule in rules {
            result.rules_evaluated += 1;

            let current = records.require(organization_id, record_id)?;
            let context = RuleContext::new(current, event.clone())
                .with_changed_fields(changed_fields.to_vec())
                .with_rule_name(rule.name.clone());

            if !rule.should_trigger(&context) {
                continue;
            }

            if !rule.conditions_met(&context) {
                tracing::debug!(rule = %rule.name, record_id, "conditions not met");
                continue;
            }

            result.rules_triggered += 1;
            let run = self.execute_rule(&rule, context, 0)?;
            result.absorb(run);
        }

        Ok(result)
    }

    /// Run one rule against one record, whatever its trigger type.
    ///
    /// A condition miss is logged as a `skipped` run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rule or record, and
    /// `Unprocessable` when the rule is disabled (outside dry-run) or
    /// cannot apply to the record.
    pub fn run_rule(
        &self,
        organization_id: &str,
        rule_id: i64,
        record_id: i64,
    ) -> Result<RuleRun, CrmError> {
        let rule = self.require_rule(organization_id, rule_id)?;
        let record = RecordStore::new(self.db).require(organization_id, record_id)?;

        if !rule.enabled && !self.config.dry_run {
            return Err(CrmError::Unprocessable(format!(
                "Rule '{}' is disabled",
                rule.name
            )));
        }
        if !rule.applies_to(&record) {
            return Err(CrmError::Unprocessable(format!(
                "Rule '{}' does not apply to {}",
                rule.name,
                record.label()
            )));
        }

        let context = RuleContext::new(record, RecordEvent::Manual).with_rule_name(rule.name.clone());
        if !rule.conditions_met(&context) {
            return self.skipped_run(&rule, &context, "Conditions not met");
        }

        self.execute_rule(&rule, context, 0)
    }

    /// Continue a rule after a `wait` action, starting at `from_action`.
    ///
    /// Conditions are not re-evaluated. A rule disabled in the meantime
    /// produces a `skipped` run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rule or record, or a storage error.
    pub fn resume_rule(
        &self,
        organization_id: &str,
        rule_id: i64,
        record_id: i64,
        from_action: usize,
    ) -> Result<RuleRun, CrmError> {
        let rule = self.require_rule(organization_id, rule_id)?;
        let record = RecordStore::new(self.db).require(organization_id, record_id)?;
        let context = RuleContext::new(record, RecordEvent::Resumed).with_rule_name(rule.name.clone());

        if !rule.enabled {
            return self.skipped_run(&rule, &context, "Rule disabled while waiting");
        }

        self.execute_rule(&rule, context, from_action)
    }

    /// Evaluate a scheduled rule against every record of its organization
    /// (filtered by the rule's entity type).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rule, or a storage error.
    pub fn run_scheduled_rule(
        &self,
        organization_id: &str,
        rule_id: i64,
    ) -> Result<EngineResult, CrmError> {
        let rule = self.require_rule(organization_id, rule_id)?;
        let mut result = EngineResult::empty();

        if !rule.enabled {
            return Ok(result);
        }

        let records = RecordStore::new(self.db).list(
            organization_id,
            rule.entity_type.as_deref(),
            usize::MAX,
        )?;

        for record in records {
            result.rules_evaluated += 1;

            let context =
                RuleContext::new(record, RecordEvent::Scheduled).with_rule_name(rule.name.clone());
            if !rule.applies_to(&context.record) || !rule.conditions_met(&context) {
                continue;
            }

            result.rules_triggered += 1;
            let run = self.execute_rule(&rule, context, 0)?;
            result.absorb(run);
        }

        Ok(result)
    }

    fn require_rule(&self, organization_id: &str, rule_id: i64) -> Result<Rule, CrmError> {
        RuleStorage::new(self.db)
            .get(organization_id, rule_id)?
            .ok_or_else(|| CrmError::NotFound(format!("Rule: {rule_id}")))
    }

    fn skipped_run(
        &self,
        rule: &Rule,
        context: &RuleContext,
        reason: &str,
    ) -> Result<RuleRun, CrmError> {
        let now = Utc::now();
        let mut run = RuleRun {
            id: None,
            organization_id: rule.organization_id.clone(),
            rule_id: rule.id.unwrap_or_default(),
            rule_name: rule.name.clone(),
            record_id: context.record.id,
            trigger: context.event.as_str().to_string(),
            status: RunStatus::Skipped,
            dry_run: self.config.dry_run,
            started_at: now,
            finished_at: now,
            actions: Vec::new(),
        };
        RunLog::new(self.db).append(&mut run)?;

        tracing::info!(rule = %rule.name, record_id = ?context.record.id, reason, "rule skipped");
        Ok(run)
    }

    /// Execute a rule's actions from `start` and append the run to the log.
    fn execute_rule(
        &self,
        rule: &Rule,
        mut context: RuleContext,
        start: usize,
    ) -> Result<RuleRun, CrmError> {
        let rule_id = rule
            .id
            .ok_or_else(|| CrmError::Validation(format!("Rule '{}' is not saved", rule.name)))?;
        let started_at = Utc::now();

        let mut entries = Vec::new();
        let mut halted_at: Option<usize> = None;
        let mut any_failed = false;
        let mut waiting = false;

        for (index, action) in rule.actions.iter().enumerate().skip(start) {
            let action_type = action.action_type();

            if let Some(failed) = halted_at {
                entries.push(log_entry(
                    index,
                    action_type,
                    ActionStatus::Skipped,
                    format!("Skipped after action {} failed", failed + 1),
                ));
                continue;
            }

            if index >= self.config.max_actions {
                entries.push(log_entry(
                    index,
                    action_type,
                    ActionStatus::Skipped,
                    format!("Action limit reached ({})", self.config.max_actions),
                ));
                continue;
            }

            let substituted = action.with_substitution(&context);

            if self.config.dry_run {
                entries.push(log_entry(
                    index,
                    action_type,
                    ActionStatus::DryRun,
                    substituted.describe(),
                ));
                continue;
            }

            let result = self.execute_action(
                rule,
                rule_id,
                index,
                &mut context.record,
                &substituted.params,
            )?;

            if result.success {
                entries.push(log_entry(
                    index,
                    action_type,
                    ActionStatus::Success,
                    result.summary(),
                ));
                if action_type == ActionType::Wait && result.created_id.is_some() {
                    waiting = true;
                    break;
                }
            } else {
                any_failed = true;
                tracing::warn!(
                    rule = %rule.name,
                    record_id = ?context.record.id,
                    action = index + 1,
                    error = %result.summary(),
                    "action failed"
                );
                entries.push(log_entry(
                    index,
                    action_type,
                    ActionStatus::Failed,
                    result.summary(),
                ));
                if !action.continue_on_error {
                    halted_at = Some(index);
                }
            }
        }

        let status = if any_failed {
            RunStatus::Failed
        } else if waiting {
            RunStatus::Waiting
        } else {
            RunStatus::Completed
        };

        let finished_at = Utc::now();
        let mut run = RuleRun {
            id: None,
            organization_id: rule.organization_id.clone(),
            rule_id,
            rule_name: rule.name.clone(),
            record_id: context.record.id,
            trigger: context.event.as_str().to_string(),
            status,
            dry_run: self.config.dry_run,
            started_at,
            finished_at,
            actions: entries,
        };
        RunLog::new(self.db).append(&mut run)?;

        // Continuations belong to the run that started them.
        if !self.config.dry_run && start == 0 {
            RuleStorage::new(self.db).record_run(&rule.organization_id, rule_id, finished_at)?;
        }

        tracing::info!(
            rule = %rule.name,
            record_id = ?run.record_id,
            status = run.status.as_str(),
            dry_run = run.dry_run,
            "rule executed"
        );
        Ok(run)
    }

    /// Execute a single action against the record.
    ///
    /// Bad parameters and remote failures come back as failed
    /// [`ActionResult`]s; storage failures are errors.
    fn execute_action(
        &self,
        rule: &Rule,
        rule_id: i64,
        index: usize,
        record: &mut Record,
        params: &ActionParams,
    ) -> Result<ActionResult, CrmError> {
        let organization_id = record.organization_id.clone();

        match params {
            ActionParams::UpdateField { field, value } => {
                if let Err(e) = record.set_field(field, value.clone()) {
                    return Ok(ActionResult::failure(e.to_string()));
                }
                RecordStore::new(self.db).update(record)?;
                Ok(ActionResult::success_with_message(format!(
                    "Set {} = {value}",
                    normalize_field(field)
                )))
            }
            ActionParams::SendEmail { to, subject, body } => outcome(
                Outbox::new(self.db).enqueue(
                    &organization_id,
                    record.id,
                    Channel::Email,
                    to,
                    Some(subject),
                    body,
                ),
                |message| {
                    ActionResult::success_with_id(
                        format!("Queued email to {to}"),
                        message.id.unwrap_or_default(),
                    )
                },
            ),
            ActionParams::SendSms { to, body } => outcome(
                Outbox::new(self.db).enqueue(
                    &organization_id,
                    record.id,
                    Channel::Sms,
                    to,
                    None,
                    body,
                ),
                |message| {
                    ActionResult::success_with_id(
                        format!("Queued SMS to {to}"),
                        message.id.unwrap_or_default(),
                    )
                },
            ),
            ActionParams::CreateTask {
                title,
                description,
                assignee,
                due_in_days,
            } => {
                let assignee = assignee
                    .as_deref()
                    .filter(|a| !a.trim().is_empty())
                    .or(record.owner_id.as_deref());
                let due_at = match due_in_days {
                    Some(days) => match later(Duration::try_days(*days)) {
                        Some(at) => Some(at),
                        None => {
                            return Ok(ActionResult::failure(format!(
                                "Task due in {days} days is out of range"
                            )))
                        }
                    },
                    None => None,
                };

                outcome(
                    TaskStore::new(self.db).create(
                        &organization_id,
                        record.id,
                        title,
                        description.as_deref(),
                        assignee,
                        due_at,
                    ),
                    |task| {
                        ActionResult::success_with_id(
                            format!("Created task \"{title}\""),
                            task.id.unwrap_or_default(),
                        )
                    },
                )
            }
            ActionParams::AssignOwner { owner_id, pool } => {
                let owner = match owner_id.as_deref().filter(|o| !o.trim().is_empty()) {
                    Some(owner) => owner.to_string(),
                    None if pool.is_empty() => {
                        return Ok(ActionResult::failure("No owner or pool to assign from"));
                    }
                    None => {
                        // Fresh count: earlier runs in this invocation have
                        // already advanced it.
                        let run_count = RuleStorage::new(self.db)
                            .get(&organization_id, rule_id)?
                            .map_or(rule.run_count, |r| r.run_count);
                        let slot = usize::try_from(run_count).unwrap_or(0) % pool.len();
                        pool[slot].clone()
                    }
                };

                record.owner_id = Some(owner.clone());
                RecordStore::new(self.db).update(record)?;
                Ok(ActionResult::success_with_message(format!(
                    "Assigned owner {owner}"
                )))
            }
            ActionParams::AddTag { tags } => {
                let added = record.add_tags(&clean_tags(tags));
                if added > 0 {
                    RecordStore::new(self.db).update(record)?;
                }
                Ok(ActionResult::success_with_message(format!(
                    "Added {added} tag(s)"
                )))
            }
            ActionParams::RemoveTag { tags } => {
                let removed = record.remove_tags(&clean_tags(tags));
                if removed > 0 {
                    RecordStore::new(self.db).update(record)?;
                }
                Ok(ActionResult::success_with_message(format!(
                    "Removed {removed} tag(s)"
                )))
            }
            ActionParams::CallWebhook {
                url,
                method,
                headers,
                body,
            } => {
                let body = body
                    .clone()
                    .unwrap_or_else(|| serde_json::to_value(&*record).unwrap_or(Value::Null));
                let request = WebhookRequest {
                    method: method.to_uppercase(),
                    url: url.clone(),
                    headers: headers.clone(),
                    body,
                };

                Ok(match self.webhook.send(&request) {
                    Ok(response) if response.is_success() => ActionResult::success_with_message(
                        format!("{} {url} returned {}", request.method, response.status),
                    ),
                    Ok(response) => ActionResult::failure(format!(
                        "{} {url} returned HTTP {}: {}",
                        request.method, response.status, response.body
                    )),
                    Err(e) => ActionResult::failure(e.to_string()),
                })
            }
            ActionParams::Wait { minutes } => {
                if index + 1 >= rule.actions.len() {
                    return Ok(ActionResult::success_with_message(
                        "Nothing left to wait for",
                    ));
                }
                let Some(record_id) = record.id else {
                    return Ok(ActionResult::failure("Cannot wait on an unsaved record"));
                };

                let Some(run_at) = later(Duration::try_minutes(*minutes)) else {
                    return Ok(ActionResult::failure(format!(
                        "Wait of {minutes} minutes is out of range"
                    )));
                };
                let mut job = Job::resume_rule(
                    organization_id,
                    rule_id,
                    record_id,
                    index + 1,
                    run_at,
                    self.config.job_max_retries,
                );
                let job_id = JobQueue::new(self.db).enqueue(&mut job)?;
                Ok(ActionResult::success_with_id(
                    format!("Resuming at {}", sql_time(&run_at)),
                    job_id,
                ))
            }
            ActionParams::Log { message } => {
                tracing::info!(rule = %rule.name, record_id = ?record.id, "{message}");
                Ok(ActionResult::success_with_message(message.clone()))
            }
        }
    }
}

/// `now + offset`, or `None` if either step overflows.
fn later(offset: Option<Duration>) -> Option<DateTime<Utc>> {
    offset.and_then(|d| Utc::now().checked_add_signed(d))
}

/// Turn an outbox or task store result into an action result. Validation
/// problems are action failures; anything else is a storage error.
fn outcome<T>(
    result: Result<T, CrmError>,
    on_success: impl FnOnce(T) -> ActionResult,
) -> Result<ActionResult, CrmError> {
    match result {
        Ok(value) => Ok(on_success(value)),
        Err(CrmError::Validation(msg)) => Ok(ActionResult::failure(msg)),
        Err(e) => Err(e),
    }
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

const fn log_entry(
    index: usize,
    action_type: ActionType,
    status: ActionStatus,
    message: String,
) -> ActionLogEntry {
    ActionLogEntry {
        index,
        action_type,
        status,
        message,
    }
}

/// Format engine result for display.
#[must_use]
pub fn format_engine_result(result: &EngineResult) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "Automation run complete: {}/{} rules triggered",
        result.rules_triggered, result.rules_evaluated
    ));
    lines.push("─".repeat(50));

    if result.runs.is_empty() {
        lines.push("  No rules triggered".dimmed().to_string());
        return lines.join("\n");
    }

    for run in &result.runs {
        let status = match run.status {
            RunStatus::Completed => "✓".green(),
            RunStatus::Waiting => "…".yellow(),
            RunStatus::Skipped => "-".dimmed(),
            RunStatus::Failed => "✗".red(),
        };

        let dry_run = if run.dry_run { " [dry run]" } else { "" };
        lines.push(format!(
            "{} {} ({}){dry_run}",
            status,
            run.rule_name,
            run.status.as_str()
        ));

        for entry in &run.actions {
            let action_status = match entry.status {
                ActionStatus::Success => "✓",
                ActionStatus::Failed => "✗",
                ActionStatus::Skipped => "-",
                ActionStatus::DryRun => "~",
            };
            lines.push(format!(
                "    {} Action {}: {}",
                action_status,
                entry.index + 1,
                entry.message
            ));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Summary: {} actions executed, {} failed",
        result.actions_executed, result.actions_failed
    ));

    lines.join("\n")
}
