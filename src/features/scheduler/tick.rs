//! The scheduler tick.
//!
//! An external cron invokes one tick at a time. A tick queues due
//! scheduled rules, recovers stale claims, then drains a bounded batch of
//! pending jobs through the automation engine.

use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use serde::Serialize;

use super::job::{Job, JobKind, JobStatus};
use super::queue::JobQueue;
use crate::config::SchedulerSettings;
use crate::error::CrmError;
use crate::features::automation::{AutomationEngine, RuleStorage, RunStatus};
use crate::storage::Database;

/// Tick settings.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Jobs drained per tick
    pub batch_size: usize,
    /// Processing jobs untouched for this long return to pending
    pub stale_after_minutes: i64,
    /// List due work without claiming or executing it
    pub dry_run: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl TickConfig {
    #[must_use]
    pub const fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            stale_after_minutes: settings.stale_after_minutes,
            dry_run: false,
        }
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// What happened to one job during a tick.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: i64,
    pub organization_id: String,
    pub kind: JobKind,
    /// Status after the tick
    pub status: JobStatus,
    pub message: String,
}

/// Result of a tick.
#[derive(Debug, Default, Serialize)]
pub struct TickResult {
    pub dry_run: bool,
    /// Scheduled rules queued (or due, in a dry run)
    pub scheduled_enqueued: usize,
    pub stale_requeued: usize,
    /// Jobs pulled from the queue
    pub due: usize,
    pub claimed: usize,
    pub completed: usize,
    /// Failed but returned to pending
    pub retried: usize,
    /// Out of retries
    pub failed: usize,
    pub outcomes: Vec<JobOutcome>,
}

/// One scheduler tick over the whole database.
pub struct SchedulerTick<'a> {
    db: &'a Database,
    engine: &'a AutomationEngine<'a>,
    config: TickConfig,
}

impl<'a> SchedulerTick<'a> {
    #[must_use]
    pub const fn new(db: &'a Database, engine: &'a AutomationEngine<'a>, config: TickConfig) -> Self {
        Self { db, engine, config }
    }

    /// Run the tick at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue or rule storage fails. Job execution
    /// errors are recorded on the job, not returned.
    pub fn run(&self, now: DateTime<Utc>) -> Result<TickResult, CrmError> {
        let stale_cutoff = Duration::try_minutes(self.config.stale_after_minutes)
            .filter(|_| self.config.stale_after_minutes > 0)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                CrmError::Config(format!(
                    "stale_after_minutes must be a positive number of minutes, got {}",
                    self.config.stale_after_minutes
                ))
            })?;
        let queue = JobQueue::new(self.db);
        let mut result = TickResult {
            dry_run: self.config.dry_run,
            ..TickResult::default()
        };

        result.scheduled_enqueued = self.enqueue_scheduled(&queue, now)?;

        if !self.config.dry_run {
            result.stale_requeued = queue.requeue_stale(stale_cutoff, now)?;
            if result.stale_requeued > 0 {
                tracing::warn!(count = result.stale_requeued, "requeued stale jobs");
            }
        }

        let jobs = queue.due(now, self.config.batch_size)?;
        result.due = jobs.len();

        for job in jobs {
            let Some(job_id) = job.id else { continue };

            if self.config.dry_run {
                result.outcomes.push(outcome(&job, job_id, JobStatus::Pending, "Would run"));
                continue;
            }

            if !queue.claim(job_id, now)? {
                tracing::debug!(job_id, "job already claimed");
                continue;
            }
            result.claimed += 1;

            if job.retries_exhausted() {
                let message = format!("Retry budget exhausted after {} attempt(s)", job.attempts);
                queue.mark_failed(job_id, &message, now)?;
                result.failed += 1;
                result.outcomes.push(outcome(&job, job_id, JobStatus::Failed, &message));
                continue;
            }

            match self.execute(&job) {
                Ok(message) => {
                    queue.mark_completed(job_id, now)?;
                    result.completed += 1;
                    tracing::info!(job_id, kind = job.kind.as_str(), "job completed");
                    result.outcomes.push(outcome(&job, job_id, JobStatus::Completed, &message));
                }
                Err(e) => {
                    let message = e.to_string();
                    let status = queue.record_failure(job_id, &message, now)?;
                    if status == JobStatus::Failed {
                        result.failed += 1;
                    } else {
                        result.retried += 1;
                    }
                    tracing::warn!(job_id, kind = job.kind.as_str(), status = status.as_str(), error = %message, "job failed");
                    result.outcomes.push(outcome(&job, job_id, status, &message));
                }
            }
        }

        Ok(result)
    }

    /// Queue one job per due scheduled rule and mark the rule so the next
    /// tick does not queue it again.
    fn enqueue_scheduled(&self, queue: &JobQueue<'_>, now: DateTime<Utc>) -> Result<usize, CrmError> {
        let storage = RuleStorage::new(self.db);
        let mut count = 0;

        for rule in storage.list_scheduled()? {
            if !rule.is_due(now) {
                continue;
            }
            let Some(rule_id) = rule.id else { continue };
            count += 1;

            if self.config.dry_run {
                continue;
            }

            let mut job = Job::scheduled_rule(
                rule.organization_id.clone(),
                rule_id,
                self.engine.config().job_max_retries,
            );
            job.run_at = now;
            let job_id = queue.enqueue(&mut job)?;
            storage.mark_last_run(&rule.organization_id, rule_id, now)?;
            tracing::info!(rule = %rule.name, job_id, "scheduled rule queued");
        }

        Ok(count)
    }

    /// Execute a claimed job. A job fails when the engine errors or any
    /// run it produces ends `failed`.
    fn execute(&self, job: &Job) -> Result<String, CrmError> {
        let payload = job.payload()?;
        let organization_id = job.organization_id.as_str();

        match job.kind {
            JobKind::RunRule | JobKind::ResumeRule => {
                let record_id = payload.record_id.ok_or_else(|| {
                    CrmError::Validation(format!("Job {} has no record", job.kind))
                })?;

                let run = if job.kind == JobKind::RunRule {
                    self.engine.run_rule(organization_id, payload.rule_id, record_id)?
                } else {
                    self.engine.resume_rule(
                        organization_id,
                        payload.rule_id,
                        record_id,
                        payload.from_action,
                    )?
                };

                if run.status == RunStatus::Failed {
                    return Err(CrmError::Unprocessable(format!(
                        "Run #{} of rule '{}' failed",
                        run.id.unwrap_or_default(),
                        run.rule_name
                    )));
                }
                Ok(format!("Run #{} {}", run.id.unwrap_or_default(), run.status.as_str()))
            }
            JobKind::ScheduledRule => {
                let result = self.engine.run_scheduled_rule(organization_id, payload.rule_id)?;
                if result.has_failures() {
                    let failed = result
                        .runs
                        .iter()
                        .filter(|r| r.status == RunStatus::Failed)
                        .count();
                    return Err(CrmError::Unprocessable(format!(
                        "{failed} of {} run(s) failed",
                        result.runs.len()
                    )));
                }
                Ok(format!(
                    "{}/{} record(s) matched",
                    result.rules_triggered, result.rules_evaluated
                ))
            }
        }
    }
}

fn outcome(job: &Job, job_id: i64, status: JobStatus, message: &str) -> JobOutcome {
    JobOutcome {
        job_id,
        organization_id: job.organization_id.clone(),
        kind: job.kind,
        status,
        message: message.to_string(),
    }
}

/// Format a tick result for display.
#[must_use]
pub fn format_tick_result(result: &TickResult) -> String {
    let mut lines = Vec::new();

    let title = if result.dry_run {
        "Scheduler tick (dry run)"
    } else {
        "Scheduler tick"
    };
    lines.push(title.bold().to_string());
    lines.push("─".repeat(50));
    lines.push(format!("  Scheduled rules queued: {}", result.scheduled_enqueued));
    if result.stale_requeued > 0 {
        lines.push(format!("  Stale jobs requeued:    {}", result.stale_requeued).yellow().to_string());
    }
    lines.push(format!("  Due jobs:               {}", result.due));

    if !result.dry_run {
        lines.push(format!(
            "  {} completed, {} retrying, {} failed",
            result.completed.to_string().green(),
            result.retried.to_string().yellow(),
            result.failed.to_string().red()
        ));
    }

    if !result.outcomes.is_empty() {
        lines.push(String::new());
        for job in &result.outcomes {
            let marker = match job.status {
                JobStatus::Completed => "✓".green(),
                JobStatus::Failed => "✗".red(),
                JobStatus::Pending | JobStatus::Processing => "○".yellow(),
            };
            lines.push(format!(
                "  {marker} #{} {} [{}] {}",
                job.job_id, job.kind, job.organization_id, job.message
            ));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::{Record, RecordStore};
    use crate::features::automation::webhook::{MockWebhookSender, WebhookResponse};
    use crate::features::automation::{Action, EngineConfig, Rule, Schedule, Trigger};

    fn save_rule(db: &Database, rule: Rule) -> i64 {
        let mut rule = rule.for_organization("acme");
        RuleStorage::new(db).create(&mut rule).unwrap()
    }

    fn save_record(db: &Database) -> i64 {
        let mut record = Record::new("acme", "lead").with_status("new");
        RecordStore::new(db).create(&mut record).unwrap();
        record.id.unwrap()
    }

    #[test]
    fn test_scheduled_rule_queued_once_and_run() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::new(&db, &webhook);
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

        save_rule(
            &db,
            Rule::new("hourly", Trigger::scheduled(Schedule::every_minutes(60)))
                .with_action(Action::add_tags(vec!["seen".to_string()])),
        );
        let record_id = save_record(&db);
        let now = Utc::now();

        let first = tick.run(now).unwrap();
        assert_eq!(first.scheduled_enqueued, 1);
        assert_eq!(first.completed, 1);

        let record = RecordStore::new(&db).require("acme", record_id).unwrap();
        assert_eq!(record.tags, vec!["seen"]);

        let second = tick.run(now + Duration::minutes(1)).unwrap();
        assert_eq!(second.scheduled_enqueued, 0);
        assert_eq!(second.due, 0);
    }

    #[test]
    fn test_failing_job_retries_then_fails() {
        let db = Database::open_in_memory().unwrap();
        let mut webhook = MockWebhookSender::new();
        webhook.expect_send().returning(|_| {
            Ok(WebhookResponse {
                status: 503,
                body: String::new(),
            })
        });
        let engine = AutomationEngine::new(&db, &webhook);
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

        let rule_id = save_rule(
            &db,
            Rule::new("notify", Trigger::manual())
                .with_action(Action::webhook("https://hooks.example.com/x")),
        );
        let record_id = save_record(&db);
        let queue = JobQueue::new(&db);
        let job_id = queue
            .enqueue(&mut Job::run_rule("acme", rule_id, record_id, 2))
            .unwrap();

        let now = Utc::now() + Duration::seconds(1);
        let first = tick.run(now).unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(queue.get(job_id).unwrap().unwrap().status, JobStatus::Pending);

        let second = tick.run(now).unwrap();
        assert_eq!(second.failed, 1);

        let job = queue.get(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.last_error.unwrap().contains("failed"));

        assert_eq!(tick.run(now).unwrap().due, 0);
    }

    #[test]
    fn test_resume_job_waits_until_due() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::new(&db, &webhook);
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

        let rule_id = save_rule(
            &db,
            Rule::new("nurture", Trigger::manual())
                .with_action(Action::wait(30))
                .with_action(Action::update_field("stage", "nurtured")),
        );
        let record_id = save_record(&db);

        let run = engine.run_rule("acme", rule_id, record_id).unwrap();
        assert_eq!(run.status, RunStatus::Waiting);

        let now = Utc::now();
        assert_eq!(tick.run(now).unwrap().due, 0);

        let later = tick.run(now + Duration::minutes(31)).unwrap();
        assert_eq!(later.completed, 1);
        let record = RecordStore::new(&db).require("acme", record_id).unwrap();
        assert_eq!(record.stage.as_deref(), Some("nurtured"));
    }

    #[test]
    fn test_stale_jobs_requeued_and_run() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::new(&db, &webhook);
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

        let rule_id = save_rule(
            &db,
            Rule::new("log it", Trigger::manual()).with_action(Action::log("hello")),
        );
        let record_id = save_record(&db);
        let queue = JobQueue::new(&db);
        let job_id = queue
            .enqueue(&mut Job::run_rule("acme", rule_id, record_id, 3))
            .unwrap();

        let now = Utc::now() + Duration::seconds(1);
        queue.claim(job_id, now - Duration::hours(1)).unwrap();

        let result = tick.run(now).unwrap();
        assert_eq!(result.stale_requeued, 1);
        assert_eq!(result.completed, 1);
    }

    #[test]
    fn test_batch_size_bounds_work() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::new(&db, &webhook);
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default().with_batch_size(1));

        let rule_id = save_rule(
            &db,
            Rule::new("log it", Trigger::manual()).with_action(Action::log("hello")),
        );
        let record_id = save_record(&db);
        let queue = JobQueue::new(&db);
        queue.enqueue(&mut Job::run_rule("acme", rule_id, record_id, 3)).unwrap();
        queue.enqueue(&mut Job::run_rule("acme", rule_id, record_id, 3)).unwrap();

        let now = Utc::now() + Duration::seconds(1);
        assert_eq!(tick.run(now).unwrap().completed, 1);
        assert_eq!(tick.run(now).unwrap().completed, 1);
        assert_eq!(tick.run(now).unwrap().due, 0);
    }

    #[test]
    fn test_bad_stale_window_is_config_error() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::new(&db, &webhook);
        let rule_id = save_rule(
            &db,
            Rule::new("log it", Trigger::manual()).with_action(Action::log("hello")),
        );
        let record_id = save_record(&db);
        let queue = JobQueue::new(&db);
        let job_id = queue
            .enqueue(&mut Job::run_rule("acme", rule_id, record_id, 3))
            .unwrap();

        for minutes in [0, i64::MAX] {
            let config = TickConfig {
                stale_after_minutes: minutes,
                ..TickConfig::default()
            };
            let tick = SchedulerTick::new(&db, &engine, config);
            let result = tick.run(Utc::now() + Duration::seconds(1));
            assert!(matches!(result, Err(CrmError::Config(_))));
        }
        assert_eq!(queue.get(job_id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_dry_run_claims_nothing() {
        let db = Database::open_in_memory().unwrap();
        let webhook = MockWebhookSender::new();
        let engine = AutomationEngine::with_config(
            &db,
            &webhook,
            EngineConfig::default().with_dry_run(true),
        );
        let tick = SchedulerTick::new(&db, &engine, TickConfig::default().with_dry_run(true));

        save_rule(
            &db,
            Rule::new("hourly", Trigger::scheduled(Schedule::every_minutes(60)))
                .with_action(Action::log("tick")),
        );
        let rule_id = save_rule(
            &db,
            Rule::new("log it", Trigger::manual()).with_action(Action::log("hello")),
        );
        let record_id = save_record(&db);
        let queue = JobQueue::new(&db);
        let job_id = queue
            .enqueue(&mut Job::run_rule("acme", rule_id, record_id, 3))
            .unwrap();

        let result = tick.run(Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(result.scheduled_enqueued, 1);
        assert_eq!(result.due, 1);
        assert_eq!(result.claimed, 0);
        assert_eq!(queue.get(job_id).unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(queue.list(None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_format_tick_result() {
        colored::control::set_override(false);
        let result = TickResult {
            completed: 2,
            outcomes: vec![JobOutcome {
                job_id: 4,
                organization_id: "acme".to_string(),
                kind: JobKind::RunRule,
                status: JobStatus::Completed,
                message: "Run #1 completed".to_string(),
            }],
            ..TickResult::default()
        };
        let text = format_tick_result(&result);
        assert!(text.contains("2 completed, 0 retrying, 0 failed"));
        assert!(text.contains("#4 run_rule [acme] Run #1 completed"));
    }
}
