//! Run and tick command implementations.

use chrono::Utc;

use crate::cli::args::{OutputFormat, RunArgs, TickArgs};
use crate::crm::RecordStore;
use crate::error::CrmError;
use crate::features::automation::{format_run, AutomationEngine, HttpWebhookSender, RuleStorage};
use crate::features::scheduler::{format_tick_result, Job, JobQueue, SchedulerTick, TickConfig};
use crate::output::{render, to_json};

use super::CommandContext;

/// Run one rule against one record, or queue it.
///
/// # Errors
///
/// Returns `NotFound` for an unknown rule or record and `Unprocessable`
/// when the rule cannot run against the record.
pub fn run(ctx: &CommandContext<'_>, args: RunArgs) -> Result<String, CrmError> {
    let rule = RuleStorage::new(ctx.db).find(&ctx.organization, &args.rule)?;
    let rule_id = rule.id.unwrap_or_default();

    if args.queue {
        RecordStore::new(ctx.db).require(&ctx.organization, args.record)?;
        let mut job = Job::run_rule(
            ctx.organization.clone(),
            rule_id,
            args.record,
            ctx.config.scheduler.max_retries,
        );
        let job_id = JobQueue::new(ctx.db).enqueue(&mut job)?;

        return match ctx.format {
            OutputFormat::Json => to_json(&job),
            OutputFormat::Pretty => Ok(format!(
                "Queued job #{job_id}: run {} on record #{}",
                rule.name, args.record
            )),
        };
    }

    let webhook = HttpWebhookSender::new(&ctx.config.webhook)?;
    let engine = AutomationEngine::with_config(ctx.db, &webhook, ctx.engine_config(args.dry_run));
    let run = engine.run_rule(&ctx.organization, rule_id, args.record)?;

    render(&run, ctx.format, format_run)
}

/// Run one scheduler tick across every organization.
///
/// # Errors
///
/// Returns an error if the queue or storage fails.
pub fn tick(ctx: &CommandContext<'_>, args: &TickArgs) -> Result<String, CrmError> {
    let mut config = TickConfig::from_settings(&ctx.config.scheduler).with_dry_run(args.dry_run);
    if let Some(batch) = args.batch {
        config = config.with_batch_size(batch);
    }

    let webhook = HttpWebhookSender::new(&ctx.config.webhook)?;
    let engine = AutomationEngine::with_config(ctx.db, &webhook, ctx.engine_config(false));
    let result = SchedulerTick::new(ctx.db, &engine, config).run(Utc::now())?;

    tracing::info!(
        due = result.due,
        completed = result.completed,
        failed = result.failed,
        "tick finished"
    );

    render(&result, ctx.format, format_tick_result)
}
