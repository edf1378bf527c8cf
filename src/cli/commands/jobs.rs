//! Jobs command implementation.

use crate::cli::args::{JobStatusFilter, JobsCommands, OutputFormat};
use crate::error::CrmError;
use crate::features::scheduler::{JobQueue, JobStatus};
use crate::output::{format_jobs_pretty, format_queue_stats_pretty, render, render_list, to_json};

use super::CommandContext;

impl From<JobStatusFilter> for JobStatus {
    fn from(filter: JobStatusFilter) -> Self {
        match filter {
            JobStatusFilter::Pending => Self::Pending,
            JobStatusFilter::Processing => Self::Processing,
            JobStatusFilter::Completed => Self::Completed,
            JobStatusFilter::Failed => Self::Failed,
        }
    }
}

/// Execute jobs subcommands.
///
/// # Errors
///
/// Returns `NotFound` or `Conflict` when retrying a job that is unknown or
/// not failed, `Validation` for a cleanup age that is not positive, or a
/// storage error.
pub fn jobs(ctx: &CommandContext<'_>, cmd: JobsCommands) -> Result<String, CrmError> {
    let queue = JobQueue::new(ctx.db);
    let scope = |all: bool| (!all).then_some(ctx.organization.as_str());

    match cmd {
        JobsCommands::List { status, all, limit } => {
            let jobs = queue.list(scope(all), status.map(JobStatus::from), limit)?;
            render_list(&jobs, ctx.format, format_jobs_pretty)
        }
        JobsCommands::Stats { all } => {
            let stats = queue.stats(scope(all))?;
            render(&stats, ctx.format, format_queue_stats_pretty)
        }
        JobsCommands::Retry { id } => {
            queue.retry(&ctx.organization, id)?;
            match ctx.format {
                OutputFormat::Json => to_json(&serde_json::json!({ "retried": id })),
                OutputFormat::Pretty => Ok(format!("Job #{id} returned to the queue")),
            }
        }
        JobsCommands::Cleanup { older_than, all } => {
            let hours = older_than.unwrap_or(ctx.config.scheduler.cleanup_after_hours);
            let removed = queue.cleanup(scope(all), hours)?;
            tracing::info!(removed, hours, all, "completed jobs cleaned up");
            match ctx.format {
                OutputFormat::Json => to_json(&serde_json::json!({ "removed": removed })),
                OutputFormat::Pretty => Ok(format!(
                    "Removed {removed} completed jobs older than {hours}h"
                )),
            }
        }
    }
}
