//! Runs command implementation.

use crate::cli::args::RunsCommands;
use crate::error::CrmError;
use crate::features::automation::{format_run, RuleStorage, RunLog};
use crate::output::{format_runs_pretty, render, render_list};

use super::CommandContext;

/// Execute runs subcommands.
///
/// # Errors
///
/// Returns `NotFound` for an unknown rule or run, or a storage error.
pub fn runs(ctx: &CommandContext<'_>, cmd: RunsCommands) -> Result<String, CrmError> {
    let log = RunLog::new(ctx.db);

    match cmd {
        RunsCommands::List { rule, limit } => {
            let rule_id = rule
                .map(|r| RuleStorage::new(ctx.db).find(&ctx.organization, &r))
                .transpose()?
                .and_then(|r| r.id);
            let runs = log.list(&ctx.organization, rule_id, limit)?;
            render_list(&runs, ctx.format, format_runs_pretty)
        }
        RunsCommands::Show { id } => {
            let run = log
                .get(&ctx.organization, id)?
                .ok_or_else(|| CrmError::NotFound(format!("Run: {id}")))?;
            render(&run, ctx.format, format_run)
        }
    }
}
