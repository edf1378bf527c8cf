use colored::Colorize;

use crate::crm::{Record, Task};
use crate::features::automation::{Rule, RuleRun, RunStatus};
use crate::features::scheduler::{Job, JobStatus, QueueStats};

/// Format a list of records as a pretty table
#[must_use]
pub fn format_records_pretty(records: &[Record], title: &str) -> String {
    if records.is_empty() {
        return format!("{title} (0 items)\n  No records");
    }

    let mut output = format!("{} ({} items)\n", title, records.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for record in records {
        let mut line = format!(
            "{} {}",
            format!("#{}", record.id.unwrap_or_default()).dimmed(),
            record.label().bold()
        );
        line.push_str(&format!("  {}", record.entity_type.dimmed()));

        if let Some(status) = &record.status {
            line.push_str(&format!("  {}", status.yellow()));
        }

        if let Some(owner) = &record.owner_id {
            line.push_str(&format!("  @{owner}"));
        }

        if !record.tags.is_empty() {
            let tags_str = record
                .tags
                .iter()
                .map(|t| format!("#{t}"))
                .collect::<Vec<_>>()
                .join(" ");
            line.push_str(&format!("  {}", tags_str.cyan()));
        }

        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format a single record, with the tasks automations created for it
#[must_use]
pub fn format_record_pretty(record: &Record, tasks: &[Task]) -> String {
    let mut output = format!("{}\n", record.label().bold());
    output.push_str(&format!(
        "  {}: {}\n",
        "ID".dimmed(),
        record.id.unwrap_or_default()
    ));
    output.push_str(&format!("  {}: {}\n", "Type".dimmed(), record.entity_type));

    for (label, value) in [
        ("Owner", &record.owner_id),
        ("Status", &record.status),
        ("Stage", &record.stage),
    ] {
        if let Some(value) = value {
            output.push_str(&format!("  {}: {}\n", label.dimmed(), value));
        }
    }

    if !record.tags.is_empty() {
        output.push_str(&format!("  {}: {}\n", "Tags".dimmed(), record.tags.join(", ")));
    }

    if let Some(data) = record.data.as_object().filter(|d| !d.is_empty()) {
        output.push_str(&format!("  {}:\n", "Data".dimmed()));
        for (key, value) in data {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), String::from);
            output.push_str(&format!("    {key}: {value}\n"));
        }
    }

    if !tasks.is_empty() {
        output.push_str(&format!("  {}:\n", "Tasks".dimmed()));
        for task in tasks {
            let mut line = format!("    [ ] {}", task.title);
            if let Some(assignee) = &task.assignee_id {
                line.push_str(&format!("  @{assignee}"));
            }
            if let Some(due) = &task.due_at {
                line.push_str(&format!("  {}", due.format("%Y-%m-%d").to_string().yellow()));
            }
            output.push_str(&line);
            output.push('\n');
        }
    }

    output.push_str(&format!(
        "  {}: {}\n",
        "Updated".dimmed(),
        record.updated_at.format("%Y-%m-%d %H:%M")
    ));

    output
}

/// Format a list of rules in execution order
#[must_use]
pub fn format_rules_pretty(rules: &[Rule]) -> String {
    if rules.is_empty() {
        return "Rules (0)\n  No rules defined".to_string();
    }

    let mut output = format!("Rules ({})\n", rules.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for rule in rules {
        let status_icon = if rule.enabled {
            "●".green()
        } else {
            "○".dimmed()
        };

        let mut line = format!(
            "{} {} {}",
            status_icon,
            format!("#{}", rule.id.unwrap_or_default()).dimmed(),
            rule.name.bold()
        );
        line.push_str(&format!("  {}", rule.trigger.describe().cyan()));

        if let Some(entity_type) = &rule.entity_type {
            line.push_str(&format!("  {}", entity_type.dimmed()));
        }

        line.push_str(&format!(
            "  {} action(s), {} run(s)",
            rule.actions.len(),
            rule.run_count
        ));

        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format a single rule with its conditions and actions
#[must_use]
pub fn format_rule_pretty(rule: &Rule) -> String {
    let state = if rule.enabled {
        "enabled".green()
    } else {
        "disabled".dimmed()
    };

    let mut output = format!("{} ({})\n", rule.name.bold(), state);
    output.push_str(&format!(
        "  {}: {}\n",
        "ID".dimmed(),
        rule.id.unwrap_or_default()
    ));

    if let Some(description) = &rule.description {
        output.push_str(&format!("  {}: {}\n", "Description".dimmed(), description));
    }

    output.push_str(&format!("  {}: {}\n", "Trigger".dimmed(), rule.trigger.describe()));
    output.push_str(&format!(
        "  {}: {}\n",
        "Entity type".dimmed(),
        rule.entity_type.as_deref().unwrap_or("any")
    ));
    output.push_str(&format!("  {}: {}\n", "Priority".dimmed(), rule.priority));

    if rule.conditions.is_empty() {
        output.push_str(&format!("  {}: always\n", "Conditions".dimmed()));
    } else {
        output.push_str(&format!(
            "  {}: {} leaf condition(s)\n",
            "Conditions".dimmed(),
            rule.conditions.leaf_count()
        ));
    }

    output.push_str(&format!("  {}:\n", "Actions".dimmed()));
    for (i, action) in rule.actions.iter().enumerate() {
        let suffix = if action.continue_on_error {
            " (continue on error)".dimmed().to_string()
        } else {
            String::new()
        };
        output.push_str(&format!("    {}. {}{suffix}\n", i + 1, action.describe()));
    }

    output.push_str(&format!("  {}: {}\n", "Runs".dimmed(), rule.run_count));
    if let Some(last_run) = &rule.last_run {
        output.push_str(&format!(
            "  {}: {}\n",
            "Last run".dimmed(),
            last_run.format("%Y-%m-%d %H:%M")
        ));
    }

    output
}

/// Format run log entries, newest first
#[must_use]
pub fn format_runs_pretty(runs: &[RuleRun]) -> String {
    if runs.is_empty() {
        return "Runs (0)\n  No runs recorded".to_string();
    }

    let mut output = format!("Runs ({})\n", runs.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for run in runs {
        let status = match run.status {
            RunStatus::Completed => "✓".green(),
            RunStatus::Failed => "✗".red(),
            RunStatus::Skipped => "-".dimmed(),
            RunStatus::Waiting => "…".yellow(),
        };
        let record = run
            .record_id
            .map_or_else(|| "-".to_string(), |id| format!("record {id}"));
        let dry_run = if run.dry_run { "  [dry run]" } else { "" };

        output.push_str(&format!(
            "{} {} {}  {}  {}  {}{dry_run}\n",
            status,
            format!("#{}", run.id.unwrap_or_default()).dimmed(),
            run.rule_name.bold(),
            record,
            run.trigger.dimmed(),
            run.started_at.format("%Y-%m-%d %H:%M")
        ));
    }

    output
}

/// Format queued jobs
#[must_use]
pub fn format_jobs_pretty(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "Jobs (0)\n  Queue is empty".to_string();
    }

    let mut output = format!("Jobs ({})\n", jobs.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for job in jobs {
        let status = match job.status {
            JobStatus::Pending => job.status.as_str().yellow(),
            JobStatus::Processing => job.status.as_str().cyan(),
            JobStatus::Completed => job.status.as_str().green(),
            JobStatus::Failed => job.status.as_str().red(),
        };

        let mut line = format!(
            "{} {} {}  attempts {}/{}  run at {}",
            format!("#{}", job.id.unwrap_or_default()).dimmed(),
            job.kind.as_str().bold(),
            status,
            job.attempts,
            job.max_retries,
            job.run_at.format("%Y-%m-%d %H:%M")
        );

        if let Some(error) = &job.last_error {
            line.push_str(&format!("\n    {}", error.red()));
        }

        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format queue statistics
#[must_use]
pub fn format_queue_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = vec!["Job Queue".bold().to_string(), "─".repeat(30)];

    lines.push(format!("  Pending:    {}", stats.pending.to_string().yellow()));
    lines.push(format!("  Processing: {}", stats.processing.to_string().cyan()));
    lines.push(format!("  Completed:  {}", stats.completed.to_string().green()));
    lines.push(format!("  Failed:     {}", stats.failed.to_string().red()));

    if let Some(oldest) = &stats.oldest_pending {
        lines.push(format!(
            "  Oldest pending: {}",
            oldest.format("%Y-%m-%d %H:%M")
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::automation::{Action, Trigger};
    use serde_json::json;

    #[test]
    fn test_format_records_empty() {
        colored::control::set_override(false);
        assert!(format_records_pretty(&[], "Leads").contains("No records"));
    }

    #[test]
    fn test_format_record_shows_data() {
        colored::control::set_override(false);
        let mut record = Record::new("acme", "lead")
            .with_status("new")
            .with_data(json!({ "name": "Ann Lee", "score": 42 }));
        record.id = Some(3);

        let text = format_record_pretty(&record, &[]);
        assert!(text.starts_with("Ann Lee"));
        assert!(text.contains("Status: new"));
        assert!(text.contains("score: 42"));
    }

    #[test]
    fn test_format_rule() {
        colored::control::set_override(false);
        let rule = Rule::new("welcome", Trigger::on_create())
            .with_action(Action::add_tags(vec!["new".to_string()]).continue_on_error());

        let text = format_rule_pretty(&rule);
        assert!(text.contains("welcome (enabled)"));
        assert!(text.contains("Conditions: always"));
        assert!(text.contains("1. Add tags: new (continue on error)"));

        assert!(format_rules_pretty(&[rule]).contains("1 action(s), 0 run(s)"));
    }

    #[test]
    fn test_format_queue_stats() {
        colored::control::set_override(false);
        let stats = QueueStats {
            pending: 2,
            processing: 0,
            completed: 5,
            failed: 1,
            oldest_pending: None,
        };
        let text = format_queue_stats_pretty(&stats);
        assert!(text.contains("Pending:    2"));
        assert!(text.contains("Failed:     1"));
    }
}
