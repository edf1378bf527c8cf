//! Rules command implementation.
//!
//! Handles rule management: listing, YAML create/import/export, toggling.

use std::fs;
use std::path::Path;

use crate::cli::args::{OutputFormat, RulesCommands};
use crate::config::Paths;
use crate::error::CrmError;
use crate::features::automation::{Rule, RuleSet, RuleStorage};
use crate::output::{format_rule_pretty, format_rules_pretty, render, render_list, to_json};

use super::CommandContext;

/// Execute rules subcommands.
///
/// # Errors
///
/// Returns an error if the rule is not found, a file cannot be read or
/// written, or storage fails.
pub fn rules(ctx: &CommandContext<'_>, cmd: RulesCommands) -> Result<String, CrmError> {
    let storage = RuleStorage::new(ctx.db);

    match cmd {
        RulesCommands::List => {
            let rules = storage.list(&ctx.organization)?;
            render_list(&rules, ctx.format, format_rules_pretty)
        }
        RulesCommands::Show { rule } => {
            let rule = storage.find(&ctx.organization, &rule)?;
            render(&rule, ctx.format, format_rule_pretty)
        }
        RulesCommands::Create { file } => create_rule(ctx, &storage, &file),
        RulesCommands::Delete { rule, force } => delete_rule(ctx, &storage, &rule, force),
        RulesCommands::Toggle {
            rule,
            enable,
            disable,
        } => toggle_rule(ctx, &storage, &rule, enable, disable),
        RulesCommands::Import { path, overwrite } => import_rules(ctx, &storage, &path, overwrite),
        RulesCommands::Export { path, rules } => {
            export_rules(ctx, &storage, path.as_deref(), &rules)
        }
    }
}

fn read_file(path: &Path) -> Result<String, CrmError> {
    fs::read_to_string(path)
        .map_err(|e| CrmError::Config(format!("Failed to read {}: {e}", path.display())))
}

/// Create a rule from a YAML file. The rule always lands in the current
/// organization.
fn create_rule(
    ctx: &CommandContext<'_>,
    storage: &RuleStorage<'_>,
    file: &Path,
) -> Result<String, CrmError> {
    let yaml = read_file(file)?;
    let mut rule: Rule = serde_yaml::from_str(&yaml)
        .map_err(|e| CrmError::Validation(format!("Failed to parse rule: {e}")))?;
    rule.id = None;
    rule.organization_id.clone_from(&ctx.organization);

    storage.create(&mut rule)?;

    match ctx.format {
        OutputFormat::Json => to_json(&rule),
        OutputFormat::Pretty => Ok(format!(
            "Created rule #{}: {}",
            rule.id.unwrap_or_default(),
            rule.name
        )),
    }
}

fn delete_rule(
    ctx: &CommandContext<'_>,
    storage: &RuleStorage<'_>,
    name: &str,
    force: bool,
) -> Result<String, CrmError> {
    if !force {
        return Err(CrmError::Validation("Use --force to delete rule".to_string()));
    }

    let rule = storage.find(&ctx.organization, name)?;
    let id = rule.id.unwrap_or_default();
    if !storage.delete(&ctx.organization, id)? {
        return Err(CrmError::NotFound(format!("Rule: {name}")));
    }

    match ctx.format {
        OutputFormat::Json => to_json(&serde_json::json!({ "deleted": rule.name, "id": id })),
        OutputFormat::Pretty => Ok(format!("Deleted rule: {}", rule.name)),
    }
}

fn toggle_rule(
    ctx: &CommandContext<'_>,
    storage: &RuleStorage<'_>,
    name: &str,
    enable: bool,
    disable: bool,
) -> Result<String, CrmError> {
    let rule = storage.find(&ctx.organization, name)?;

    let enabled = if enable {
        true
    } else if disable {
        false
    } else {
        !rule.enabled
    };

    storage.set_enabled(&ctx.organization, rule.id.unwrap_or_default(), enabled)?;

    match ctx.format {
        OutputFormat::Json => {
            to_json(&serde_json::json!({ "name": rule.name, "enabled": enabled }))
        }
        OutputFormat::Pretty => Ok(format!(
            "Rule {} is now {}",
            rule.name,
            if enabled { "enabled" } else { "disabled" }
        )),
    }
}

fn import_rules(
    ctx: &CommandContext<'_>,
    storage: &RuleStorage<'_>,
    path: &Path,
    overwrite: bool,
) -> Result<String, CrmError> {
    let mut set = RuleSet::from_yaml(&read_file(path)?)?;

    // Validate everything before writing anything.
    for rule in &mut set.rules {
        rule.organization_id.clone_from(&ctx.organization);
        rule.validate()?;
    }

    let mut created = 0;
    let mut replaced = 0;
    let mut skipped = 0;

    for mut rule in set.rules {
        if !overwrite && storage.load(&ctx.organization, &rule.name)?.is_some() {
            skipped += 1;
            continue;
        }
        if storage.upsert(&mut rule)? {
            created += 1;
        } else {
            replaced += 1;
        }
    }

    tracing::info!(created, replaced, skipped, "rules imported");

    match ctx.format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "created": created,
            "replaced": replaced,
            "skipped": skipped,
        })),
        OutputFormat::Pretty => Ok(format!(
            "Imported {created} new and {replaced} replaced rules, skipped {skipped} existing"
        )),
    }
}

fn export_rules(
    ctx: &CommandContext<'_>,
    storage: &RuleStorage<'_>,
    path: Option<&Path>,
    names: &[String],
) -> Result<String, CrmError> {
    let mut set = RuleSet::new();
    for rule in storage.list(&ctx.organization)? {
        if names.is_empty() || names.iter().any(|n| n == &rule.name) {
            set.add(rule);
        }
    }

    let yaml = set.to_yaml()?;

    let path = match path {
        Some(p) if p.as_os_str() == "-" => return Ok(yaml),
        Some(p) => p.to_path_buf(),
        None => {
            let paths = Paths::new()?;
            paths.ensure_dirs()?;
            paths.exports.join(format!("{}-rules.yaml", ctx.organization))
        }
    };

    fs::write(&path, &yaml)
        .map_err(|e| CrmError::Config(format!("Failed to write {}: {e}", path.display())))?;

    match ctx.format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "exported": set.rules.len(),
            "path": path.display().to_string(),
        })),
        OutputFormat::Pretty => Ok(format!(
            "Exported {} rules to {}",
            set.rules.len(),
            path.display()
        )),
    }
}
