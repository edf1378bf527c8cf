//! Records and webform command implementations.
//!
//! Creating, updating and submitting records are the event sources for the
//! automation engine.

use colored::Colorize;
use serde_json::{json, Value};

use crate::cli::args::{OutputFormat, RecordFields, RecordsCommands, WebformArgs};
use crate::crm::{Record, RecordStore, TaskStore};
use crate::error::CrmError;
use crate::features::automation::{
    format_engine_result, AutomationEngine, EngineResult, HttpWebhookSender, RecordEvent,
};
use crate::output::{format_record_pretty, format_records_pretty, render_list, to_json};

use super::CommandContext;

/// Execute records subcommands.
///
/// # Errors
///
/// Returns an error for bad field values, unknown records, or storage
/// failures.
pub fn records(ctx: &CommandContext<'_>, cmd: RecordsCommands) -> Result<String, CrmError> {
    match cmd {
        RecordsCommands::Create {
            entity_type,
            fields,
        } => create_record(ctx, &entity_type, &fields),
        RecordsCommands::Update { id, set, fields } => update_record(ctx, id, &set, &fields),
        RecordsCommands::Show { id } => {
            let record = RecordStore::new(ctx.db).require(&ctx.organization, id)?;
            let tasks = TaskStore::new(ctx.db).for_record(&ctx.organization, id)?;
            match ctx.format {
                OutputFormat::Json => to_json(&json!({ "record": record, "tasks": tasks })),
                OutputFormat::Pretty => Ok(format_record_pretty(&record, &tasks)),
            }
        }
        RecordsCommands::List { entity_type, limit } => {
            let records =
                RecordStore::new(ctx.db).list(&ctx.organization, entity_type.as_deref(), limit)?;
            let title = entity_type
                .map_or_else(|| "Records".to_string(), |t| format!("Records: {t}"));
            render_list(&records, ctx.format, |r| format_records_pretty(r, &title))
        }
    }
}

/// Submit a web form for an existing or new record.
///
/// # Errors
///
/// Returns an error for bad data, an unknown record, or storage failures.
pub fn webform(ctx: &CommandContext<'_>, args: WebformArgs) -> Result<String, CrmError> {
    let store = RecordStore::new(ctx.db);
    let webhook = HttpWebhookSender::new(&ctx.config.webhook)?;
    let engine = AutomationEngine::with_config(ctx.db, &webhook, ctx.engine_config(args.dry_run));

    let mut results = Vec::new();
    let record = if let Some(id) = args.record {
        store.require(&ctx.organization, id)?
    } else {
        let mut record = Record::new(ctx.organization.clone(), args.entity_type.clone());
        let fields = RecordFields {
            data: args.data.clone(),
            ..RecordFields::default()
        };
        apply_fields(&mut record, &fields)?;
        store.create(&mut record)?;
        results.push(("on_create", engine.handle_event(&RecordEvent::Created, &record, &[])?));
        record
    };

    let event = RecordEvent::Webform {
        form_id: args.form_id.clone(),
    };
    results.push(("webform", engine.handle_event(&event, &record, &[])?));

    let record_id = record.id.unwrap_or_default();
    let record = store.require(&ctx.organization, record_id)?;
    output_with_automation(ctx, &record, &results)
}

fn create_record(
    ctx: &CommandContext<'_>,
    entity_type: &str,
    fields: &RecordFields,
) -> Result<String, CrmError> {
    let store = RecordStore::new(ctx.db);
    let mut record = Record::new(ctx.organization.clone(), entity_type);
    apply_fields(&mut record, fields)?;
    store.create(&mut record)?;
    tracing::info!(record_id = ?record.id, entity_type, "record created");

    let mut results = Vec::new();
    if !fields.no_rules {
        let webhook = HttpWebhookSender::new(&ctx.config.webhook)?;
        let engine = AutomationEngine::with_config(ctx.db, &webhook, ctx.engine_config(false));
        results.push(("on_create", engine.handle_event(&RecordEvent::Created, &record, &[])?));
    }

    let record = store.require(&ctx.organization, record.id.unwrap_or_default())?;
    output_with_automation(ctx, &record, &results)
}

fn update_record(
    ctx: &CommandContext<'_>,
    id: i64,
    assignments: &[String],
    fields: &RecordFields,
) -> Result<String, CrmError> {
    let store = RecordStore::new(ctx.db);
    let before = store.require(&ctx.organization, id)?;

    let mut after = before.clone();
    apply_fields(&mut after, fields)?;
    for assignment in assignments {
        let (field, raw) = assignment.split_once('=').ok_or_else(|| {
            CrmError::Validation(format!("Expected FIELD=VALUE, got: {assignment}"))
        })?;
        after.set_field(field.trim(), parse_value(raw))?;
    }

    let changed = before.changed_fields(&after);
    if changed.is_empty() {
        return match ctx.format {
            OutputFormat::Json => to_json(&json!({ "record": before, "changed_fields": changed })),
            OutputFormat::Pretty => Ok(format!("No changes to {}", before.label())),
        };
    }

    store.update(&mut after)?;
    tracing::info!(record_id = id, changed = ?changed, "record updated");

    let mut results = Vec::new();
    if !fields.no_rules {
        let webhook = HttpWebhookSender::new(&ctx.config.webhook)?;
        let engine = AutomationEngine::with_config(ctx.db, &webhook, ctx.engine_config(false));
        results.push(("on_update", engine.handle_event(&RecordEvent::Updated, &after, &changed)?));
    }

    let record = store.require(&ctx.organization, id)?;
    output_with_automation(ctx, &record, &results)
}

/// Apply column flags and merge `--data` into the record.
fn apply_fields(record: &mut Record, fields: &RecordFields) -> Result<(), CrmError> {
    if let Some(raw) = &fields.data {
        let data: Value = serde_json::from_str(raw)
            .map_err(|e| CrmError::Validation(format!("--data is not valid JSON: {e}")))?;
        let Value::Object(map) = data else {
            return Err(CrmError::Validation("--data must be a JSON object".to_string()));
        };
        match &mut record.data {
            Value::Object(existing) => existing.extend(map),
            other => *other = Value::Object(map),
        }
    }
    apply_columns(record, fields)
}

fn apply_columns(record: &mut Record, fields: &RecordFields) -> Result<(), CrmError> {
    for (field, value) in [
        ("status", &fields.status),
        ("stage", &fields.stage),
        ("owner_id", &fields.owner),
    ] {
        if let Some(value) = value {
            record.set_field(field, Value::String(value.clone()))?;
        }
    }
    let tags: Vec<String> = fields
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    record.add_tags(&tags);
    Ok(())
}

/// JSON if it parses, otherwise the raw text.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn output_with_automation(
    ctx: &CommandContext<'_>,
    record: &Record,
    results: &[(&str, EngineResult)],
) -> Result<String, CrmError> {
    match ctx.format {
        OutputFormat::Json => {
            let automation: serde_json::Map<String, Value> = results
                .iter()
                .map(|(event, result)| Ok(((*event).to_string(), serde_json::to_value(result)?)))
                .collect::<Result<_, CrmError>>()?;
            to_json(&json!({ "record": record, "automation": automation }))
        }
        OutputFormat::Pretty => {
            let mut lines = vec![format!(
                "{} {} #{}",
                "✓".green(),
                record.label().bold(),
                record.id.unwrap_or_default()
            )];
            for (event, result) in results {
                if result.runs.is_empty() {
                    continue;
                }
                lines.push(String::new());
                lines.push(format!("[{event}]"));
                lines.push(format_engine_result(result));
            }
            Ok(lines.join("\n"))
        }
    }
}
