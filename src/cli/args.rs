use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "crmflow")]
#[command(about = "Multi-tenant CRM workflow automation engine")]
#[command(long_about = "crmflow - CRM workflow automation

Stores tenant-scoped records and automation rules, runs matching rules when
records are created or updated, and drains a job queue on each scheduler
tick.

QUICK START:
  crmflow rules create --file welcome.yaml        Add a rule
  crmflow records create lead --data '{\"email\": \"ann@example.com\"}'
  crmflow run welcome --record 1 --dry-run        Preview a rule
  crmflow tick                                    Run due scheduled work

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  crmflow <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to `general.default_output` from the config file.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Organization (tenant) to act on
    ///
    /// Defaults to `general.default_organization` from the config file.
    #[arg(long, global = true, env = "CRMFLOW_ORG")]
    pub org: Option<String>,

    /// Database file (defaults to ~/.crmflow/crmflow.db)
    #[arg(long, global = true, env = "CRMFLOW_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage automation rules
    ///
    /// Rules are defined in YAML with a trigger, a condition tree and an
    /// ordered list of actions.
    ///
    /// # Examples
    ///
    ///   crmflow rules list
    ///   crmflow rules create --file welcome.yaml
    ///   crmflow rules toggle welcome --disable
    ///   crmflow rules export rules.yaml
    #[command(alias = "rule")]
    Rules(RulesArgs),

    /// Create, update and inspect records
    ///
    /// Creating or updating a record runs the organization's `on_create`
    /// or `on_update` rules.
    ///
    /// # Examples
    ///
    ///   crmflow records create lead --data '{"email": "ann@example.com"}'
    ///   crmflow records update 4 --set stage=qualified --set data.score=80
    ///   crmflow records list --type lead
    #[command(alias = "record")]
    Records(RecordsArgs),

    /// Submit a web form
    ///
    /// Runs the organization's `webform` rules for the given form, either
    /// against an existing record or a new one built from `--data`.
    ///
    /// # Examples
    ///
    ///   crmflow webform quote-request --record 4
    ///   crmflow webform quote-request --type lead --data '{"email": "bo@example.com"}'
    Webform(WebformArgs),

    /// Run one rule against one record
    ///
    /// Any rule can be run manually, whatever its trigger. Conditions are
    /// still checked; a miss is recorded as a skipped run.
    ///
    /// # Examples
    ///
    ///   crmflow run welcome --record 4
    ///   crmflow run welcome --record 4 --dry-run
    ///   crmflow run 12 --record 4 --queue
    Run(RunArgs),

    /// Run one scheduler tick
    ///
    /// Queues due scheduled rules, recovers stale jobs and drains a batch of
    /// pending jobs. Meant to be invoked by cron.
    ///
    /// # Examples
    ///
    ///   crmflow tick
    ///   crmflow tick --batch 10 --dry-run
    Tick(TickArgs),

    /// Inspect and manage the job queue
    Jobs(JobsArgs),

    /// Inspect the rule run log
    Runs(RunsArgs),
}

/// Arguments for rules command.
#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommands,
}

/// Rules subcommands.
#[derive(Subcommand)]
pub enum RulesCommands {
    /// List all rules in execution order
    List,

    /// Show a rule's trigger, conditions and actions
    Show {
        /// Rule name or ID
        rule: String,
    },

    /// Create a rule from a YAML file
    Create {
        /// YAML file holding a single rule
        #[arg(long, short = 'f')]
        file: PathBuf,
    },

    /// Delete a rule
    Delete {
        /// Rule name or ID
        rule: String,

        /// Confirm deletion
        #[arg(long)]
        force: bool,
    },

    /// Enable or disable a rule (flips it when neither flag is given)
    Toggle {
        /// Rule name or ID
        rule: String,

        /// Enable the rule
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the rule
        #[arg(long)]
        disable: bool,
    },

    /// Import rules from a YAML rule set
    Import {
        /// File containing `rules: [...]`
        path: PathBuf,

        /// Replace rules that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Export rules to a YAML rule set
    Export {
        /// Destination file, `-` for stdout (defaults to the exports directory)
        path: Option<PathBuf>,

        /// Only export these rules
        #[arg(long, short = 'r')]
        rules: Vec<String>,
    },
}

/// Arguments for records command.
#[derive(Args)]
pub struct RecordsArgs {
    #[command(subcommand)]
    pub command: RecordsCommands,
}

/// Records subcommands.
#[derive(Subcommand)]
pub enum RecordsCommands {
    /// Create a record and run `on_create` rules
    Create {
        /// Entity type (lead, deal, ticket, contact, ...)
        entity_type: String,

        #[command(flatten)]
        fields: RecordFields,
    },

    /// Update a record and run `on_update` rules
    Update {
        /// Record ID
        id: i64,

        /// Field assignment, `field=value` (repeatable). Values that parse
        /// as JSON are stored as JSON.
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,

        #[command(flatten)]
        fields: RecordFields,
    },

    /// Show a record and its tasks
    Show {
        /// Record ID
        id: i64,
    },

    /// List records
    List {
        /// Only this entity type
        #[arg(long = "type", short = 't')]
        entity_type: Option<String>,

        /// Maximum records to show
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,
    },
}

/// Column values shared by record create and update.
#[derive(Args, Default)]
pub struct RecordFields {
    /// JSON object merged into the record's data
    #[arg(long)]
    pub data: Option<String>,

    /// Status column
    #[arg(long)]
    pub status: Option<String>,

    /// Stage column
    #[arg(long)]
    pub stage: Option<String>,

    /// Owner column
    #[arg(long)]
    pub owner: Option<String>,

    /// Tags (comma-separated or repeated)
    #[arg(long = "tag", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Skip automation rules for this change
    #[arg(long)]
    pub no_rules: bool,
}

/// Arguments for webform command.
#[derive(Args)]
pub struct WebformArgs {
    /// Form identifier
    pub form_id: String,

    /// Existing record the submission belongs to
    #[arg(long, conflicts_with = "data")]
    pub record: Option<i64>,

    /// Entity type for a new record
    #[arg(long = "type", default_value = "lead")]
    pub entity_type: String,

    /// Submitted fields as a JSON object (creates a new record)
    #[arg(long)]
    pub data: Option<String>,

    /// Preview actions without side effects
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for run command.
#[derive(Args)]
pub struct RunArgs {
    /// Rule name or ID
    pub rule: String,

    /// Record ID
    #[arg(long, short = 'r')]
    pub record: i64,

    /// Preview actions without side effects
    #[arg(long, conflicts_with = "queue")]
    pub dry_run: bool,

    /// Queue the run for the next tick instead of running it now
    #[arg(long)]
    pub queue: bool,
}

/// Arguments for tick command.
#[derive(Args)]
pub struct TickArgs {
    /// Maximum jobs to process (defaults to `scheduler.batch_size`)
    #[arg(long)]
    pub batch: Option<usize>,

    /// List due work without claiming or running it
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for jobs command.
#[derive(Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommands,
}

/// Job status filter.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatusFilter {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Jobs subcommands.
#[derive(Subcommand)]
pub enum JobsCommands {
    /// List jobs, newest first
    List {
        /// Only jobs with this status
        #[arg(long, short = 's', value_enum)]
        status: Option<JobStatusFilter>,

        /// Include every organization
        #[arg(long)]
        all: bool,

        /// Maximum jobs to show
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,
    },

    /// Show queue statistics
    Stats {
        /// Include every organization
        #[arg(long)]
        all: bool,
    },

    /// Return a failed job to the queue
    Retry {
        /// Job ID
        id: i64,
    },

    /// Delete old completed jobs
    Cleanup {
        /// Age in hours (defaults to `scheduler.cleanup_after_hours`)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        older_than: Option<i64>,

        /// Include every organization
        #[arg(long)]
        all: bool,
    },
}

/// Arguments for runs command.
#[derive(Args)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommands,
}

/// Runs subcommands.
#[derive(Subcommand)]
pub enum RunsCommands {
    /// List runs, newest first
    List {
        /// Only runs of this rule (name or ID)
        #[arg(long, short = 'r')]
        rule: Option<String>,

        /// Maximum runs to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Show one run with its action log
    Show {
        /// Run ID
        id: i64,
    },
}
