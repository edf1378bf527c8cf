//! Command implementations for crmflow.
//!
//! Every command takes a [`CommandContext`] and returns the text to print.

mod jobs;
mod records;
mod rules;
mod run;
mod runs;

pub use jobs::jobs;
pub use records::{records, webform};
pub use rules::rules;
pub use run::{run, tick};
pub use runs::runs;

use crate::cli::args::OutputFormat;
use crate::config::Config;
use crate::features::automation::EngineConfig;
use crate::storage::Database;

/// Everything a command needs: storage, settings, tenant and output format.
pub struct CommandContext<'a> {
    pub db: &'a Database,
    pub config: &'a Config,
    pub organization: String,
    pub format: OutputFormat,
}

impl<'a> CommandContext<'a> {
    #[must_use]
    pub fn new(
        db: &'a Database,
        config: &'a Config,
        organization: Option<String>,
        format: Option<OutputFormat>,
    ) -> Self {
        Self {
            db,
            config,
            organization: organization
                .filter(|o| !o.trim().is_empty())
                .unwrap_or_else(|| config.general.default_organization.clone()),
            format: format.unwrap_or(config.general.default_output),
        }
    }

    /// Engine settings from config; `dry_run` can only turn dry-run on.
    #[must_use]
    pub const fn engine_config(&self, dry_run: bool) -> EngineConfig {
        EngineConfig::from_config(self.config).with_dry_run(self.config.engine.dry_run || dry_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults_from_config() {
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::default();
        config.general.default_organization = "acme".to_string();
        config.general.default_output = OutputFormat::Json;

        let ctx = CommandContext::new(&db, &config, None, None);
        assert_eq!(ctx.organization, "acme");
        assert_eq!(ctx.format, OutputFormat::Json);

        let ctx = CommandContext::new(
            &db,
            &config,
            Some("globex".to_string()),
            Some(OutputFormat::Pretty),
        );
        assert_eq!(ctx.organization, "globex");
        assert_eq!(ctx.format, OutputFormat::Pretty);
    }

    #[test]
    fn test_engine_config_dry_run_is_sticky() {
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::default();
        config.engine.dry_run = true;

        let ctx = CommandContext::new(&db, &config, None, None);
        assert!(ctx.engine_config(false).dry_run);
    }
}
