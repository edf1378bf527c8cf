//! Configuration settings for crmflow.
//!
//! Settings are loaded from `~/.crmflow/config.yaml`.

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::CrmError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Rule engine settings.
    pub engine: EngineSettings,
    /// Scheduler tick settings.
    pub scheduler: SchedulerSettings,
    /// Outbound webhook settings.
    pub webhook: WebhookSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Color output setting.
    #[serde(default = "default_color")]
    pub color: ColorSetting,
    /// Organization used when `--org` is not given.
    #[serde(default = "default_organization")]
    pub default_organization: String,
}

/// Color output setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorSetting {
    /// Auto-detect based on terminal.
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

/// Rule engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Evaluate rules without side effects.
    pub dry_run: bool,
    /// Maximum actions executed per rule run.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
}

/// Scheduler tick settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Jobs drained per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts before a job is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Processing jobs untouched for this long are returned to pending.
    #[serde(default = "default_stale_after")]
    pub stale_after_minutes: i64,
    /// Completed jobs older than this are removed by `jobs cleanup`.
    #[serde(default = "default_cleanup_after")]
    pub cleanup_after_hours: i64,
}

/// Outbound webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// User agent sent with every call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_color() -> ColorSetting {
    ColorSetting::Auto
}

fn default_organization() -> String {
    "default".to_string()
}

const fn default_max_actions() -> usize {
    25
}

const fn default_batch_size() -> usize {
    50
}

const fn default_max_retries() -> i32 {
    3
}

const fn default_stale_after() -> i64 {
    15
}

const fn default_cleanup_after() -> i64 {
    24 * 7
}

const fn default_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("crmflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            color: default_color(),
            default_organization: default_organization(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_actions: default_max_actions(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            stale_after_minutes: default_stale_after(),
            cleanup_after_hours: default_cleanup_after(),
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, CrmError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, CrmError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            CrmError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            CrmError::Config(format!("Failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), CrmError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| CrmError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            CrmError::Config(format!("Failed to write config file {}: {e}", path.display()))
        })
    }
}
