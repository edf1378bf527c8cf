//! Configuration management for crmflow.
//!
//! This module handles loading configuration from `~/.crmflow/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{
    ColorSetting, Config, EngineSettings, GeneralConfig, LoggingSettings, SchedulerSettings,
    WebhookSettings,
};
