//! Automation rule engine.
//!
//! This module provides trigger/condition/action automation over CRM
//! records.
//!
//! Features:
//! - Rules scoped by organization, stored in SQLite
//! - Nested `all`/`any` condition trees with three-valued logic
//! - Event triggers (create, update, webform, manual) and schedules
//! - Template substitution in action parameters
//! - Per-action run log and dry-run mode

pub mod action;
pub mod condition;
pub mod engine;
pub mod rule;
pub mod run_log;
pub mod storage;
pub mod webhook;

pub use action::{Action, ActionParams, ActionResult, ActionType};
pub use condition::{Condition, ConditionGroup, ConditionNode, ConditionOperator, MatchMode, Truth};
pub use engine::{format_engine_result, AutomationEngine, EngineConfig, EngineResult};
pub use rule::{
    RecordEvent, Rule, RuleContext, Schedule, ScheduleType, Trigger, TriggerConfig, TriggerType,
};
pub use run_log::{format_run, ActionLogEntry, ActionStatus, RuleRun, RunLog, RunStatus};
pub use storage::{RuleSet, RuleStorage};
pub use webhook::{HttpWebhookSender, WebhookRequest, WebhookResponse, WebhookSender};
