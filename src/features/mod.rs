//! Feature implementations for crmflow.
//!
//! - Automation rules, conditions, actions and the rule engine
//! - Scheduler job queue and tick processing

pub mod automation;
pub mod scheduler;
