//! crmflow - multi-tenant CRM workflow automation
//!
//! This crate stores tenant-scoped CRM records and automation rules, runs
//! matching rules when records change, and drains a persistent job queue for
//! delayed and scheduled work.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod crm;
pub mod error;
pub mod features;
pub mod logging;
pub mod output;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::CrmError;
