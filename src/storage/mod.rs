//! Storage layer for crmflow.
//!
//! This module provides SQLite-based persistence for records, rules,
//! run logs and the scheduler queue.

mod database;
mod migrations;

pub use database::Database;
pub(crate) use database::{
    json_column, parse_optional_timestamp, parse_timestamp, sql_time, OptionalExt,
};
