//! Output formatting for crmflow.
//!
//! This module provides formatters for displaying records, rules, runs and
//! jobs as colored text or JSON.

mod json;
mod pretty;

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::CrmError;

pub use json::*;
pub use pretty::*;

/// Format a value with the pretty formatter or as JSON
///
/// # Errors
///
/// Returns `CrmError::Parse` if JSON serialization fails.
pub fn render<T: Serialize + ?Sized>(
    value: &T,
    format: OutputFormat,
    pretty: impl FnOnce(&T) -> String,
) -> Result<String, CrmError> {
    match format {
        OutputFormat::Pretty => Ok(pretty(value)),
        OutputFormat::Json => to_json(value),
    }
}

/// Format a list with the pretty formatter or as a JSON `{count, items}` object
///
/// # Errors
///
/// Returns `CrmError::Parse` if JSON serialization fails.
pub fn render_list<T: Serialize>(
    items: &[T],
    format: OutputFormat,
    pretty: impl FnOnce(&[T]) -> String,
) -> Result<String, CrmError> {
    match format {
        OutputFormat::Pretty => Ok(pretty(items)),
        OutputFormat::Json => format_list_json(items),
    }
}
