//! Error types for crmflow.

use thiserror::Error;

/// Errors produced by the engine, its storage and the CLI.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrmError {
    /// HTTP status class for this error.
    ///
    /// Hosts that expose the engine over HTTP map errors to a `{error}` body
    /// with this status.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Parse(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Unprocessable(_) => 422,
            Self::Database(_) | Self::Config(_) | Self::Webhook(_) | Self::Io(_) => 500,
        }
    }

    /// The `{"error": ...}` body a handler would return.
    #[must_use]
    pub fn to_json_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

impl From<rusqlite::Error> for CrmError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_yaml::Error> for CrmError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(e.to_string())
    }
}
