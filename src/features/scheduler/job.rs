//! Job types for the scheduler queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrmError;

/// What a queued job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run one rule against one record
    RunRule,
    /// Continue a rule after a `wait` action
    ResumeRule,
    /// Run a scheduled rule against every matching record
    ScheduledRule,
}

impl JobKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RunRule => "run_rule",
            Self::ResumeRule => "resume_rule",
            Self::ScheduledRule => "scheduled_rule",
        }
    }

    /// Parse a stored kind.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown kind.
    pub fn from_string(s: &str) -> Result<Self, CrmError> {
        match s {
            "run_rule" => Ok(Self::RunRule),
            "resume_rule" => Ok(Self::ResumeRule),
            "scheduled_rule" => Ok(Self::ScheduledRule),
            other => Err(CrmError::Validation(format!("Unknown job kind: {other}"))),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a tick
    Pending,
    /// Claimed by a tick
    Processing,
    /// Executed successfully
    Completed,
    /// Out of retries
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this status is terminal (no more work will happen).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Convert from string.
    #[must_use]
    pub fn from_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload shared by every job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub rule_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    /// First action to run (resume jobs)
    #[serde(default)]
    pub from_action: usize,
}

/// A queued job with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique ID
    pub id: Option<i64>,
    pub organization_id: String,
    pub kind: JobKind,
    /// JSON payload
    pub payload: String,
    pub status: JobStatus,
    /// Failed executions so far
    pub attempts: i32,
    /// Attempts allowed before the job is marked failed
    pub max_retries: i32,
    pub last_error: Option<String>,
    /// Earliest time the job may run
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    #[must_use]
    pub fn new(
        organization_id: impl Into<String>,
        kind: JobKind,
        payload: &JobPayload,
        run_at: DateTime<Utc>,
        max_retries: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            organization_id: organization_id.into(),
            kind,
            payload: serde_json::to_string(payload).unwrap_or_default(),
            status: JobStatus::Pending,
            attempts: 0,
            max_retries,
            last_error: None,
            run_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Run a rule against a record as soon as possible.
    #[must_use]
    pub fn run_rule(
        organization_id: impl Into<String>,
        rule_id: i64,
        record_id: i64,
        max_retries: i32,
    ) -> Self {
        let payload = JobPayload {
            rule_id,
            record_id: Some(record_id),
            from_action: 0,
        };
        Self::new(organization_id, JobKind::RunRule, &payload, Utc::now(), max_retries)
    }

    /// Continue a rule from `from_action` at `run_at`.
    #[must_use]
    pub fn resume_rule(
        organization_id: impl Into<String>,
        rule_id: i64,
        record_id: i64,
        from_action: usize,
        run_at: DateTime<Utc>,
        max_retries: i32,
    ) -> Self {
        let payload = JobPayload {
            rule_id,
            record_id: Some(record_id),
            from_action,
        };
        Self::new(organization_id, JobKind::ResumeRule, &payload, run_at, max_retries)
    }

    /// Run a scheduled rule over its records.
    #[must_use]
    pub fn scheduled_rule(organization_id: impl Into<String>, rule_id: i64, max_retries: i32) -> Self {
        let payload = JobPayload {
            rule_id,
            record_id: None,
            from_action: 0,
        };
        Self::new(
            organization_id,
            JobKind::ScheduledRule,
            &payload,
            Utc::now(),
            max_retries,
        )
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the stored payload is not valid JSON.
    pub fn payload(&self) -> Result<JobPayload, CrmError> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Whether another failure would be allowed.
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}
