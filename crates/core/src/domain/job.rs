// Job Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::DomainError;

/// Engine-assigned job identifier (opaque)
pub type JobId = String;

/// Engine-assigned worker identifier (opaque)
pub type WorkerId = String;

/// Job lifecycle state as tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Retry,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Retry => "retry",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobState::Created),
            "retry" => Ok(JobState::Retry),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "cancelled" => Ok(JobState::Cancelled),
            "failed" => Ok(JobState::Failed),
            other => Err(DomainError::UnknownJobState(other.to_string())),
        }
    }
}

/// Full job record as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: JobId,
    /// Queue name
    pub name: String,
    pub data: serde_json::Value,
    pub state: JobState,
    pub priority: i32,
    pub retry_limit: u32,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: bool,
    pub singleton_key: Option<String>,
    pub created_on: DateTime<Utc>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
}

/// Reduced projection of a job's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStateInfo {
    pub status: Option<JobState>,
    pub created_on: Option<DateTime<Utc>>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
}

impl From<&JobInfo> for JobStateInfo {
    fn from(job: &JobInfo) -> Self {
        Self {
            status: Some(job.state),
            created_on: Some(job.created_on),
            started_on: job.started_on,
            completed_on: job.completed_on,
        }
    }
}

/// A single job handed to a worker by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: JobId,
    /// Queue name
    pub name: String,
    /// `None` marks a malformed delivery
    pub data: Option<serde_json::Value>,
    /// Present when the worker asked for metadata
    pub metadata: Option<JobInfo>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data: Some(data),
            metadata: None,
        }
    }

    /// Payload, treating JSON `null` as absent
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().filter(|value| !value.is_null())
    }
}
