// Per-call options for submission, workers and schedules

use serde::{Deserialize, Serialize};

use crate::config::{QueueDefaults, DEFAULT_RETRY_DELAY_MS, DEFAULT_RETRY_LIMIT};

/// Job submission options. Unset fields fall back to queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    /// Milliseconds between attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// Double the delay after every failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<bool>,
    /// Engine-level deduplication key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singleton_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_in_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_after_seconds: Option<u64>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_retry(mut self, limit: u32, delay_ms: u64) -> Self {
        self.retry_limit = Some(limit);
        self.retry_delay = Some(delay_ms);
        self
    }

    pub fn with_singleton_key(mut self, key: impl Into<String>) -> Self {
        self.singleton_key = Some(key.into());
        self
    }

    pub fn with_start_after(mut self, seconds: u64) -> Self {
        self.start_after_seconds = Some(seconds);
        self
    }

    /// Merge with manager-level defaults. Values set on `self` win.
    ///
    /// The result always carries a retry limit and a retry delay.
    pub fn merged_with(self, defaults: Option<&QueueDefaults>) -> Self {
        let retry_limit = self
            .retry_limit
            .or_else(|| defaults.and_then(|d| d.retry_limit))
            .unwrap_or(DEFAULT_RETRY_LIMIT);
        let retry_delay = self
            .retry_delay
            .or_else(|| defaults.and_then(|d| d.retry_delay))
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);

        Self {
            retry_limit: Some(retry_limit),
            retry_delay: Some(retry_delay),
            ..self
        }
    }
}

/// Worker registration options. Unset fields fall back to queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerOptions {
    /// Polling interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_job_check_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_concurrency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_metadata: Option<bool>,
}

impl WorkerOptions {
    pub fn with_team_size(mut self, team_size: u32) -> Self {
        self.team_size = Some(team_size);
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = Some(true);
        self
    }
}

/// Recurring schedule options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleOptions {
    /// IANA time zone of the cron expression (engines may only accept UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    /// Tells apart several schedules on the same queue. Scheduling again
    /// with the same queue and key replaces the earlier schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Options applied to every job the schedule creates
    #[serde(flatten)]
    pub job: JobOptions,
}

impl ScheduleOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Key under which the schedule is stored; empty for the queue's default schedule
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }

    /// `queue` for the default schedule, `queue:key` otherwise
    pub fn schedule_id(&self, queue: &str) -> String {
        match self.key() {
            "" => queue.to_string(),
            key => format!("{}:{}", queue, key),
        }
    }
}
