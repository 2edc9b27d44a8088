//! RPC Request/Response Types

use queue_sdk_core::domain::{JobInfo, JobStateInfo, QueueInfo};
use serde::{Deserialize, Serialize};

/// queue.list.v1 - List queues known to the engine
#[derive(Debug, Clone, Serialize)]
pub struct QueueListResponse {
    pub queues: Vec<QueueInfo>,
}

/// queue.job.v1 - Look up a job
#[derive(Debug, Deserialize)]
pub struct JobLookupRequest {
    pub queue: String,
    pub job_id: String,
    /// Return the full record instead of the state projection
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLookupResponse {
    pub queue: String,
    pub job_id: String,
    pub state: JobStateInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobInfo>,
}
