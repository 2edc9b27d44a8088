// Queue metrics snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time copy of the process-wide queue counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub pending_jobs: u64,
    pub processing_jobs: u64,
    /// Running mean in milliseconds
    pub average_processing_time: f64,
    /// Jobs submitted by this process and not yet completed, per queue
    pub queue_size: BTreeMap<String, u64>,
    /// failed / (completed + failed), 0 when nothing finished yet
    pub error_rate: f64,
    /// Completed jobs per second over the last minute
    pub throughput: f64,
}

impl QueueMetrics {
    pub fn queue_size_of(&self, queue: &str) -> u64 {
        self.queue_size.get(queue).copied().unwrap_or(0)
    }
}
