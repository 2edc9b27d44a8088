// Job submission and cron scheduling

use super::QueueManager;
use crate::domain::{validate_queue_name, JobId, JobOptions, ScheduleOptions};
use crate::error::{QueueError, Result};
use serde::Serialize;
use tracing::{error, info};

impl QueueManager {
    /// Enqueue `payload` on `queue`. Unset retry options fall back to the
    /// configured queue defaults, then to 3 retries every 5000 ms.
    pub async fn add_job<T>(&self, queue: &str, payload: &T, options: JobOptions) -> Result<JobId>
    where
        T: Serialize + ?Sized,
    {
        validate_queue_name(queue).map_err(|e| {
            error!(error = %e, "Rejected job submission");
            QueueError::Validation(e.to_string())
        })?;
        self.wait_for_initialization().await?;

        let data = serde_json::to_value(payload).map_err(|e| {
            error!(queue = %queue, error = %e, "Job payload is not serializable");
            QueueError::Serialization(e)
        })?;
        let options = options.merged_with(self.config.queue_defaults());

        if let Err(e) = self.engine.create_queue(queue).await {
            return Err(submission_failed(queue, e.to_string()));
        }

        match self.engine.send(queue, data, &options).await {
            Ok(Some(job_id)) if !job_id.is_empty() => {
                self.metrics.record_submitted(queue);
                info!(queue = %queue, job_id = %job_id, "Job added");
                Ok(job_id)
            }
            Ok(_) => Err(submission_failed(queue, "engine returned no job id".to_string())),
            Err(e) => Err(submission_failed(queue, e.to_string())),
        }
    }

    /// Register a recurring job. Firing is owned by the engine.
    pub async fn schedule<T>(
        &self,
        queue: &str,
        payload: &T,
        cron: &str,
        options: ScheduleOptions,
    ) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        validate_queue_name(queue).map_err(|e| {
            error!(error = %e, "Rejected schedule");
            QueueError::Validation(e.to_string())
        })?;
        self.wait_for_initialization().await?;

        let data = serde_json::to_value(payload).map_err(|e| {
            error!(queue = %queue, error = %e, "Schedule payload is not serializable");
            QueueError::Serialization(e)
        })?;

        if let Err(e) = self.engine.create_queue(queue).await {
            return Err(schedule_failed(queue, e.to_string()));
        }

        match self.engine.schedule(queue, cron, data, &options).await {
            Ok(Some(schedule_id)) if !schedule_id.is_empty() => {
                info!(queue = %queue, cron = %cron, "Job scheduled");
                Ok(schedule_id)
            }
            Ok(_) => Err(schedule_failed(queue, "engine returned no schedule id".to_string())),
            Err(e) => Err(schedule_failed(queue, e.to_string())),
        }
    }
}

fn submission_failed(queue: &str, reason: String) -> QueueError {
    error!(queue = %queue, reason = %reason, "Failed to add job");
    QueueError::Submission {
        queue: queue.to_string(),
        reason,
    }
}

fn schedule_failed(queue: &str, reason: String) -> QueueError {
    error!(queue = %queue, reason = %reason, "Failed to schedule job");
    QueueError::Schedule {
        queue: queue.to_string(),
        reason,
    }
}
