// Job control and lookups

use super::QueueManager;
use crate::domain::{JobInfo, JobStateInfo, QueueInfo};
use crate::error::{QueueError, Result};
use tracing::{error, info};

impl QueueManager {
    /// Cancel a job. `false` when the engine refused or is unavailable.
    pub async fn cancel_job(&self, queue: &str, job_id: &str) -> bool {
        if let Err(e) = self.wait_for_initialization().await {
            error!(queue = %queue, job_id = %job_id, error = %e, "Failed to cancel job");
            return false;
        }

        match self.engine.cancel(queue, job_id).await {
            Ok(()) => {
                info!(queue = %queue, job_id = %job_id, "Job cancelled");
                true
            }
            Err(e) => {
                error!(queue = %queue, job_id = %job_id, error = %e, "Failed to cancel job");
                false
            }
        }
    }

    /// Mark a job completed out of band
    pub async fn complete_job(&self, queue: &str, job_id: &str) -> bool {
        if let Err(e) = self.wait_for_initialization().await {
            error!(queue = %queue, job_id = %job_id, error = %e, "Failed to complete job");
            return false;
        }

        match self.engine.complete(queue, job_id).await {
            Ok(()) => {
                info!(queue = %queue, job_id = %job_id, "Job completed manually");
                true
            }
            Err(e) => {
                error!(queue = %queue, job_id = %job_id, error = %e, "Failed to complete job");
                false
            }
        }
    }

    /// Full job record. `Ok(None)` when the job does not exist.
    pub async fn get_job_info(&self, queue: &str, job_id: &str) -> Result<Option<JobInfo>> {
        self.wait_for_initialization().await?;

        self.engine
            .get_job_by_id(queue, job_id)
            .await
            .map_err(|e| {
                error!(queue = %queue, job_id = %job_id, error = %e, "Failed to get job info");
                QueueError::Lookup {
                    job_id: job_id.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    /// State and timestamps only
    pub async fn get_job_state(&self, queue: &str, job_id: &str) -> Result<Option<JobStateInfo>> {
        let info = self.get_job_info(queue, job_id).await?;
        Ok(info.as_ref().map(JobStateInfo::from))
    }

    pub async fn get_queues(&self) -> Result<Vec<QueueInfo>> {
        self.wait_for_initialization().await?;

        self.engine.get_queues().await.map_err(|e| {
            error!(error = %e, "Failed to get queues");
            QueueError::Engine(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::domain::{JobOptions, JobState};
    use crate::error::QueueError;
    use serde_json::json;

    #[tokio::test]
    async fn test_cancel_and_complete() {
        let (manager, engine) = ready_manager().await;
        let first = manager
            .add_job("email-queue", &json!({}), JobOptions::default())
            .await
            .unwrap();
        let second = manager
            .add_job("email-queue", &json!({}), JobOptions::default())
            .await
            .unwrap();

        assert!(manager.cancel_job("email-queue", &first).await);
        assert_eq!(engine.job(&first).unwrap().state, JobState::Cancelled);
        // Already cancelled
        assert!(!manager.cancel_job("email-queue", &first).await);

        assert!(manager.complete_job("email-queue", &second).await);
        assert_eq!(engine.job(&second).unwrap().state, JobState::Completed);

        assert!(!manager.cancel_job("email-queue", "missing").await);
    }

    #[tokio::test]
    async fn test_control_engine_errors_return_false() {
        let (manager, engine) = ready_manager().await;
        let id = manager
            .add_job("q", &json!({}), JobOptions::default())
            .await
            .unwrap();
        engine.inject(|f| f.control_error = Some("connection reset".to_string()));

        assert!(!manager.cancel_job("q", &id).await);
        assert!(!manager.complete_job("q", &id).await);
    }

    #[tokio::test]
    async fn test_job_lookups() {
        let (manager, _engine) = ready_manager().await;
        let id = manager
            .add_job("email-queue", &json!({"to": "a@b.c"}), JobOptions::default())
            .await
            .unwrap();

        let info = manager
            .get_job_info("email-queue", &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.data, json!({"to": "a@b.c"}));

        let state = manager
            .get_job_state("email-queue", &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, Some(JobState::Created));
        assert!(state.started_on.is_none());

        assert!(manager
            .get_job_state("email-queue", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_distinct_from_not_found() {
        let (manager, engine) = ready_manager().await;
        engine.inject(|f| f.lookup_error = Some("timeout".to_string()));

        match manager.get_job_state("q", "job-1").await {
            Err(QueueError::Lookup { job_id, reason }) => {
                assert_eq!(job_id, "job-1");
                assert!(reason.contains("timeout"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_queues_lists_engine_queues() {
        let (manager, engine) = ready_manager().await;
        manager
            .add_job("email-queue", &json!({}), JobOptions::default())
            .await
            .unwrap();

        let queues = manager.get_queues().await.unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "email-queue");
        assert_eq!(queues[0].queued_count, 1);

        engine.inject(|f| f.queues_error = Some("boom".to_string()));
        assert!(matches!(
            manager.get_queues().await,
            Err(QueueError::Engine(_))
        ));
    }
}
