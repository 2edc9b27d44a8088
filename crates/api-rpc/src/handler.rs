//! RPC Method Handlers

use crate::error::{job_not_found, to_rpc_error};
use crate::types::{JobLookupRequest, JobLookupResponse, QueueListResponse};
use jsonrpsee::types::ErrorObjectOwned;
use queue_sdk_core::domain::{HealthStatus, JobStateInfo, QueueMetrics};
use queue_sdk_core::QueueManager;
use std::sync::Arc;
use tracing::debug;

/// RPC Handler over a shared Queue Manager
pub struct RpcHandler {
    manager: Arc<QueueManager>,
}

impl RpcHandler {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// queue.health.v1
    pub async fn health(&self) -> HealthStatus {
        self.manager.get_health_status().await
    }

    /// queue.metrics.v1
    pub async fn metrics(&self) -> QueueMetrics {
        self.manager.get_metrics().await
    }

    /// queue.list.v1
    pub async fn queues(&self) -> Result<QueueListResponse, ErrorObjectOwned> {
        let queues = self.manager.get_queues().await.map_err(to_rpc_error)?;
        Ok(QueueListResponse { queues })
    }

    /// queue.job.v1
    pub async fn job(&self, params: JobLookupRequest) -> Result<JobLookupResponse, ErrorObjectOwned> {
        debug!(queue = %params.queue, job_id = %params.job_id, detailed = params.detailed, "Job lookup");

        let (state, job) = if params.detailed {
            let job = self
                .manager
                .get_job_info(&params.queue, &params.job_id)
                .await
                .map_err(to_rpc_error)?
                .ok_or_else(|| job_not_found(&params.queue, &params.job_id))?;
            (JobStateInfo::from(&job), Some(job))
        } else {
            let state = self
                .manager
                .get_job_state(&params.queue, &params.job_id)
                .await
                .map_err(to_rpc_error)?
                .ok_or_else(|| job_not_found(&params.queue, &params.job_id))?;
            (state, None)
        };

        Ok(JobLookupResponse {
            queue: params.queue,
            job_id: params.job_id,
            state,
            job,
        })
    }
}
