// Polling worker loop

use crate::engine::notify_error;
use crate::store::JobStore;
use queue_sdk_core::application::ShutdownToken;
use queue_sdk_core::domain::{Delivery, JobInfo};
use queue_sdk_core::port::{EngineError, EngineNotification, WorkHandler, WorkOptions};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Sleep after a failed poll before trying again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

pub(crate) struct PollingWorker {
    pub(crate) id: String,
    pub(crate) queue: String,
    pub(crate) store: JobStore,
    pub(crate) options: WorkOptions,
    pub(crate) handler: WorkHandler,
    pub(crate) notifications: broadcast::Sender<EngineNotification>,
}

impl PollingWorker {
    /// Run until shutdown. One instance per team member.
    pub(crate) async fn run(self: std::sync::Arc<Self>, mut shutdown: ShutdownToken) {
        info!(queue = %self.queue, worker_id = %self.id, "Polling worker started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let pause = match self.poll_once().await {
                // A full batch suggests more work is waiting
                Ok(claimed) if claimed >= self.options.team_concurrency as usize => continue,
                Ok(_) => self.options.polling_interval,
                Err(e) => {
                    error!(queue = %self.queue, worker_id = %self.id, error = %e, "Worker poll failed");
                    notify_error(
                        &self.notifications,
                        format!("worker {} on {}: {}", self.id, self.queue, e),
                    );
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => break,
            }
        }

        info!(queue = %self.queue, worker_id = %self.id, "Polling worker stopped");
    }

    /// Claim a batch and run each job. Returns how many were claimed.
    pub(crate) async fn poll_once(&self) -> Result<usize, EngineError> {
        let jobs = self
            .store
            .fetch_jobs(&self.queue, self.options.team_concurrency)
            .await?;
        let claimed = jobs.len();
        if claimed == 0 {
            return Ok(0);
        }
        debug!(queue = %self.queue, claimed, "Claimed jobs");

        let runs = jobs.into_iter().map(|job| self.run_job(job));
        for outcome in futures::future::join_all(runs).await {
            outcome?;
        }
        Ok(claimed)
    }

    async fn run_job(&self, job: JobInfo) -> Result<(), EngineError> {
        let id = job.id.clone();
        let mut delivery = Delivery::new(job.id.clone(), job.name.clone(), job.data.clone());
        if self.options.include_metadata {
            delivery.metadata = Some(job);
        }

        // Spawned so a panicking handler cannot take the loop down
        let handler = std::sync::Arc::clone(&self.handler);
        let outcome = tokio::spawn(async move { handler(vec![delivery]).await }).await;

        match outcome {
            Ok(Ok(())) => {
                if !self.store.mark_completed(&self.queue, &id).await? {
                    warn!(queue = %self.queue, job_id = %id, "Job was no longer active at completion");
                }
            }
            Ok(Err(e)) => {
                self.store
                    .mark_failed(&self.queue, &id, &e.to_string())
                    .await?;
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    format!("handler task aborted: {}", join_error)
                };
                error!(queue = %self.queue, job_id = %id, reason = %reason, "Job handler crashed");
                self.store.mark_failed(&self.queue, &id, &reason).await?;
            }
        }
        Ok(())
    }
}
