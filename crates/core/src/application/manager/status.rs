// Metrics and health reporting

use super::QueueManager;
use crate::domain::{HealthStatus, QueueMetrics};
use crate::error::QueueError;
use crate::sync::lock;
use tracing::{error, warn};

impl QueueManager {
    /// Snapshot of the runtime counters. Never fails.
    pub async fn get_metrics(&self) -> QueueMetrics {
        if let Err(e) = self.wait_for_initialization().await {
            warn!(error = %e, "Reporting metrics without an initialized engine");
        }
        self.metrics.snapshot(self.time.now_millis())
    }

    /// Aggregate health verdict. The engine is only queried while the
    /// manager is initialized.
    pub async fn get_health_status(&self) -> HealthStatus {
        let init_failure = self.wait_for_initialization().await.err();
        let now = self.time.now();
        let error_rate = self.metrics.error_rate();
        let worker_count = lock(&self.workers).len();

        if let Some(e) = init_failure {
            let reason = match e {
                QueueError::Initialization(message) => message,
                other => other.to_string(),
            };
            return HealthStatus::evaluate(false, Some(reason), error_rate, &[], worker_count, now);
        }
        if !self.is_initialized() {
            return HealthStatus::evaluate(false, None, error_rate, &[], worker_count, now);
        }

        match self.engine.get_queues().await {
            Ok(queues) => HealthStatus::evaluate(true, None, error_rate, &queues, worker_count, now),
            Err(e) => {
                error!(error = %e, "Health check failed");
                HealthStatus::failed(e.to_string(), now)
            }
        }
    }
}
