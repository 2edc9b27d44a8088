// Periodic health check
// Logs the manager's health verdict on a fixed interval

use super::manager::QueueManager;
use super::shutdown::ShutdownToken;
use crate::domain::{HealthState, HealthStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Health monitor
///
/// Runs `get_health_status` every `interval` in the background
pub struct HealthMonitor {
    manager: Arc<QueueManager>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(manager: Arc<QueueManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Monitor configured by `monitoring`, if enabled
    pub fn from_config(manager: Arc<QueueManager>) -> Option<Self> {
        let monitoring = manager.config().monitoring.as_ref()?;
        if !monitoring.enabled {
            return None;
        }
        let interval = Duration::from_millis(monitoring.health_check_interval_ms());
        Some(Self::new(manager, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `shutdown` fires. Should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Health monitor started"
        );

        let mut tick = interval(self.interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.check_now().await;
                }
                _ = shutdown.wait() => {
                    info!("Health monitor stopped");
                    break;
                }
            }
        }
    }

    /// Evaluate and log health once
    pub async fn check_now(&self) -> HealthStatus {
        let health = self.manager.get_health_status().await;
        match health.status {
            HealthState::Healthy => info!(
                queues = health.queues.active,
                workers = health.workers.active,
                "Queue health check: healthy"
            ),
            HealthState::Degraded => warn!(
                queues = health.queues.active,
                workers = health.workers.active,
                "Queue health check: degraded"
            ),
            HealthState::Unhealthy => error!(
                database_error = health.database.error.as_deref().unwrap_or("unknown"),
                "Queue health check: unhealthy"
            ),
        }
        health
    }
}
