//! Demo workers registered by the daemon

use async_trait::async_trait;
use queue_sdk_core::domain::{ScheduleOptions, WorkerOptions};
use queue_sdk_core::port::HandlerError;
use queue_sdk_core::{JobHandler, QueueManager, WorkerRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const EMAIL_QUEUE: &str = "email-queue";
pub const MAINTENANCE_QUEUE: &str = "maintenance-queue";

/// Daily at 02:00 UTC
pub const DAILY_CLEANUP_CRON: &str = "0 2 * * *";
/// Sundays at 03:00 UTC
pub const WEEKLY_BACKUP_CRON: &str = "0 3 * * 0";

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EmailJob {
    Welcome { user_id: String },
    Notification { user_id: String, message: String },
}

/// Pretends to send an email
pub struct EmailHandler {
    send_delay: Duration,
}

impl EmailHandler {
    pub fn new(send_delay: Duration) -> Self {
        Self { send_delay }
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        let job: EmailJob = serde_json::from_value(payload)?;
        sleep(self.send_delay).await;

        match &job {
            EmailJob::Welcome { user_id } => {
                info!(user_id = %user_id, "Sending welcome email")
            }
            EmailJob::Notification { user_id, message } => {
                info!(user_id = %user_id, message = %message, "Sending notification email")
            }
        }
        Ok(())
    }
}

/// Runs the scheduled maintenance tasks
pub struct MaintenanceHandler {
    cleanup_duration: Duration,
    backup_duration: Duration,
}

impl MaintenanceHandler {
    pub fn new(cleanup_duration: Duration, backup_duration: Duration) -> Self {
        Self {
            cleanup_duration,
            backup_duration,
        }
    }
}

#[async_trait]
impl JobHandler for MaintenanceHandler {
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        match payload.get("type").and_then(Value::as_str) {
            Some("daily-cleanup") => {
                info!("Starting daily cleanup");
                sleep(self.cleanup_duration).await;
                info!("Daily cleanup completed");
            }
            Some("weekly-backup") => {
                info!("Starting weekly backup");
                sleep(self.backup_duration).await;
                info!("Weekly backup completed");
            }
            other => warn!(job_type = ?other, "Unknown maintenance job type"),
        }
        Ok(())
    }
}

/// Workers started once the manager is initialized
pub fn registry() -> WorkerRegistry {
    WorkerRegistry::new()
        .register(
            EMAIL_QUEUE,
            EmailHandler::new(Duration::from_secs(1)),
            WorkerOptions::default(),
        )
        .register(
            MAINTENANCE_QUEUE,
            MaintenanceHandler::new(Duration::from_secs(2), Duration::from_secs(5)),
            WorkerOptions::default(),
        )
}

/// Register the recurring maintenance jobs, one keyed schedule each.
/// Waits for initialization and returns the ids that were saved.
pub async fn schedule_maintenance(manager: &QueueManager) -> Vec<String> {
    let schedules = [
        ("daily-cleanup", DAILY_CLEANUP_CRON),
        ("weekly-backup", WEEKLY_BACKUP_CRON),
    ];

    let mut ids = Vec::with_capacity(schedules.len());
    for (kind, cron) in schedules {
        match manager
            .schedule(
                MAINTENANCE_QUEUE,
                &json!({ "type": kind }),
                cron,
                ScheduleOptions::default().with_key(kind),
            )
            .await
        {
            Ok(id) => {
                info!(schedule_id = %id, cron = %cron, "Maintenance job scheduled");
                ids.push(id);
            }
            Err(e) => error!(cron = %cron, error = %e, "Failed to schedule maintenance job"),
        }
    }
    ids
}
