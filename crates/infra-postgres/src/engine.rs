// PostgreSQL QueueEngine Implementation

use crate::connection::create_pool;
use crate::cron::{due_run, parse_cron, validate_timezone};
use crate::migration::{run_migrations, validate_schema_name};
use crate::store::{JobStore, NewJob};
use crate::worker::PollingWorker;
use async_trait::async_trait;
use chrono::Utc;
use queue_sdk_core::application::{shutdown_channel, ShutdownToken, ShutdownTrigger};
use queue_sdk_core::config::DatabaseConfig;
use queue_sdk_core::domain::{JobId, JobInfo, JobOptions, JobState, QueueInfo, ScheduleOptions, WorkerId};
use queue_sdk_core::port::id_provider::UuidProvider;
use queue_sdk_core::port::{
    EngineError, EngineNotification, IdProvider, QueueEngine, WorkHandler, WorkOptions,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Tunables for the Postgres engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How often expired jobs are failed and cron schedules evaluated
    pub supervision_interval: Duration,
    /// Upper bound on waiting for loops during `stop`
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            supervision_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Background loops sharing one shutdown trigger
struct RunningLoops {
    trigger: ShutdownTrigger,
    handles: Vec<JoinHandle<()>>,
}

impl RunningLoops {
    async fn shut_down(self, timeout: Duration) {
        self.trigger.trigger();
        if tokio::time::timeout(timeout, futures::future::join_all(self.handles))
            .await
            .is_err()
        {
            warn!(timeout_ms = timeout.as_millis() as u64, "Background loops did not stop in time");
        }
    }
}

pub struct PgQueueEngine {
    config: DatabaseConfig,
    options: EngineOptions,
    ids: Arc<dyn IdProvider>,
    store: RwLock<Option<JobStore>>,
    workers: Mutex<HashMap<WorkerId, RunningLoops>>,
    supervisor: Mutex<Option<RunningLoops>>,
    notifications: broadcast::Sender<EngineNotification>,
}

impl PgQueueEngine {
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_options(config, EngineOptions::default())
    }

    pub fn with_options(config: DatabaseConfig, options: EngineOptions) -> Self {
        let (notifications, _) = broadcast::channel(256);
        Self {
            config,
            options,
            ids: Arc::new(UuidProvider),
            store: RwLock::new(None),
            workers: Mutex::new(HashMap::new()),
            supervisor: Mutex::new(None),
            notifications,
        }
    }

    pub fn is_started(&self) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn store(&self) -> Result<JobStore, EngineError> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EngineError::Unavailable("engine not started".to_string()))
    }

}

#[async_trait]
impl QueueEngine for PgQueueEngine {
    async fn start(&self) -> Result<(), EngineError> {
        if self.is_started() {
            return Ok(());
        }

        let schema = self.config.schema().to_string();
        validate_schema_name(&schema)?;

        let pool = create_pool(
            &self.config,
            self.options.max_connections,
            self.options.acquire_timeout,
        )
        .await?;
        run_migrations(&pool, &schema).await?;

        let store = JobStore::new(pool, schema.clone());
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store.clone());

        let (trigger, token) = shutdown_channel();
        let supervisor = Supervisor {
            store,
            notifications: self.notifications.clone(),
        };
        let handle = tokio::spawn(supervisor.run(self.options.supervision_interval, token));
        *self.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunningLoops {
            trigger,
            handles: vec![handle],
        });

        info!(schema = %schema, "Queue engine started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let store = self
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(store) = store else {
            return Ok(());
        };

        let mut loops: Vec<RunningLoops> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, running)| running)
            .collect();
        if let Some(supervisor) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            loops.push(supervisor);
        }

        let timeout = self.options.shutdown_timeout;
        futures::future::join_all(loops.into_iter().map(|running| running.shut_down(timeout)))
            .await;

        store.pool().close().await;
        let _ = self.notifications.send(EngineNotification::Stopped);
        info!("Queue engine stopped");
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> Result<(), EngineError> {
        self.store()?.create_queue(queue).await
    }

    async fn send(
        &self,
        queue: &str,
        data: serde_json::Value,
        options: &JobOptions,
    ) -> Result<Option<JobId>, EngineError> {
        let id = self.ids.generate_id();
        let inserted = self
            .store()?
            .insert_job(NewJob {
                id: &id,
                queue,
                data: &data,
                options,
            })
            .await?;

        if inserted.is_none() {
            debug!(queue = %queue, singleton_key = ?options.singleton_key, "Job declined by singleton key");
        }
        Ok(inserted)
    }

    async fn work(
        &self,
        queue: &str,
        options: WorkOptions,
        handler: WorkHandler,
    ) -> Result<WorkerId, EngineError> {
        let store = self.store()?;
        let worker_id = self.ids.generate_id();
        let worker = Arc::new(PollingWorker {
            id: worker_id.clone(),
            queue: queue.to_string(),
            store,
            options: options.clone(),
            handler,
            notifications: self.notifications.clone(),
        });

        let (trigger, _) = shutdown_channel();
        let handles = (0..options.team_size)
            .map(|_| tokio::spawn(Arc::clone(&worker).run(trigger.token())))
            .collect();

        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker_id.clone(), RunningLoops { trigger, handles });

        info!(
            queue = %queue,
            worker_id = %worker_id,
            team_size = options.team_size,
            polling_interval_ms = options.polling_interval.as_millis() as u64,
            "Worker polling started"
        );
        Ok(worker_id)
    }

    async fn off_work(&self, worker_id: &str) -> Result<(), EngineError> {
        let running = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(worker_id)
            .ok_or_else(|| EngineError::NotFound(format!("worker {}", worker_id)))?;

        running.shut_down(self.options.shutdown_timeout).await;
        info!(worker_id = %worker_id, "Worker polling stopped");
        Ok(())
    }

    async fn schedule(
        &self,
        queue: &str,
        cron: &str,
        data: serde_json::Value,
        options: &ScheduleOptions,
    ) -> Result<Option<String>, EngineError> {
        parse_cron(cron)?;
        let timezone = validate_timezone(options.tz.as_deref())?;

        let store = self.store()?;
        store.create_queue(queue).await?;
        store
            .upsert_schedule(queue, options.key(), cron, timezone, &data, &options.job)
            .await?;

        let schedule_id = options.schedule_id(queue);
        info!(schedule_id = %schedule_id, cron = %cron, "Schedule saved");
        Ok(Some(schedule_id))
    }

    async fn cancel(&self, queue: &str, job_id: &str) -> Result<(), EngineError> {
        if self.store()?.transition(queue, job_id, JobState::Cancelled).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "job {} in {} is missing or already finished",
                job_id, queue
            )))
        }
    }

    async fn complete(&self, queue: &str, job_id: &str) -> Result<(), EngineError> {
        if self.store()?.transition(queue, job_id, JobState::Completed).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "job {} in {} is missing or already finished",
                job_id, queue
            )))
        }
    }

    async fn get_job_by_id(
        &self,
        queue: &str,
        job_id: &str,
    ) -> Result<Option<JobInfo>, EngineError> {
        self.store()?.get_job(queue, job_id).await
    }

    async fn get_queues(&self) -> Result<Vec<QueueInfo>, EngineError> {
        self.store()?.list_queues().await
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }
}

/// Report a background loop failure to engine subscribers
pub(crate) fn notify_error(
    notifications: &broadcast::Sender<EngineNotification>,
    message: String,
) {
    // No subscribers is fine
    let _ = notifications.send(EngineNotification::Error(message));
}

/// Expires stale active jobs and fires due cron schedules
struct Supervisor {
    store: JobStore,
    notifications: broadcast::Sender<EngineNotification>,
}

impl Supervisor {
    async fn run(self, every: Duration, mut shutdown: ShutdownToken) {
        info!(interval_ms = every.as_millis() as u64, "Supervisor started");
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.supervise().await {
                        error!(error = %e, "Supervision failed");
                        notify_error(&self.notifications, format!("supervision: {}", e));
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Supervisor stopped");
    }

    async fn supervise(&self) -> Result<(), EngineError> {
        let expired = self.store.expire_jobs().await?;
        if expired > 0 {
            warn!(expired, "Expired active jobs");
        }
        self.fire_schedules().await
    }

    async fn fire_schedules(&self) -> Result<(), EngineError> {
        let now = Utc::now();

        for schedule in self.store.list_schedules().await? {
            let cron = match parse_cron(&schedule.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(queue = %schedule.name, key = %schedule.key, error = %e, "Skipping schedule with invalid cron");
                    continue;
                }
            };

            let since = schedule.last_run_on.unwrap_or(schedule.created_on);
            let Some(fired_at) = due_run(&cron, since, now) else {
                continue;
            };

            // Another process may have fired it already
            if !self
                .store
                .claim_schedule_run(&schedule.name, &schedule.key, schedule.last_run_on, fired_at)
                .await?
            {
                continue;
            }

            let id = UuidProvider.generate_id();
            let options = schedule.options.clone();
            self.store
                .insert_job(NewJob {
                    id: &id,
                    queue: &schedule.name,
                    data: &schedule.data,
                    options: &options,
                })
                .await?;
            info!(queue = %schedule.name, key = %schedule.key, job_id = %id, "Scheduled job sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_errors_reach_subscribers() {
        let (notifications, _) = broadcast::channel(4);

        // Nobody listening yet
        notify_error(&notifications, "supervision: lost connection".to_string());

        let mut events = notifications.subscribe();
        notify_error(&notifications, "worker w-1 on q: timeout".to_string());
        assert_eq!(
            events.try_recv().unwrap(),
            EngineNotification::Error("worker w-1 on q: timeout".to_string())
        );
        assert!(events.try_recv().is_err());
    }
}
