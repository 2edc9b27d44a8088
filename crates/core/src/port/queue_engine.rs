// Queue Engine Port (Interface)
//
// The durable engine owns persistence, delivery, retries and cron firing.
// The manager only talks to it through this trait.

use crate::config::QueueDefaults;
use crate::domain::{
    Delivery, JobId, JobInfo, JobOptions, QueueInfo, ScheduleOptions, WorkerId, WorkerOptions,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default polling interval when neither the worker nor the config set one
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Error type a work handler reports back to the engine
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Callback the engine invokes with each fetched batch.
/// `Ok` completes every job in the batch, `Err` fails them.
pub type WorkHandler =
    Arc<dyn Fn(Vec<Delivery>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Out-of-band signals from a running engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    Error(String),
    Stopped,
}

/// Fully resolved polling options handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOptions {
    pub include_metadata: bool,
    pub polling_interval: Duration,
    pub team_size: u32,
    pub team_concurrency: u32,
}

impl Default for WorkOptions {
    fn default() -> Self {
        Self {
            include_metadata: false,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            team_size: 1,
            team_concurrency: 1,
        }
    }
}

impl WorkOptions {
    /// Call-site options win over configured queue defaults.
    pub fn resolve(options: &WorkerOptions, defaults: Option<&QueueDefaults>) -> Self {
        let fallback = Self::default();
        let interval_ms = options
            .new_job_check_interval
            .or_else(|| defaults.and_then(|d| d.interval));

        Self {
            include_metadata: options
                .include_metadata
                .or_else(|| defaults.and_then(|d| d.include_metadata))
                .unwrap_or(fallback.include_metadata),
            polling_interval: interval_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.polling_interval),
            team_size: options
                .team_size
                .or_else(|| defaults.and_then(|d| d.team_size))
                .unwrap_or(fallback.team_size)
                .max(1),
            team_concurrency: options
                .team_concurrency
                .or_else(|| defaults.and_then(|d| d.team_concurrency))
                .unwrap_or(fallback.team_concurrency)
                .max(1),
        }
    }
}

/// Durable queue engine
#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Connect, prepare storage and start background maintenance
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop polling loops and release connections
    async fn stop(&self) -> Result<(), EngineError>;

    /// Create a queue if it does not exist yet
    async fn create_queue(&self, queue: &str) -> Result<(), EngineError>;

    /// Enqueue a job. `None` means the engine declined (e.g. singleton conflict).
    async fn send(
        &self,
        queue: &str,
        data: serde_json::Value,
        options: &JobOptions,
    ) -> Result<Option<JobId>, EngineError>;

    /// Start polling `queue`, invoking `handler` with each batch
    async fn work(
        &self,
        queue: &str,
        options: WorkOptions,
        handler: WorkHandler,
    ) -> Result<WorkerId, EngineError>;

    /// Stop a polling worker
    async fn off_work(&self, worker_id: &str) -> Result<(), EngineError>;

    /// Register a cron schedule. Returns the schedule identifier, if any.
    async fn schedule(
        &self,
        queue: &str,
        cron: &str,
        data: serde_json::Value,
        options: &ScheduleOptions,
    ) -> Result<Option<String>, EngineError>;

    async fn cancel(&self, queue: &str, job_id: &str) -> Result<(), EngineError>;

    async fn complete(&self, queue: &str, job_id: &str) -> Result<(), EngineError>;

    async fn get_job_by_id(
        &self,
        queue: &str,
        job_id: &str,
    ) -> Result<Option<JobInfo>, EngineError>;

    async fn get_queues(&self) -> Result<Vec<QueueInfo>, EngineError>;

    /// Subscribe to engine notifications
    fn subscribe(&self) -> broadcast::Receiver<EngineNotification>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobState;
    use crate::port::id_provider::{IdProvider, SequentialIdProvider};
    use crate::sync::lock;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Failures the in-memory engine can be told to produce
    #[derive(Debug, Clone, Default)]
    pub struct Faults {
        pub start_error: Option<String>,
        pub send_error: Option<String>,
        pub send_declines: bool,
        pub work_error: Option<String>,
        pub schedule_error: Option<String>,
        pub schedule_declines: bool,
        pub control_error: Option<String>,
        pub lookup_error: Option<String>,
        pub queues_error: Option<String>,
    }

    /// Schedule registered through `QueueEngine::schedule`
    #[derive(Debug, Clone)]
    pub struct RecordedSchedule {
        pub queue: String,
        pub cron: String,
        pub data: serde_json::Value,
        pub options: ScheduleOptions,
    }

    struct RegisteredWorker {
        id: WorkerId,
        queue: String,
        options: WorkOptions,
        handler: WorkHandler,
    }

    #[derive(Default)]
    struct EngineState {
        started: bool,
        queues: BTreeMap<String, chrono::DateTime<Utc>>,
        jobs: Vec<JobInfo>,
        workers: Vec<RegisteredWorker>,
        schedules: Vec<RecordedSchedule>,
    }

    /// In-memory engine. Nothing is delivered until a test calls
    /// `deliver_next` or `deliver`, so handler timing is deterministic.
    pub struct InMemoryEngine {
        job_ids: SequentialIdProvider,
        worker_ids: SequentialIdProvider,
        state: Mutex<EngineState>,
        faults: Mutex<Faults>,
        start_delay: Duration,
        start_calls: Mutex<usize>,
        notifications: broadcast::Sender<EngineNotification>,
    }

    impl Default for InMemoryEngine {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryEngine {
        pub fn new() -> Self {
            let (notifications, _) = broadcast::channel(64);
            Self {
                job_ids: SequentialIdProvider::new("job"),
                worker_ids: SequentialIdProvider::new("worker"),
                state: Mutex::new(EngineState::default()),
                faults: Mutex::new(Faults::default()),
                start_delay: Duration::ZERO,
                start_calls: Mutex::new(0),
                notifications,
            }
        }

        /// Make `start` take a while, like a real connection handshake
        pub fn with_start_delay(mut self, delay: Duration) -> Self {
            self.start_delay = delay;
            self
        }

        pub fn failing_start(self, message: impl Into<String>) -> Self {
            self.inject(|f| f.start_error = Some(message.into()));
            self
        }

        /// Adjust the fault set
        pub fn inject(&self, configure: impl FnOnce(&mut Faults)) {
            configure(&mut lock(&self.faults));
        }

        pub fn clear_faults(&self) {
            *lock(&self.faults) = Faults::default();
        }

        /// Push a notification as if the engine raised it
        pub fn emit(&self, notification: EngineNotification) {
            let _ = self.notifications.send(notification);
        }

        pub fn is_started(&self) -> bool {
            lock(&self.state).started
        }

        pub fn start_calls(&self) -> usize {
            *lock(&self.start_calls)
        }

        pub fn job(&self, job_id: &str) -> Option<JobInfo> {
            lock(&self.state).jobs.iter().find(|j| j.id == job_id).cloned()
        }

        pub fn jobs_in(&self, queue: &str) -> Vec<JobInfo> {
            lock(&self.state)
                .jobs
                .iter()
                .filter(|j| j.name == queue)
                .cloned()
                .collect()
        }

        pub fn worker_ids(&self) -> Vec<WorkerId> {
            lock(&self.state).workers.iter().map(|w| w.id.clone()).collect()
        }

        pub fn worker_options(&self, worker_id: &str) -> Option<WorkOptions> {
            lock(&self.state)
                .workers
                .iter()
                .find(|w| w.id == worker_id)
                .map(|w| w.options.clone())
        }

        pub fn schedules(&self) -> Vec<RecordedSchedule> {
            lock(&self.state).schedules.clone()
        }

        fn handler_for(&self, queue: &str) -> Option<(WorkHandler, bool)> {
            lock(&self.state)
                .workers
                .iter()
                .rev()
                .find(|w| w.queue == queue)
                .map(|w| (Arc::clone(&w.handler), w.options.include_metadata))
        }

        /// Fetch the oldest waiting job of `queue` and hand it to the worker.
        /// Returns `None` when there is no waiting job or no worker.
        pub async fn deliver_next(&self, queue: &str) -> Option<Result<(), HandlerError>> {
            let (handler, include_metadata) = self.handler_for(queue)?;

            let delivery = {
                let mut state = lock(&self.state);
                let job = state.jobs.iter_mut().find(|j| {
                    j.name == queue && matches!(j.state, JobState::Created | JobState::Retry)
                })?;
                job.state = JobState::Active;
                job.started_on = Some(Utc::now());

                let mut delivery = Delivery::new(job.id.clone(), job.name.clone(), job.data.clone());
                if include_metadata {
                    delivery.metadata = Some(job.clone());
                }
                delivery
            };

            let job_id = delivery.id.clone();
            let outcome = handler(vec![delivery]).await;

            let mut state = lock(&self.state);
            if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
                match &outcome {
                    Ok(()) => {
                        job.state = JobState::Completed;
                        job.completed_on = Some(Utc::now());
                    }
                    Err(e) if job.retry_count < job.retry_limit => {
                        job.retry_count += 1;
                        job.state = JobState::Retry;
                        job.output = Some(serde_json::json!({ "message": e.to_string() }));
                    }
                    Err(e) => {
                        job.state = JobState::Failed;
                        job.completed_on = Some(Utc::now());
                        job.output = Some(serde_json::json!({ "message": e.to_string() }));
                    }
                }
            }
            Some(outcome)
        }

        /// Deliver until the queue has nothing waiting. Returns the number of deliveries.
        pub async fn drain(&self, queue: &str) -> usize {
            let mut delivered = 0;
            while self.deliver_next(queue).await.is_some() {
                delivered += 1;
            }
            delivered
        }

        /// Hand an arbitrary batch to the worker of `queue`, bypassing storage
        pub async fn deliver(
            &self,
            queue: &str,
            batch: Vec<Delivery>,
        ) -> Option<Result<(), HandlerError>> {
            let (handler, _) = self.handler_for(queue)?;
            Some(handler(batch).await)
        }

        fn ensure_started(&self) -> Result<(), EngineError> {
            if lock(&self.state).started {
                Ok(())
            } else {
                Err(EngineError::Unavailable("engine not started".to_string()))
            }
        }

        fn transition(
            &self,
            queue: &str,
            job_id: &str,
            target: JobState,
        ) -> Result<(), EngineError> {
            self.ensure_started()?;
            if let Some(message) = lock(&self.faults).control_error.clone() {
                return Err(EngineError::Database(message));
            }

            let mut state = lock(&self.state);
            let job = state
                .jobs
                .iter_mut()
                .find(|j| j.id == job_id && j.name == queue && !j.state.is_terminal())
                .ok_or_else(|| EngineError::NotFound(format!("job {} in {}", job_id, queue)))?;
            job.state = target;
            job.completed_on = Some(Utc::now());
            Ok(())
        }
    }

    #[async_trait]
    impl QueueEngine for InMemoryEngine {
        async fn start(&self) -> Result<(), EngineError> {
            *lock(&self.start_calls) += 1;
            if !self.start_delay.is_zero() {
                tokio::time::sleep(self.start_delay).await;
            }
            if let Some(message) = lock(&self.faults).start_error.clone() {
                return Err(EngineError::Unavailable(message));
            }
            lock(&self.state).started = true;
            Ok(())
        }

        async fn stop(&self) -> Result<(), EngineError> {
            {
                let mut state = lock(&self.state);
                state.started = false;
                state.workers.clear();
            }
            self.emit(EngineNotification::Stopped);
            Ok(())
        }

        async fn create_queue(&self, queue: &str) -> Result<(), EngineError> {
            self.ensure_started()?;
            lock(&self.state)
                .queues
                .entry(queue.to_string())
                .or_insert_with(Utc::now);
            Ok(())
        }

        async fn send(
            &self,
            queue: &str,
            data: serde_json::Value,
            options: &JobOptions,
        ) -> Result<Option<JobId>, EngineError> {
            self.ensure_started()?;
            {
                let faults = lock(&self.faults);
                if let Some(message) = faults.send_error.clone() {
                    return Err(EngineError::Database(message));
                }
                if faults.send_declines {
                    return Ok(None);
                }
            }

            let mut state = lock(&self.state);
            if let Some(key) = &options.singleton_key {
                let taken = state.jobs.iter().any(|j| {
                    j.name == queue
                        && j.singleton_key.as_deref() == Some(key.as_str())
                        && !j.state.is_terminal()
                });
                if taken {
                    return Ok(None);
                }
            }

            state
                .queues
                .entry(queue.to_string())
                .or_insert_with(Utc::now);

            let id = self.job_ids.generate_id();
            state.jobs.push(JobInfo {
                id: id.clone(),
                name: queue.to_string(),
                data,
                state: JobState::Created,
                priority: options.priority.unwrap_or(0),
                retry_limit: options.retry_limit.unwrap_or(0),
                retry_count: 0,
                retry_delay_ms: options.retry_delay.unwrap_or(0),
                retry_backoff: options.retry_backoff.unwrap_or(false),
                singleton_key: options.singleton_key.clone(),
                created_on: Utc::now(),
                started_on: None,
                completed_on: None,
                output: None,
            });
            Ok(Some(id))
        }

        async fn work(
            &self,
            queue: &str,
            options: WorkOptions,
            handler: WorkHandler,
        ) -> Result<WorkerId, EngineError> {
            self.ensure_started()?;
            if let Some(message) = lock(&self.faults).work_error.clone() {
                return Err(EngineError::Database(message));
            }

            let id = self.worker_ids.generate_id();
            lock(&self.state).workers.push(RegisteredWorker {
                id: id.clone(),
                queue: queue.to_string(),
                options,
                handler,
            });
            Ok(id)
        }

        async fn off_work(&self, worker_id: &str) -> Result<(), EngineError> {
            let mut state = lock(&self.state);
            let before = state.workers.len();
            state.workers.retain(|w| w.id != worker_id);
            if state.workers.len() == before {
                return Err(EngineError::NotFound(format!("worker {}", worker_id)));
            }
            Ok(())
        }

        async fn schedule(
            &self,
            queue: &str,
            cron: &str,
            data: serde_json::Value,
            options: &ScheduleOptions,
        ) -> Result<Option<String>, EngineError> {
            self.ensure_started()?;
            {
                let faults = lock(&self.faults);
                if let Some(message) = faults.schedule_error.clone() {
                    return Err(EngineError::Database(message));
                }
                if faults.schedule_declines {
                    return Ok(None);
                }
            }
            if cron.split_whitespace().count() < 5 {
                return Err(EngineError::InvalidCron {
                    expression: cron.to_string(),
                    reason: "expected at least 5 fields".to_string(),
                });
            }

            let mut state = lock(&self.state);
            state
                .schedules
                .retain(|s| s.queue != queue || s.options.key() != options.key());
            state.schedules.push(RecordedSchedule {
                queue: queue.to_string(),
                cron: cron.to_string(),
                data,
                options: options.clone(),
            });
            Ok(Some(options.schedule_id(queue)))
        }

        async fn cancel(&self, queue: &str, job_id: &str) -> Result<(), EngineError> {
            self.transition(queue, job_id, JobState::Cancelled)
        }

        async fn complete(&self, queue: &str, job_id: &str) -> Result<(), EngineError> {
            self.transition(queue, job_id, JobState::Completed)
        }

        async fn get_job_by_id(
            &self,
            queue: &str,
            job_id: &str,
        ) -> Result<Option<JobInfo>, EngineError> {
            self.ensure_started()?;
            if let Some(message) = lock(&self.faults).lookup_error.clone() {
                return Err(EngineError::Database(message));
            }
            Ok(self.job(job_id).filter(|job| job.name == queue))
        }

        async fn get_queues(&self) -> Result<Vec<QueueInfo>, EngineError> {
            self.ensure_started()?;
            if let Some(message) = lock(&self.faults).queues_error.clone() {
                return Err(EngineError::Database(message));
            }

            let state = lock(&self.state);
            let queues = state
                .queues
                .iter()
                .map(|(name, created_on)| {
                    let jobs = state.jobs.iter().filter(|j| &j.name == name);
                    let mut info = QueueInfo::named(name.clone());
                    info.created_on = Some(*created_on);
                    for job in jobs {
                        info.total_count += 1;
                        match job.state {
                            JobState::Created | JobState::Retry => info.queued_count += 1,
                            JobState::Active => info.active_count += 1,
                            _ => {}
                        }
                    }
                    info
                })
                .collect();
            Ok(queues)
        }

        fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
            self.notifications.subscribe()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::InMemoryEngine;
    use super::*;
    use crate::domain::JobState;
    use futures::FutureExt;

    fn ok_handler() -> WorkHandler {
        Arc::new(|_batch| async { Ok::<(), HandlerError>(()) }.boxed())
    }

    #[test]
    fn test_work_options_resolution() {
        let defaults = QueueDefaults {
            team_size: Some(4),
            interval: Some(500),
            ..Default::default()
        };
        let resolved = WorkOptions::resolve(&WorkerOptions::default().with_team_size(2), Some(&defaults));

        assert_eq!(resolved.team_size, 2);
        assert_eq!(resolved.team_concurrency, 1);
        assert_eq!(resolved.polling_interval, Duration::from_millis(500));
        assert!(!resolved.include_metadata);

        let bare = WorkOptions::resolve(&WorkerOptions::default(), None);
        assert_eq!(bare, WorkOptions::default());
    }

    #[tokio::test]
    async fn test_in_memory_engine_requires_start() {
        let engine = InMemoryEngine::new();
        let err = engine
            .send("q", serde_json::json!({}), &JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_in_memory_engine_retries_then_fails() {
        let engine = InMemoryEngine::new();
        engine.start().await.unwrap();

        let id = engine
            .send("q", serde_json::json!({"n": 1}), &JobOptions::default().with_retry(1, 0))
            .await
            .unwrap()
            .unwrap();

        let failing: WorkHandler = Arc::new(|_batch| {
            async { Err::<(), HandlerError>("boom".into()) }.boxed()
        });
        engine.work("q", WorkOptions::default(), failing).await.unwrap();

        assert_eq!(engine.drain("q").await, 2);
        let job = engine.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_in_memory_engine_singleton_declines() {
        let engine = InMemoryEngine::new();
        engine.start().await.unwrap();
        engine.work("q", WorkOptions::default(), ok_handler()).await.unwrap();

        let options = JobOptions::default().with_singleton_key("only");
        let first = engine.send("q", serde_json::json!(1), &options).await.unwrap();
        let second = engine.send("q", serde_json::json!(2), &options).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }
}
