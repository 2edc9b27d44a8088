// Queue Manager - orchestration layer over the queue engine
//
// Owns the initialization sequence, worker bookkeeping, runtime metrics
// and the event bus. Durable behavior lives in the engine.

mod control;
mod init;
mod status;
mod submit;
mod worker;

pub use init::InitState;

use super::constants::SCHEMA_SETTLE_DELAY;
use super::metrics::MetricsRecorder;
use super::registry::{HandlerRegistration, WorkerRegistry};
use crate::config::{ConfigLoader, QueueSdkConfig};
use crate::domain::{EventBus, QueueEvent, WorkerId};
use crate::error::{QueueError, Result};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{EngineNotification, QueueEngine, TimeProvider};
use crate::sync::lock;
use init::InitGate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct QueueManager {
    config: QueueSdkConfig,
    engine: Arc<dyn QueueEngine>,
    time: Arc<dyn TimeProvider>,
    init: InitGate,
    initialized: AtomicBool,
    /// Registrations waiting for the engine to become ready
    pending: Mutex<Vec<HandlerRegistration>>,
    /// queue -> engine worker id
    workers: Mutex<HashMap<String, WorkerId>>,
    /// queue -> handler currently attached
    registrations: Mutex<HashMap<String, HandlerRegistration>>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    settle_delay: Duration,
}

pub struct QueueManagerBuilder {
    config: QueueSdkConfig,
    engine: Arc<dyn QueueEngine>,
    time: Arc<dyn TimeProvider>,
    registry: WorkerRegistry,
    events: EventBus,
    settle_delay: Duration,
}

impl QueueManagerBuilder {
    pub fn time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Pause between engine start and readiness (default 2s)
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Handlers attached as soon as initialization completes
    pub fn registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Validate the configuration, then start initializing in the background.
    ///
    /// Returns immediately; operations wait for initialization on their own.
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Arc<QueueManager>> {
        ConfigLoader::validate(&self.config)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::Initialization(format!("no tokio runtime: {}", e)))?;

        let manager = Arc::new(QueueManager {
            config: self.config,
            engine: self.engine,
            time: self.time,
            init: InitGate::new(),
            initialized: AtomicBool::new(false),
            pending: Mutex::new(self.registry.into_registrations()),
            workers: Mutex::new(HashMap::new()),
            registrations: Mutex::new(HashMap::new()),
            metrics: Arc::new(MetricsRecorder::new()),
            events: self.events,
            settle_delay: self.settle_delay,
        });

        // Subscribe before start so nothing the engine says during startup is lost
        let notifications = manager.engine.subscribe();
        runtime.spawn(forward_notifications(notifications, manager.events.clone()));
        runtime.spawn(Arc::clone(&manager).initialize());

        Ok(manager)
    }
}

impl QueueManager {
    pub fn builder(config: QueueSdkConfig, engine: Arc<dyn QueueEngine>) -> QueueManagerBuilder {
        QueueManagerBuilder {
            config,
            engine,
            time: Arc::new(SystemTimeProvider),
            registry: WorkerRegistry::new(),
            events: EventBus::default(),
            settle_delay: SCHEMA_SETTLE_DELAY,
        }
    }

    async fn initialize(self: Arc<Self>) {
        info!(
            host = %self.config.database.host,
            database = %self.config.database.database,
            schema = %self.config.database.schema(),
            "Initializing queue manager"
        );

        if let Err(e) = self.engine.start().await {
            let message = format!("Failed to start queue engine: {}", e);
            error!(error = %e, "Queue manager initialization failed");
            self.init.mark_failed(message.clone());
            self.events.publish(QueueEvent::Error { message });
            return;
        }

        if !self.settle_delay.is_zero() {
            debug!(delay_ms = self.settle_delay.as_millis() as u64, "Waiting for schema to settle");
            tokio::time::sleep(self.settle_delay).await;
        }

        self.initialized.store(true, Ordering::SeqCst);
        self.replay_registrations().await;
        self.init.mark_ready();
        info!("Queue manager initialized");
    }

    async fn replay_registrations(&self) {
        let pending = std::mem::take(&mut *lock(&self.pending));
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "Attaching registered workers");
        for registration in pending {
            let queue = registration.queue.clone();
            if let Err(e) = self.attach_worker(registration).await {
                error!(queue = %queue, error = %e, "Failed to attach registered worker");
                self.events.publish(QueueEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Wait until the engine is ready. Every caller sees the same failure.
    pub async fn wait_for_initialization(&self) -> Result<()> {
        self.init.wait().await
    }

    pub fn init_state(&self) -> InitState {
        self.init.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &QueueSdkConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Queues with an attached worker, sorted
    pub fn registered_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = lock(&self.workers).keys().cloned().collect();
        queues.sort();
        queues
    }

    pub fn worker_id(&self, queue: &str) -> Option<WorkerId> {
        lock(&self.workers).get(queue).cloned()
    }

    /// Stop the engine and forget every worker.
    ///
    /// A no-op before initialization completes and after a previous stop.
    pub async fn stop(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            debug!("Queue manager not initialized, nothing to stop");
            return Ok(());
        }

        info!("Stopping queue manager");
        let stopped = self.engine.stop().await;

        let workers: Vec<(String, WorkerId)> = lock(&self.workers).drain().collect();
        lock(&self.registrations).clear();
        for (queue, worker_id) in workers {
            self.events.publish(QueueEvent::WorkerStopped { worker_id, queue });
        }

        match stopped {
            Ok(()) => {
                info!("Queue manager stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Queue engine did not stop cleanly");
                Err(QueueError::Engine(e))
            }
        }
    }
}

/// Re-broadcast engine notifications on the manager's event bus
async fn forward_notifications(
    mut notifications: broadcast::Receiver<EngineNotification>,
    events: EventBus,
) {
    loop {
        match notifications.recv().await {
            Ok(EngineNotification::Error(message)) => {
                error!(error = %message, "Queue engine reported an error");
                events.publish(QueueEvent::Error { message });
            }
            Ok(EngineNotification::Stopped) => {
                info!("Queue engine stopped");
                events.publish(QueueEvent::Stopped);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Engine notifications lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::port::queue_engine::mocks::InMemoryEngine;

    pub(crate) fn test_config() -> QueueSdkConfig {
        QueueSdkConfig::new(DatabaseConfig {
            host: "localhost".to_string(),
            port: crate::config::DEFAULT_PORT,
            database: "queues".to_string(),
            user: "postgres".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        })
    }

    pub(crate) async fn ready_manager() -> (Arc<QueueManager>, Arc<InMemoryEngine>) {
        let engine = Arc::new(InMemoryEngine::new());
        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .start()
            .unwrap();
        manager.wait_for_initialization().await.unwrap();
        (manager, engine)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::port::queue_engine::mocks::InMemoryEngine;
    use crate::domain::WorkerOptions;
    use crate::port::HandlerError;

    async fn noop(_payload: serde_json::Value) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_up_front() {
        let engine = Arc::new(InMemoryEngine::new());
        let mut config = test_config();
        config.database.host.clear();

        let result = QueueManager::builder(config, engine.clone()).start();
        assert!(matches!(result, Err(QueueError::Config(_))));
        assert_eq!(engine.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_initializes_once_in_background() {
        let engine = Arc::new(InMemoryEngine::new().with_start_delay(Duration::from_millis(20)));
        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .start()
            .unwrap();

        assert!(!manager.is_initialized());
        assert_eq!(manager.init_state(), InitState::Pending);

        let (a, b) = tokio::join!(
            manager.wait_for_initialization(),
            manager.wait_for_initialization()
        );
        assert!(a.is_ok() && b.is_ok());
        assert!(manager.is_initialized());
        assert_eq!(engine.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_settle_delay_precedes_readiness() {
        tokio::time::pause();
        let engine = Arc::new(InMemoryEngine::new());
        let manager = QueueManager::builder(test_config(), engine.clone())
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(engine.is_started());
        assert_eq!(manager.init_state(), InitState::Pending);

        manager.wait_for_initialization().await.unwrap();
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_start_failure_is_shared() {
        let engine = Arc::new(InMemoryEngine::new().failing_start("connection refused"));
        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .start()
            .unwrap();

        for _ in 0..2 {
            match manager.wait_for_initialization().await {
                Err(QueueError::Initialization(message)) => {
                    assert!(message.contains("connection refused"))
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(engine.start_calls(), 1);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_registry_attached_after_initialization() {
        let engine = Arc::new(InMemoryEngine::new());
        let registry = WorkerRegistry::new()
            .register("email-queue", noop, WorkerOptions::default())
            .register("maintenance-queue", noop, WorkerOptions::default());

        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .registry(registry)
            .start()
            .unwrap();
        manager.wait_for_initialization().await.unwrap();

        assert_eq!(
            manager.registered_queues(),
            vec!["email-queue".to_string(), "maintenance-queue".to_string()]
        );
        assert_eq!(engine.worker_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_replay_does_not_fail_initialization() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.inject(|f| f.work_error = Some("no slots".to_string()));
        let registry = WorkerRegistry::new().register("email-queue", noop, WorkerOptions::default());

        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .registry(registry)
            .start()
            .unwrap();
        let mut events = manager.subscribe();

        manager.wait_for_initialization().await.unwrap();
        assert!(manager.registered_queues().is_empty());

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, QueueEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_stop_before_initialization_is_noop() {
        let engine = Arc::new(InMemoryEngine::new().with_start_delay(Duration::from_millis(50)));
        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .start()
            .unwrap();

        assert!(manager.stop().await.is_ok());
        manager.wait_for_initialization().await.unwrap();
        assert!(engine.is_started());
    }

    #[tokio::test]
    async fn test_stop_emits_worker_stopped_and_engine_stopped() {
        let (manager, engine) = ready_manager().await;
        let worker_id = manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
            .unwrap();
        let mut events = manager.subscribe();

        manager.stop().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert!(seen.contains(&QueueEvent::WorkerStopped {
            worker_id,
            queue: "email-queue".to_string(),
        }));
        assert!(seen.contains(&QueueEvent::Stopped));
        assert!(!manager.is_initialized());
        assert!(manager.registered_queues().is_empty());
        assert!(!engine.is_started());

        // Second stop does nothing
        assert!(manager.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_engine_errors_are_rebroadcast() {
        let (manager, engine) = ready_manager().await;
        let mut events = manager.subscribe();

        engine.emit(EngineNotification::Error("maintenance failed".to_string()));

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            QueueEvent::Error {
                message: "maintenance failed".to_string()
            }
        );
    }
}
