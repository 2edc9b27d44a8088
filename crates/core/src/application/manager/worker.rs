// Worker registration and handler instrumentation

use super::QueueManager;
use crate::application::handler::JobHandler;
use crate::application::metrics::MetricsRecorder;
use crate::application::panic_guard::panic_message;
use crate::application::registry::HandlerRegistration;
use crate::domain::{validate_queue_name, Delivery, EventBus, QueueEvent, WorkerId, WorkerOptions};
use crate::error::{QueueError, Result};
use crate::port::{EngineError, HandlerError, TimeProvider, WorkHandler, WorkOptions};
use crate::sync::lock;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl QueueManager {
    /// Attach `handler` to `queue`. A second registration for the same
    /// queue replaces the first one.
    pub async fn register_worker<H: JobHandler>(
        &self,
        queue: &str,
        handler: H,
        options: WorkerOptions,
    ) -> Result<WorkerId> {
        validate_queue_name(queue).map_err(|e| {
            error!(error = %e, "Rejected worker registration");
            QueueError::Validation(e.to_string())
        })?;
        self.wait_for_initialization().await?;

        self.attach_worker(HandlerRegistration::new(queue, Arc::new(handler), options))
            .await
    }

    pub(super) async fn attach_worker(&self, registration: HandlerRegistration) -> Result<WorkerId> {
        let queue = registration.queue.clone();

        self.engine
            .create_queue(&queue)
            .await
            .map_err(|e| registration_failed(&queue, e))?;

        let options = WorkOptions::resolve(&registration.options, self.config.queue_defaults());
        let handler = self.instrument(&queue, Arc::clone(&registration.handler));

        let worker_id = self
            .engine
            .work(&queue, options.clone(), handler)
            .await
            .map_err(|e| registration_failed(&queue, e))?;

        let previous = {
            let mut workers = lock(&self.workers);
            lock(&self.registrations).insert(queue.clone(), registration);
            workers.insert(queue.clone(), worker_id.clone())
        };

        if let Some(old_worker_id) = previous {
            warn!(
                queue = %queue,
                old_worker_id = %old_worker_id,
                worker_id = %worker_id,
                "Worker already registered for queue, replacing it"
            );
            if let Err(e) = self.engine.off_work(&old_worker_id).await {
                warn!(worker_id = %old_worker_id, error = %e, "Failed to detach replaced worker");
            }
            self.events.publish(QueueEvent::WorkerStopped {
                worker_id: old_worker_id,
                queue: queue.clone(),
            });
        }

        info!(
            queue = %queue,
            worker_id = %worker_id,
            team_size = options.team_size,
            team_concurrency = options.team_concurrency,
            "Worker registered"
        );
        self.events.publish(QueueEvent::WorkerStarted {
            worker_id: worker_id.clone(),
            queue,
        });

        Ok(worker_id)
    }

    /// Wrap a user handler with bookkeeping, events and panic isolation
    fn instrument(&self, queue: &str, handler: Arc<dyn JobHandler>) -> WorkHandler {
        let context = Arc::new(InstrumentedHandler {
            queue: queue.to_string(),
            handler,
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
            time: Arc::clone(&self.time),
        });

        Arc::new(move |batch: Vec<Delivery>| {
            let context = Arc::clone(&context);
            async move { context.process(batch).await }.boxed()
        })
    }
}

fn registration_failed(queue: &str, e: EngineError) -> QueueError {
    error!(queue = %queue, error = %e, "Failed to register worker");
    QueueError::Registration {
        queue: queue.to_string(),
        reason: e.to_string(),
    }
}

struct InstrumentedHandler {
    queue: String,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    time: Arc<dyn TimeProvider>,
}

impl InstrumentedHandler {
    /// Only the first delivery of a batch is processed
    async fn process(&self, batch: Vec<Delivery>) -> std::result::Result<(), HandlerError> {
        let Some(delivery) = batch.into_iter().next() else {
            warn!(queue = %self.queue, "Received an empty job batch");
            return Ok(());
        };
        let Some(payload) = delivery.payload().cloned() else {
            warn!(queue = %self.queue, job_id = %delivery.id, "Job has no payload, skipping");
            return Ok(());
        };
        let job_id = delivery.id;

        self.metrics.record_started();
        let started_ms = self.time.now_millis();
        debug!(queue = %self.queue, job_id = %job_id, "Processing job");

        let outcome = AssertUnwindSafe(self.handler.handle(payload.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(queue = %self.queue, job_id = %job_id, panic_msg = %message, "Job handler panicked");
                Err(HandlerError::from(format!("handler panicked: {}", message)))
            });

        let finished_ms = self.time.now_millis();
        match outcome {
            Ok(()) => {
                let elapsed_ms = (finished_ms - started_ms).max(0) as f64;
                self.metrics
                    .record_completed(&self.queue, elapsed_ms, finished_ms);
                info!(queue = %self.queue, job_id = %job_id, elapsed_ms, "Job completed");
                self.events.publish(QueueEvent::JobCompleted {
                    job_id,
                    queue: self.queue.clone(),
                    data: payload,
                });
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed();
                error!(queue = %self.queue, job_id = %job_id, error = %e, "Job failed");
                self.events.publish(QueueEvent::JobFailed {
                    job_id,
                    queue: self.queue.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::port::time_provider::mocks::ManualClock;
    use crate::port::queue_engine::mocks::InMemoryEngine;
    use crate::domain::JobOptions;
    use serde_json::json;
    use std::time::Duration;

    async fn noop(_payload: serde_json::Value) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_registration_emits_worker_started() {
        let (manager, engine) = ready_manager().await;
        let mut events = manager.subscribe();

        let worker_id = manager
            .register_worker("email-queue", noop, WorkerOptions::default().with_metadata())
            .await
            .unwrap();

        assert_eq!(manager.worker_id("email-queue"), Some(worker_id.clone()));
        assert!(engine.worker_options(&worker_id).unwrap().include_metadata);
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::WorkerStarted {
                worker_id,
                queue: "email-queue".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_reregistration_replaces_worker() {
        let (manager, engine) = ready_manager().await;
        let first = manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
            .unwrap();
        let mut events = manager.subscribe();

        let second = manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.worker_ids(), vec![second.clone()]);
        assert_eq!(manager.registered_queues(), vec!["email-queue".to_string()]);
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::WorkerStopped {
                worker_id: first,
                queue: "email-queue".to_string(),
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            QueueEvent::WorkerStarted { .. }
        ));
    }

    #[tokio::test]
    async fn test_blank_queue_rejected() {
        let (manager, _engine) = ready_manager().await;
        let result = manager
            .register_worker("  ", noop, WorkerOptions::default())
            .await;
        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn test_engine_failure_is_registration_error() {
        let (manager, engine) = ready_manager().await;
        engine.inject(|f| f.work_error = Some("pool exhausted".to_string()));

        match manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
        {
            Err(QueueError::Registration { queue, reason }) => {
                assert_eq!(queue, "email-queue");
                assert!(reason.contains("pool exhausted"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(manager.registered_queues().is_empty());
    }

    #[tokio::test]
    async fn test_completion_updates_metrics_then_emits() {
        let clock = Arc::new(ManualClock::new(10_000));
        let engine = Arc::new(InMemoryEngine::new());
        let manager = QueueManager::builder(test_config(), engine.clone())
            .settle_delay(Duration::ZERO)
            .time_provider(clock.clone())
            .start()
            .unwrap();

        let handler_clock = Arc::clone(&clock);
        manager
            .register_worker(
                "email-queue",
                move |_payload: serde_json::Value| {
                    let clock = Arc::clone(&handler_clock);
                    async move {
                        clock.advance(250);
                        Ok::<(), HandlerError>(())
                    }
                },
                WorkerOptions::default(),
            )
            .await
            .unwrap();

        let job_id = manager
            .add_job("email-queue", &json!({"to": "a@b.c"}), JobOptions::default())
            .await
            .unwrap();
        let mut events = manager.subscribe();

        assert!(engine.deliver_next("email-queue").await.unwrap().is_ok());

        let metrics = manager.get_metrics().await;
        assert_eq!(metrics.completed_jobs, 1);
        assert_eq!(metrics.pending_jobs, 0);
        assert_eq!(metrics.processing_jobs, 0);
        assert_eq!(metrics.average_processing_time, 250.0);
        assert_eq!(metrics.queue_size_of("email-queue"), 0);

        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::JobCompleted {
                job_id,
                queue: "email-queue".to_string(),
                data: json!({"to": "a@b.c"}),
            }
        );
    }

    #[tokio::test]
    async fn test_handler_error_reaches_engine() {
        let (manager, engine) = ready_manager().await;
        manager
            .register_worker(
                "email-queue",
                |_payload: serde_json::Value| async {
                    Err::<(), HandlerError>("smtp down".into())
                },
                WorkerOptions::default(),
            )
            .await
            .unwrap();
        manager
            .add_job("email-queue", &json!({"n": 1}), JobOptions::default().with_retry(0, 0))
            .await
            .unwrap();
        let mut events = manager.subscribe();

        let outcome = engine.deliver_next("email-queue").await.unwrap();
        assert_eq!(outcome.unwrap_err().to_string(), "smtp down");

        let metrics = manager.get_metrics().await;
        assert_eq!(metrics.failed_jobs, 1);
        assert_eq!(metrics.processing_jobs, 0);
        assert_eq!(metrics.error_rate, 1.0);
        // Failed jobs stay counted in the queue size
        assert_eq!(metrics.queue_size_of("email-queue"), 1);

        match events.recv().await.unwrap() {
            QueueEvent::JobFailed { error, .. } => assert_eq!(error, "smtp down"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_counts_as_failure() {
        let (manager, engine) = ready_manager().await;
        manager
            .register_worker(
                "email-queue",
                |payload: serde_json::Value| async move {
                    if payload["explode"].as_bool() == Some(true) {
                        panic!("handler exploded");
                    }
                    Ok::<(), HandlerError>(())
                },
                WorkerOptions::default(),
            )
            .await
            .unwrap();
        manager
            .add_job("email-queue", &json!({"explode": true}), JobOptions::default())
            .await
            .unwrap();

        let outcome = engine.deliver_next("email-queue").await.unwrap();
        assert!(outcome.unwrap_err().to_string().contains("handler exploded"));

        let metrics = manager.get_metrics().await;
        assert_eq!(metrics.failed_jobs, 1);
        assert_eq!(metrics.processing_jobs, 0);
    }

    #[tokio::test]
    async fn test_malformed_deliveries_leave_counters_untouched() {
        let (manager, engine) = ready_manager().await;
        manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
            .unwrap();

        assert!(engine.deliver("email-queue", vec![]).await.unwrap().is_ok());

        let mut missing = Delivery::new("job-x", "email-queue", json!(null));
        assert!(engine
            .deliver("email-queue", vec![missing.clone()])
            .await
            .unwrap()
            .is_ok());
        missing.data = None;
        assert!(engine
            .deliver("email-queue", vec![missing])
            .await
            .unwrap()
            .is_ok());

        let metrics = manager.get_metrics().await;
        assert_eq!(metrics.completed_jobs, 0);
        assert_eq!(metrics.failed_jobs, 0);
        assert_eq!(metrics.processing_jobs, 0);
    }

    #[tokio::test]
    async fn test_only_first_delivery_of_batch_is_processed() {
        let (manager, engine) = ready_manager().await;
        manager
            .register_worker("email-queue", noop, WorkerOptions::default())
            .await
            .unwrap();

        let batch = vec![
            Delivery::new("job-a", "email-queue", json!({"n": 1})),
            Delivery::new("job-b", "email-queue", json!({"n": 2})),
        ];
        engine.deliver("email-queue", batch).await.unwrap().unwrap();

        assert_eq!(manager.get_metrics().await.completed_jobs, 1);
    }
}
