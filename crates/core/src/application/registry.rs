// Worker registry
//
// Handlers are listed explicitly by the application and handed to the
// manager builder; they are attached once the engine is ready.

use super::handler::JobHandler;
use crate::domain::WorkerOptions;
use std::sync::Arc;

/// Handler bound to a queue, with the options it was registered with
#[derive(Clone)]
pub struct HandlerRegistration {
    pub queue: String,
    pub handler: Arc<dyn JobHandler>,
    pub options: WorkerOptions,
}

impl HandlerRegistration {
    pub fn new(
        queue: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue: queue.into(),
            handler,
            options,
        }
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    registrations: Vec<HandlerRegistration>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `queue`
    pub fn register<H: JobHandler>(
        mut self,
        queue: impl Into<String>,
        handler: H,
        options: WorkerOptions,
    ) -> Self {
        self.registrations
            .push(HandlerRegistration::new(queue, Arc::new(handler), options));
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Queue names in registration order
    pub fn queues(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.queue.as_str()).collect()
    }

    pub fn into_registrations(self) -> Vec<HandlerRegistration> {
        self.registrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::HandlerError;

    async fn noop(_payload: serde_json::Value) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_registry_keeps_order() {
        let registry = WorkerRegistry::new()
            .register("email-queue", noop, WorkerOptions::default())
            .register(
                "maintenance-queue",
                noop,
                WorkerOptions::default().with_team_size(2),
            );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.queues(), vec!["email-queue", "maintenance-queue"]);

        let registrations = registry.into_registrations();
        assert_eq!(registrations[1].options.team_size, Some(2));
    }

    #[tokio::test]
    async fn test_closure_handlers_are_job_handlers() {
        let handler: Arc<dyn JobHandler> = Arc::new(|payload: serde_json::Value| async move {
            if payload["ok"].as_bool() == Some(true) {
                Ok(())
            } else {
                Err::<(), HandlerError>("not ok".into())
            }
        });

        assert!(handler.handle(serde_json::json!({"ok": true})).await.is_ok());
        let err = handler
            .handle(serde_json::json!({"ok": false}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not ok");
    }
}
