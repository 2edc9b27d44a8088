//! Typed lifecycle events broadcast by the queue manager.
//!
//! Backed by `tokio::sync::broadcast`: every subscriber sees every event
//! published after it subscribed, slow subscribers observe `Lagged`.

use serde::Serialize;
use tokio::sync::broadcast;

use super::job::{JobId, WorkerId};

/// Default broadcast capacity
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum QueueEvent {
    JobCompleted {
        job_id: JobId,
        queue: String,
        data: serde_json::Value,
    },
    JobFailed {
        job_id: JobId,
        queue: String,
        error: String,
    },
    WorkerStarted {
        worker_id: WorkerId,
        queue: String,
    },
    WorkerStopped {
        worker_id: WorkerId,
        queue: String,
    },
    Error {
        message: String,
    },
    Stopped,
}

impl QueueEvent {
    /// Wire name used in logs and by event listeners
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::JobCompleted { .. } => "job:completed",
            QueueEvent::JobFailed { .. } => "job:failed",
            QueueEvent::WorkerStarted { .. } => "worker:started",
            QueueEvent::WorkerStopped { .. } => "worker:stopped",
            QueueEvent::Error { .. } => "error",
            QueueEvent::Stopped => "stopped",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of subscribers reached (0 is not an error)
    pub fn publish(&self, event: QueueEvent) -> usize {
        tracing::trace!(event = event.name(), "Publishing queue event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(QueueEvent::Stopped), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.publish(QueueEvent::WorkerStarted {
            worker_id: "w-1".to_string(),
            queue: "email-queue".to_string(),
        });
        assert_eq!(delivered, 2);

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name(), "worker:started");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = QueueEvent::JobFailed {
            job_id: "42".to_string(),
            queue: "q".to_string(),
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "jobFailed");
        assert_eq!(value["job_id"], "42");
    }
}
