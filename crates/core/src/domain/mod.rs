// Domain Layer - Jobs, options, metrics, health and events

pub mod error;
pub mod event;
pub mod health;
pub mod job;
pub mod metrics;
pub mod options;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{EventBus, QueueEvent};
pub use health::{
    DatabaseHealth, HealthState, HealthStatus, QueueHealth, WorkerHealth, ERROR_RATE_THRESHOLD,
    RESERVED_QUEUE_NAME,
};
pub use job::{Delivery, JobId, JobInfo, JobState, JobStateInfo, WorkerId};
pub use metrics::QueueMetrics;
pub use options::{JobOptions, ScheduleOptions, WorkerOptions};
pub use queue::{validate_queue_name, QueueInfo, QueueName};
