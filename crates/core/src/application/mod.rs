// Application Layer - Queue Manager and supporting services

pub mod constants;
mod handler;
pub mod health_monitor;
mod manager;
pub mod metrics;
mod panic_guard;
mod registry;
mod shutdown;

// Re-exports
pub use handler::JobHandler;
pub use health_monitor::HealthMonitor;
pub use manager::{InitState, QueueManager, QueueManagerBuilder};
pub use metrics::MetricsRecorder;
pub use registry::{HandlerRegistration, WorkerRegistry};
pub use shutdown::{shutdown_channel, ShutdownToken, ShutdownTrigger};
