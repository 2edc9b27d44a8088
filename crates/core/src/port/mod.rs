// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod queue_engine;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use queue_engine::{
    EngineError, EngineNotification, HandlerError, QueueEngine, WorkHandler, WorkOptions,
};
pub use time_provider::TimeProvider;
