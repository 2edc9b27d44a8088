// Central Error Type for the Queue SDK

use thiserror::Error;

/// Queue manager error type
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Failed to add job to queue {queue}: {reason}")]
    Submission { queue: String, reason: String },

    #[error("Failed to register worker for queue {queue}: {reason}")]
    Registration { queue: String, reason: String },

    #[error("Failed to schedule job for queue {queue}: {reason}")]
    Schedule { queue: String, reason: String },

    #[error("Failed to look up job {job_id}: {reason}")]
    Lookup { job_id: String, reason: String },

    #[error("Engine error: {0}")]
    Engine(#[from] crate::port::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;
