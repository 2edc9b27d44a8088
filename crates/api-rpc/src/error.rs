//! RPC Error Types
//!
//! Maps queue errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use queue_sdk_core::port::EngineError;
use queue_sdk_core::QueueError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
    /// Manager failed to initialize or is stopped
    pub const UNAVAILABLE: i32 = 5003;
}

fn owned(code: i32, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, message.into(), None::<()>)
}

/// Convert QueueError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: QueueError) -> ErrorObjectOwned {
    match err {
        QueueError::Validation(msg) => owned(code::VALIDATION_ERROR, msg),
        QueueError::Domain(e) => owned(code::VALIDATION_ERROR, e.to_string()),
        QueueError::Serialization(e) => owned(code::VALIDATION_ERROR, e.to_string()),
        QueueError::Config(msg) => owned(code::INTERNAL_ERROR, msg),
        QueueError::Initialization(msg) => owned(code::UNAVAILABLE, msg),
        e @ (QueueError::Submission { .. }
        | QueueError::Registration { .. }
        | QueueError::Schedule { .. }
        | QueueError::Lookup { .. }) => owned(code::DB_ERROR, e.to_string()),
        QueueError::Engine(e) => engine_error(e),
        QueueError::Io(e) => owned(code::SYSTEM_ERROR, e.to_string()),
    }
}

fn engine_error(err: EngineError) -> ErrorObjectOwned {
    let message = err.to_string();
    match err {
        EngineError::Unavailable(_) => owned(code::UNAVAILABLE, message),
        EngineError::Database(_) => owned(code::DB_ERROR, message),
        EngineError::NotFound(_) => owned(code::NOT_FOUND, message),
        EngineError::Validation(_) | EngineError::InvalidCron { .. } => {
            owned(code::VALIDATION_ERROR, message)
        }
        EngineError::Internal(_) => owned(code::INTERNAL_ERROR, message),
    }
}

/// Job lookup that came back empty
pub fn job_not_found(queue: &str, job_id: &str) -> ErrorObjectOwned {
    owned(
        code::NOT_FOUND,
        format!("Job {} not found in queue {}", job_id, queue),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_errors_map_to_codes() {
        let err = to_rpc_error(QueueError::Validation("Queue name is required".to_string()));
        assert_eq!(err.code(), code::VALIDATION_ERROR);
        assert_eq!(err.message(), "Queue name is required");

        let err = to_rpc_error(QueueError::Initialization("connection refused".to_string()));
        assert_eq!(err.code(), code::UNAVAILABLE);

        let err = to_rpc_error(QueueError::Lookup {
            job_id: "job-1".to_string(),
            reason: "timeout".to_string(),
        });
        assert_eq!(err.code(), code::DB_ERROR);
        assert!(err.message().contains("job-1"));
    }

    #[test]
    fn test_engine_errors_keep_their_category() {
        let err = to_rpc_error(QueueError::Engine(EngineError::NotFound("job x".to_string())));
        assert_eq!(err.code(), code::NOT_FOUND);

        let err = to_rpc_error(QueueError::Engine(EngineError::InvalidCron {
            expression: "* *".to_string(),
            reason: "too few fields".to_string(),
        }));
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let err = to_rpc_error(QueueError::Engine(EngineError::Unavailable(
            "engine not started".to_string(),
        )));
        assert_eq!(err.code(), code::UNAVAILABLE);
    }
}
