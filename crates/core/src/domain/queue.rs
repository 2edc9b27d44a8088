// Queue Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Queue identifier
pub type QueueName = String;

/// Queue summary as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub name: QueueName,
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub queued_count: u64,
    #[serde(default)]
    pub active_count: u64,
    #[serde(default)]
    pub total_count: u64,
}

impl QueueInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_on: None,
            queued_count: 0,
            active_count: 0,
            total_count: 0,
        }
    }
}

/// Queue names must be non-blank
pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.trim().is_empty() {
        return Err(DomainError::InvalidQueueName(
            "queue name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_queue_name() {
        assert!(validate_queue_name("email-queue").is_ok());
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("   ").is_err());
    }
}
