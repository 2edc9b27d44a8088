//! Health verdict derived from connectivity, queue, worker and error-rate signals.
//!
//! Rules, in order:
//! - start `healthy`
//! - `error_rate > ERROR_RATE_THRESHOLD` downgrades to `degraded`
//! - a disconnected database overrides everything with `unhealthy`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queue::QueueInfo;

/// Error rate above which the manager reports `degraded`
pub const ERROR_RATE_THRESHOLD: f64 = 0.1;

/// Queue the engine keeps for its own bookkeeping; never counted as active
pub const RESERVED_QUEUE_NAME: &str = "__pgboss__send-it";

const NOT_CONNECTED: &str = "Not connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub total: usize,
    pub active: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub total: usize,
    pub active: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub database: DatabaseHealth,
    pub queues: QueueHealth,
    pub workers: WorkerHealth,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    /// Derive the verdict for a manager whose engine answered.
    ///
    /// `disconnect_reason` is reported on the database sub-object when
    /// `connected` is false; `"Not connected"` is used when it is `None`.
    pub fn evaluate(
        connected: bool,
        disconnect_reason: Option<String>,
        error_rate: f64,
        queues: &[QueueInfo],
        worker_count: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut status = HealthState::Healthy;
        let mut database = DatabaseHealth {
            connected,
            error: None,
        };

        if error_rate > ERROR_RATE_THRESHOLD {
            status = HealthState::Degraded;
        }

        if !connected {
            status = HealthState::Unhealthy;
            database.error = Some(disconnect_reason.unwrap_or_else(|| NOT_CONNECTED.to_string()));
        }

        let active = queues
            .iter()
            .filter(|queue| queue.name != RESERVED_QUEUE_NAME)
            .count();

        Self {
            status,
            database,
            queues: QueueHealth {
                total: queues.len(),
                active,
                error: None,
            },
            workers: WorkerHealth {
                total: worker_count,
                active: worker_count,
                error: None,
            },
            timestamp,
        }
    }

    /// Fallback when the health computation itself failed
    pub fn failed(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let message = message.into();
        Self {
            status: HealthState::Unhealthy,
            database: DatabaseHealth {
                connected: false,
                error: Some(message.clone()),
            },
            queues: QueueHealth {
                total: 0,
                active: 0,
                error: Some(message.clone()),
            },
            workers: WorkerHealth {
                total: 0,
                active: 0,
                error: Some(message),
            },
            timestamp,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}
