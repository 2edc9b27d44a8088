// Initialization gate
//
// One background task drives the engine to readiness; every gated
// operation waits on this gate instead of starting its own attempt.

use crate::error::{QueueError, Result};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Ready,
    /// Terminal; the message is handed to every waiter
    Failed(String),
}

pub(crate) struct InitGate {
    tx: watch::Sender<InitState>,
}

impl InitGate {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(InitState::Pending);
        Self { tx }
    }

    pub(crate) fn state(&self) -> InitState {
        self.tx.borrow().clone()
    }

    pub(crate) fn mark_ready(&self) {
        self.tx.send_replace(InitState::Ready);
    }

    pub(crate) fn mark_failed(&self, message: impl Into<String>) {
        self.tx.send_replace(InitState::Failed(message.into()));
    }

    /// Suspend the caller until initialization settles
    pub(crate) async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|state| *state != InitState::Pending)
            .await
            .map_err(|_| QueueError::Initialization("initialization abandoned".to_string()))?
            .clone();

        match settled {
            InitState::Failed(message) => Err(QueueError::Initialization(message)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiters_released_on_ready() {
        let gate = Arc::new(InitGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.mark_ready();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(gate.state(), InitState::Ready);
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let gate = InitGate::new();
        gate.mark_failed("connection refused");

        for _ in 0..2 {
            match gate.wait().await {
                Err(QueueError::Initialization(message)) => {
                    assert_eq!(message, "connection refused")
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }
}
