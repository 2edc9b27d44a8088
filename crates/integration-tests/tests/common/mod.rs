//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use queue_sdk_core::config::{DatabaseConfig, DEFAULT_PORT};
use queue_sdk_core::port::queue_engine::mocks::InMemoryEngine;
use queue_sdk_core::{QueueManager, QueueSdkConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn test_config() -> QueueSdkConfig {
    QueueSdkConfig::new(DatabaseConfig {
        host: "localhost".to_string(),
        port: DEFAULT_PORT,
        database: "queues".to_string(),
        user: "postgres".to_string(),
        password: "secret".to_string(),
        ..Default::default()
    })
}

/// Manager over `engine` with no schema settle delay
pub fn manager_with(engine: Arc<InMemoryEngine>) -> Arc<QueueManager> {
    QueueManager::builder(test_config(), engine)
        .settle_delay(Duration::ZERO)
        .start()
        .unwrap()
}

pub async fn ready_manager() -> (Arc<QueueManager>, Arc<InMemoryEngine>) {
    let engine = Arc::new(InMemoryEngine::new());
    let manager = manager_with(Arc::clone(&engine));
    manager.wait_for_initialization().await.unwrap();
    (manager, engine)
}
