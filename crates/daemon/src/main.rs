//! Queue SDK - Main Entry Point
//! Postgres-backed queue manager with the demo workers and monitoring server

mod handlers;

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use queue_sdk_api_rpc::{RpcServer, RpcServerConfig};
use queue_sdk_core::application::{shutdown_channel, HealthMonitor};
use queue_sdk_core::domain::QueueEvent;
use queue_sdk_core::{ConfigLoader, QueueManager, QueueSdkConfig};
use queue_sdk_postgres::PgQueueEngine;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_PATH_VAR: &str = "QUEUE_SDK_CONFIG";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn load_config() -> Result<QueueSdkConfig> {
    match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => {
            let path = shellexpand::tilde(&path).into_owned();
            ConfigLoader::load_from_file(&path)
                .with_context(|| format!("Failed to load config file {}", path))
        }
        Err(_) => ConfigLoader::load_from_env(None, None)
            .context("Failed to load config from environment"),
    }
}

fn init_tracing(config: &QueueSdkConfig) {
    let log_format = std::env::var("QUEUE_SDK_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("queue_sdk={}", config.log_level().as_str())));

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

/// Mirror manager events into the log
async fn log_events(manager: Arc<QueueManager>) {
    let mut events = manager.subscribe();
    loop {
        match events.recv().await {
            Ok(QueueEvent::JobFailed { job_id, queue, error }) => {
                warn!(queue = %queue, job_id = %job_id, error = %error, "Job failed")
            }
            Ok(QueueEvent::Error { message }) => error!(error = %message, "Queue error"),
            Ok(QueueEvent::Stopped) => break,
            Ok(event) => tracing::debug!(event = event.name(), "Queue event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log lagged")
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (log level comes from it)
    let config = load_config()?;
    init_tracing(&config);

    info!("Queue SDK v{} starting...", VERSION);
    info!(
        host = %config.database.host,
        database = %config.database.database,
        schema = %config.database.schema(),
        "Connecting queue engine"
    );

    // 2. Wire engine, manager and workers
    let engine = Arc::new(PgQueueEngine::new(config.database.clone()));
    let manager = QueueManager::builder(config, engine)
        .registry(handlers::registry())
        .start()
        .context("Queue manager failed to start")?;

    tokio::spawn(log_events(Arc::clone(&manager)));
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { handlers::schedule_maintenance(&manager).await; });
    }

    // 3. Monitoring surface
    let (shutdown_trigger, shutdown_token) = shutdown_channel();

    let rpc_handle = match RpcServerConfig::from_config(manager.config()) {
        Some(rpc_config) => {
            let (addr, handle) = RpcServer::new(rpc_config, Arc::clone(&manager))
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;
            info!(addr = %addr, "Monitoring enabled");
            Some(handle)
        }
        None => None,
    };

    let monitor_handle = HealthMonitor::from_config(Arc::clone(&manager))
        .map(|monitor| tokio::spawn(monitor.run(shutdown_token)));

    info!("Press Ctrl+C to shutdown");

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 5. Graceful shutdown
    shutdown_trigger.trigger();
    if let Some(handle) = rpc_handle {
        handle
            .stop()
            .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    }
    if let Err(e) = manager.stop().await {
        error!(error = %e, "Queue manager did not stop cleanly");
    }
    if let Some(handle) = monitor_handle {
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
    }

    info!("Shutdown complete.");

    Ok(())
}
