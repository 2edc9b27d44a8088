//! JSON-RPC Server
//!
//! Serves the monitoring methods over HTTP on the loopback interface.

use crate::handler::RpcHandler;
use crate::types::JobLookupRequest;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use queue_sdk_core::config::DEFAULT_METRICS_PORT;
use queue_sdk_core::{QueueManager, QueueSdkConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_METRICS_PORT,
        }
    }
}

impl RpcServerConfig {
    /// Loopback server on `monitoring.metricsPort`, if monitoring is enabled
    pub fn from_config(config: &QueueSdkConfig) -> Option<Self> {
        let monitoring = config.monitoring.as_ref().filter(|m| m.enabled)?;
        Some(Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: monitoring.metrics_port(),
        })
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, manager: Arc<QueueManager>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(manager)),
        }
    }

    fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("queue.health.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { Ok::<_, ErrorObjectOwned>(handler.health().await) }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.metrics.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { Ok::<_, ErrorObjectOwned>(handler.metrics().await) }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.list.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.queues().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.job.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobLookupRequest = params.parse()?;
                    handler.job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server. Returns the bound address and the handle
    /// used to stop it.
    ///
    /// Security: binds to the configured host only (loopback by default)
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC monitoring server started");
        Ok((local_addr, handle))
    }
}
