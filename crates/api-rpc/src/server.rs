//! JSON-RPC Server
//!
//! Read-only introspection over TCP, bound to localhost only.

use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use tracing::info;

use offloadq_core::application::{JobQueue, WorkerRegistry};

use crate::handler::RpcHandler;
use crate::types::QueueStatsRequest;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9530;

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        registry: Arc<WorkerRegistry>,
        queue: Arc<JobQueue>,
        namespaces: Vec<String>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(registry, queue, namespaces)),
        }
    }

    /// Start the JSON-RPC server.
    ///
    /// Binds to 127.0.0.1 only; the introspection surface carries no
    /// authentication and must not be reachable externally.
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = self.config.port,
            "Starting JSON-RPC introspection server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_method("health.v1", move |_, _, _| handler.health())
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_method("workers.status.v1", move |_, _, _| {
                handler.workers_status()
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queues.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: QueueStatsRequest = params.parse().unwrap_or_default();
                    handler.queue_stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!("JSON-RPC introspection server started");

        let handle = server.start(module);
        Ok(handle)
    }
}
