//! Offloadq worker daemon - composition root.
//!
//! Wires the NATS broker, the job queue, a worker fleet and the
//! introspection RPC server, then runs until interrupted. Embedders call
//! [`run`] with their real [`OperationDispatcher`]; the shipped binary
//! plugs in [`EchoDispatcher`] as a loopback for smoke-testing a
//! deployment's queue path.

pub mod config;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use offloadq_core::application::{JobQueue, Worker, WorkerConfig, WorkerRegistry};
use offloadq_core::domain::Operation;
use offloadq_core::port::id_provider::UuidProvider;
use offloadq_core::port::time_provider::SystemTimeProvider;
use offloadq_core::port::{DispatchError, OperationDispatcher};
use offloadq_infra_nats::{NatsBroker, NatsConfig};

pub use config::DaemonConfig;

/// Loopback dispatcher: returns the request payload as the result.
///
/// Lets an operator verify the full submit/consume/result path of a
/// deployment before linking real provider logic.
pub struct EchoDispatcher;

#[async_trait]
impl OperationDispatcher for EchoDispatcher {
    async fn dispatch(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        info!(
            namespace = %provider_namespace,
            resource_type = %resource_type,
            operation = %operation,
            "Echo dispatch"
        );
        Ok(request.clone())
    }
}

/// Run the worker daemon until ctrl-c.
pub async fn run(config: DaemonConfig, dispatcher: Arc<dyn OperationDispatcher>) -> Result<()> {
    info!(nats_url = %config.nats_url, "Connecting to broker...");
    let broker = NatsBroker::connect(NatsConfig::with_url(&config.nats_url))
        .await
        .map_err(|e| anyhow::anyhow!("Broker connection failed: {}", e))?;

    let queue = Arc::new(JobQueue::new(
        Arc::new(broker),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));

    // Build the fleet: one or more workers per configured namespace.
    let registry = Arc::new(WorkerRegistry::new());
    let worker_config = WorkerConfig {
        max_retries: config.max_retries,
        retry_delay: config.retry_delay,
        max_concurrent_jobs: config.max_concurrent_jobs,
    };
    for namespace in &config.namespaces {
        for index in 0..config.workers_per_namespace {
            let worker = Arc::new(Worker::new(
                config.worker_id_for(namespace, index),
                namespace.clone(),
                Arc::clone(&queue),
                Arc::clone(&dispatcher),
                worker_config.clone(),
            ));
            registry
                .register(worker)
                .map_err(|e| anyhow::anyhow!("Worker registration failed: {}", e))?;
        }
    }

    registry.start_all().await;
    info!(
        workers = registry.status().total_workers,
        namespaces = config.namespaces.len(),
        "Worker fleet started"
    );

    // Introspection server (read-only, localhost).
    let rpc_config = offloadq_api_rpc::RpcServerConfig {
        port: config.rpc_port,
        ..Default::default()
    };
    let rpc_server = offloadq_api_rpc::RpcServer::new(
        rpc_config,
        Arc::clone(&registry),
        Arc::clone(&queue),
        config.namespaces.clone(),
    );
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!("System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining workers...");

    registry.stop_all().await;
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }

    info!("Shutdown complete.");
    Ok(())
}
