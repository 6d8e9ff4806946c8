//! RPC Method Handlers
//!
//! Read-only views over the worker registry and the job queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use jsonrpsee::types::ErrorObjectOwned;

use offloadq_core::application::{JobQueue, WorkerRegistry};

use crate::error::to_rpc_error;
use crate::types::{
    HealthResponse, QueueStatsRequest, QueueStatsResponse, WorkersStatusResponse,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    registry: Arc<WorkerRegistry>,
    queue: Arc<JobQueue>,
    namespaces: Vec<String>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        queue: Arc<JobQueue>,
        namespaces: Vec<String>,
    ) -> Self {
        Self {
            registry,
            queue,
            namespaces,
            start_time: std::time::Instant::now(),
        }
    }

    /// health.v1 - liveness probe
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            version: VERSION.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// workers.status.v1 - registry aggregate plus per-worker snapshots
    pub fn workers_status(&self) -> WorkersStatusResponse {
        WorkersStatusResponse {
            registry: self.registry.status(),
        }
    }

    /// queues.stats.v1 - message/consumer counts per queue
    pub async fn queue_stats(
        &self,
        params: QueueStatsRequest,
    ) -> Result<QueueStatsResponse, ErrorObjectOwned> {
        let namespaces: Vec<String> = match params.namespace {
            Some(ns) => vec![ns],
            None => self.namespaces.clone(),
        };

        let mut result = BTreeMap::new();
        for namespace in namespaces {
            let stats = self
                .queue
                .get_queue_stats(&namespace)
                .await
                .map_err(to_rpc_error)?;
            result.insert(namespace, stats);
        }
        Ok(QueueStatsResponse { namespaces: result })
    }
}
