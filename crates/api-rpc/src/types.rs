//! RPC Request/Response Types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use offloadq_core::application::{QueueTopologyStats, RegistryStatus};

/// Response for `health.v1`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Response for `workers.status.v1`
#[derive(Debug, Clone, Serialize)]
pub struct WorkersStatusResponse {
    #[serde(flatten)]
    pub registry: RegistryStatus,
}

/// Request for `queues.stats.v1`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueStatsRequest {
    /// Restrict to one provider namespace; all configured namespaces
    /// otherwise.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Response for `queues.stats.v1`
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsResponse {
    pub namespaces: BTreeMap<String, QueueTopologyStats>,
}
