//! Daemon configuration from environment variables

use std::time::Duration;

use offloadq_core::application::worker::constants::{
    DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
};

const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
const DEFAULT_NAMESPACES: &str = "ITL.Core";
const DEFAULT_RPC_PORT: u16 = 9530;

/// Recognized environment variables:
///
/// - `NATS_URL` - broker connection string
/// - `OFFLOADQ_NAMESPACES` - comma-separated provider namespaces to serve
/// - `WORKER_ID` - explicit worker identifier; generated if absent
/// - `WORKERS_PER_NAMESPACE` - workers spawned per namespace
/// - `MAX_RETRIES`, `RETRY_DELAY_SECONDS`, `MAX_CONCURRENT_JOBS`
/// - `JOB_TIMEOUT_SECONDS` - blocking result-wait budget
/// - `OFFLOADQ_RPC_PORT` - introspection server port
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub nats_url: String,
    pub namespaces: Vec<String>,
    pub worker_id: Option<String>,
    pub workers_per_namespace: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    pub rpc_port: u16,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            nats_url: env_string("NATS_URL", DEFAULT_NATS_URL),
            namespaces: parse_namespaces(&env_string("OFFLOADQ_NAMESPACES", DEFAULT_NAMESPACES)),
            worker_id: std::env::var("WORKER_ID").ok().filter(|s| !s.is_empty()),
            workers_per_namespace: env_parse("WORKERS_PER_NAMESPACE", 1).max(1),
            max_retries: env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_secs(env_parse(
                "RETRY_DELAY_SECONDS",
                DEFAULT_RETRY_DELAY.as_secs(),
            )),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)
                .max(1),
            job_timeout: Duration::from_secs(env_parse(
                "JOB_TIMEOUT_SECONDS",
                DEFAULT_JOB_TIMEOUT.as_secs(),
            )),
            rpc_port: env_parse("OFFLOADQ_RPC_PORT", DEFAULT_RPC_PORT),
        }
    }

    /// The configured worker ID, or a generated `worker-{uuid8}` one.
    pub fn worker_id_for(&self, namespace: &str, index: usize) -> String {
        match &self.worker_id {
            Some(id) if self.namespaces.len() == 1 && self.workers_per_namespace == 1 => {
                id.clone()
            }
            Some(id) => format!("{}-{}-{}", id, namespace.to_lowercase(), index),
            None => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("worker-{}", &suffix[..8])
            }
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_namespaces(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
