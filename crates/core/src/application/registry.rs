// Worker Fleet Registry - bookkeeping only, no processing logic
//
// An explicit object constructed once at process start and passed by
// handle to whatever needs it; lifecycle belongs to the owning process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info};

use crate::application::worker::{Worker, WorkerStatus};
use crate::error::{AppError, Result};

/// Aggregate snapshot across all registered workers, computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub total_workers: usize,
    pub active_workers: usize,
    pub total_jobs_processed: u64,
    pub total_jobs_failed: u64,
    pub workers: Vec<WorkerStatus>,
}

/// Owns the worker instances of one host process, keyed by worker ID.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, Arc<Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a worker. Worker IDs are unique per registry.
    pub fn register(&self, worker: Arc<Worker>) -> Result<()> {
        let mut workers = self.workers.lock().expect("registry poisoned");
        if workers.contains_key(worker.worker_id()) {
            return Err(AppError::Conflict(format!(
                "Worker {} is already registered",
                worker.worker_id()
            )));
        }
        info!(worker_id = %worker.worker_id(), "Worker registered");
        workers.insert(worker.worker_id().to_string(), worker);
        Ok(())
    }

    /// Remove a worker. Returns whether it was present.
    pub fn unregister(&self, worker_id: &str) -> bool {
        let removed = self
            .workers
            .lock()
            .expect("registry poisoned")
            .remove(worker_id)
            .is_some();
        if removed {
            info!(worker_id = %worker_id, "Worker unregistered");
        }
        removed
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.workers
            .lock()
            .expect("registry poisoned")
            .get(worker_id)
            .cloned()
    }

    pub fn active_workers(&self) -> Vec<Arc<Worker>> {
        self.members()
            .into_iter()
            .filter(|worker| worker.is_running())
            .collect()
    }

    /// Start every member sequentially. One worker failing to start is
    /// logged and does not abort the rest.
    pub async fn start_all(&self) {
        for worker in self.members() {
            if let Err(e) = worker.start().await {
                error!(worker_id = %worker.worker_id(), error = %e, "Failed to start worker");
            }
        }
    }

    /// Stop every member sequentially, draining in-flight work. One worker
    /// failing to stop is logged and does not abort the rest.
    pub async fn stop_all(&self) {
        for worker in self.members() {
            if let Err(e) = worker.stop().await {
                error!(worker_id = %worker.worker_id(), error = %e, "Failed to stop worker");
            }
        }
    }

    /// Aggregate counters across members at call time. Never cached.
    pub fn status(&self) -> RegistryStatus {
        let members = self.members();
        let workers: Vec<WorkerStatus> = members.iter().map(|w| w.status()).collect();
        RegistryStatus {
            total_workers: workers.len(),
            active_workers: workers.iter().filter(|w| w.is_running).count(),
            total_jobs_processed: workers.iter().map(|w| w.jobs_processed).sum(),
            total_jobs_failed: workers.iter().map(|w| w.jobs_failed).sum(),
            workers,
        }
    }

    // Members sorted by ID for deterministic iteration.
    fn members(&self) -> Vec<Arc<Worker>> {
        let workers = self.workers.lock().expect("registry poisoned");
        let mut members: Vec<Arc<Worker>> = workers.values().cloned().collect();
        members.sort_by(|a, b| a.worker_id().cmp(b.worker_id()));
        members
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::JobQueue;
    use crate::application::worker::WorkerConfig;
    use crate::port::broker::memory::MemoryBroker;
    use crate::port::dispatcher::mocks::MockDispatcher;
    use crate::port::id_provider::UuidProvider;
    use crate::port::time_provider::SystemTimeProvider;

    fn test_worker(id: &str) -> Arc<Worker> {
        let queue = Arc::new(JobQueue::new(
            Arc::new(MemoryBroker::new()),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        ));
        Arc::new(Worker::new(
            id,
            "ITL.Core",
            queue,
            Arc::new(MockDispatcher::new_success()),
            WorkerConfig::default(),
        ))
    }

    #[test]
    fn duplicate_worker_id_is_rejected() {
        let registry = WorkerRegistry::new();
        registry.register(test_worker("w-1")).unwrap();
        let err = registry.register(test_worker("w-1")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(registry.status().total_workers, 1);
    }

    #[test]
    fn unregister_reports_presence() {
        let registry = WorkerRegistry::new();
        registry.register(test_worker("w-1")).unwrap();
        assert!(registry.unregister("w-1"));
        assert!(!registry.unregister("w-1"));
    }

    #[tokio::test]
    async fn status_aggregates_on_demand() {
        let registry = WorkerRegistry::new();
        registry.register(test_worker("w-1")).unwrap();
        registry.register(test_worker("w-2")).unwrap();

        let status = registry.status();
        assert_eq!(status.total_workers, 2);
        assert_eq!(status.active_workers, 0);
        assert_eq!(status.total_jobs_processed, 0);

        registry.start_all().await;
        let status = registry.status();
        assert_eq!(status.active_workers, 2);
        assert_eq!(registry.active_workers().len(), 2);

        registry.stop_all().await;
        assert_eq!(registry.status().active_workers, 0);
    }
}
