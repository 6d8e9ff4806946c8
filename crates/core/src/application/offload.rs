// Offloading Facade - presents the synchronous dispatch call shape while
// submitting jobs to the queue and returning immediately.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::application::queue::JobQueue;
use crate::application::worker::constants::DEFAULT_JOB_TIMEOUT;
use crate::domain::{JobId, JobOutcome, JobStatus, Operation, Priority};
use crate::error::{AppError, Result};

/// Lightweight response carrying only the job handle.
#[derive(Debug, Clone, Serialize)]
pub struct OffloadResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Drop-in replacement for the synchronous operation-dispatch entry point.
///
/// Each operation submits a job and returns a pending response without
/// waiting for processing; [`OffloadDispatcher::wait_for_result`] is the
/// blocking variant for callers that genuinely need the outcome inline.
pub struct OffloadDispatcher {
    queue: Arc<JobQueue>,
    timeout: Duration,
}

impl OffloadDispatcher {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self::with_timeout(queue, DEFAULT_JOB_TIMEOUT)
    }

    pub fn with_timeout(queue: Arc<JobQueue>, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    pub async fn create_or_update(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit(provider_namespace, resource_type, Operation::Create, request)
            .await
    }

    pub async fn get(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit(provider_namespace, resource_type, Operation::Get, request)
            .await
    }

    pub async fn list(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit(provider_namespace, resource_type, Operation::List, request)
            .await
    }

    pub async fn delete(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit(provider_namespace, resource_type, Operation::Delete, request)
            .await
    }

    pub async fn execute_action(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit(provider_namespace, resource_type, Operation::Action, request)
            .await
    }

    /// Submit with an explicit operation and default priority.
    pub async fn submit(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: serde_json::Value,
    ) -> Result<OffloadResponse> {
        self.submit_with_priority(
            provider_namespace,
            resource_type,
            operation,
            request,
            Priority::default(),
        )
        .await
    }

    pub async fn submit_with_priority(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: serde_json::Value,
        priority: Priority,
    ) -> Result<OffloadResponse> {
        let job_id = self
            .queue
            .submit_job(provider_namespace, resource_type, operation, request, priority)
            .await?;
        Ok(OffloadResponse {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// Block until the job reaches a terminal outcome or the configured
    /// timeout elapses.
    pub async fn wait_for_result(&self, job_id: &str) -> Result<JobOutcome> {
        match self.queue.get_result(job_id, self.timeout).await {
            Some(envelope) => envelope.outcome().ok_or_else(|| {
                AppError::Internal(format!("Non-terminal result for job {}", job_id))
            }),
            None => Err(AppError::ResultTimeout(self.timeout)),
        }
    }

    /// Submit and wait composed, for callers such as scripts that need the
    /// synchronous call shape end to end.
    pub async fn dispatch_blocking(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: serde_json::Value,
    ) -> Result<JobOutcome> {
        let response = self
            .submit(provider_namespace, resource_type, operation, request)
            .await?;
        self.wait_for_result(&response.job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::broker::memory::MemoryBroker;
    use crate::port::id_provider::UuidProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use serde_json::json;

    fn facade() -> OffloadDispatcher {
        let queue = Arc::new(JobQueue::new(
            Arc::new(MemoryBroker::new()),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        ));
        OffloadDispatcher::with_timeout(queue, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn submission_returns_pending_without_blocking() {
        let facade = facade();
        let response = facade
            .create_or_update("ITL.Core", "resourcegroups", json!({"name": "rg-1"}))
            .await
            .unwrap();
        assert!(!response.job_id.is_empty());
        assert_eq!(response.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn waiting_without_a_worker_times_out() {
        let facade = facade();
        let response = facade
            .delete("ITL.Core", "resourcegroups", json!({"name": "rg-1"}))
            .await
            .unwrap();
        let err = facade.wait_for_result(&response.job_id).await.unwrap_err();
        assert!(matches!(err, AppError::ResultTimeout(_)));
    }
}
