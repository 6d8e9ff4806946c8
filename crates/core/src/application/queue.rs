// Job Queue - job submission, consumption and result retrieval on top of
// the Broker port. Owns queue naming, serialization, priority mapping and
// dead-letter routing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::application::results::ResultStore;
use crate::domain::{Job, JobId, Operation, Priority, QueueRoutes, ResultEnvelope};
use crate::error::Result;
use crate::port::broker::{Broker, Delivery, QueueStats};
use crate::port::{IdProvider, TimeProvider};

/// Unacknowledged-delivery bound for the result listener.
const RESULT_LISTENER_PREFETCH: usize = 64;

/// Aggregated statistics for one provider's queue topology.
#[derive(Debug, Clone, Serialize)]
pub struct QueueTopologyStats {
    pub connected: bool,
    pub queues: BTreeMap<String, QueueStats>,
}

/// Job submission/consumption API for provider operations.
///
/// One instance serves any number of provider namespaces; queue names are
/// derived per call. Results are retrieved through an in-process store fed
/// by a listener on each prefix's responses queue, started lazily on first
/// submission (the poller is the submitter in this subsystem's data flow).
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    results: Arc<ResultStore>,
    declared: Mutex<HashSet<String>>,
    listeners: Mutex<HashSet<String>>,
}

impl JobQueue {
    pub fn new(
        broker: Arc<dyn Broker>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let results = Arc::new(ResultStore::new(Arc::clone(&time_provider)));
        Self {
            broker,
            id_provider,
            time_provider,
            results,
            declared: Mutex::new(HashSet::new()),
            listeners: Mutex::new(HashSet::new()),
        }
    }

    pub fn time_provider(&self) -> &Arc<dyn TimeProvider> {
        &self.time_provider
    }

    /// Submit a job for asynchronous execution and return its ID without
    /// waiting for processing. Broker connectivity failures surface to the
    /// caller; submission itself is never retried here.
    pub async fn submit_job(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: serde_json::Value,
        priority: Priority,
    ) -> Result<JobId> {
        let routes = QueueRoutes::for_namespace(provider_namespace)?;
        self.ensure_topology(&routes).await?;
        self.ensure_result_listener(&routes).await?;

        let job_id = self.id_provider.generate_id();
        let job = Job::new(
            job_id.clone(),
            provider_namespace,
            resource_type,
            operation,
            request,
            priority,
        );
        let payload = serde_json::to_vec(&job)?;
        self.broker
            .publish(&routes.requests(), payload, priority)
            .await?;

        info!(
            job_id = %job_id,
            namespace = %provider_namespace,
            resource_type = %resource_type,
            operation = %operation,
            priority = priority.value(),
            "Job submitted"
        );
        Ok(job_id)
    }

    /// Subscribe to a provider's request queue with a bounded prefetch.
    ///
    /// Undecodable payloads are dead-lettered and acknowledged here so a
    /// poison message can never wedge the consumer.
    pub async fn consume_jobs(
        &self,
        provider_namespace: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, (Job, Delivery)>> {
        let routes = QueueRoutes::for_namespace(provider_namespace)?;
        self.ensure_topology(&routes).await?;

        let mut raw = self.broker.consume(&routes.requests(), prefetch).await?;
        let broker = Arc::clone(&self.broker);
        let dlq = routes.dlq();

        let stream = async_stream::stream! {
            while let Some(delivery) = raw.next().await {
                match serde_json::from_slice::<Job>(delivery.payload()) {
                    Ok(job) => yield (job, delivery),
                    Err(e) => {
                        warn!(error = %e, "Undecodable job payload, dead-lettering");
                        match broker
                            .publish(&dlq, delivery.payload().to_vec(), Priority::default())
                            .await
                        {
                            Ok(()) => {
                                if let Err(ack_err) = delivery.ack().await {
                                    warn!(error = %ack_err, "Failed to ack poison message");
                                }
                            }
                            Err(publish_err) => {
                                // Left unacked for redelivery.
                                error!(error = %publish_err, "Failed to dead-letter poison message");
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Publish a terminal result envelope to the provider's responses queue.
    pub async fn publish_result(
        &self,
        provider_namespace: &str,
        envelope: &ResultEnvelope,
    ) -> Result<()> {
        let routes = QueueRoutes::for_namespace(provider_namespace)?;
        let payload = serde_json::to_vec(envelope)?;
        self.broker
            .publish(&routes.responses(), payload, Priority::default())
            .await?;
        debug!(job_id = %envelope.job_id, status = %envelope.status, "Result published");
        Ok(())
    }

    /// Republish a job envelope for its next attempt. The caller remains
    /// responsible for acknowledging the original delivery afterwards.
    pub async fn requeue_for_retry(&self, job: &Job) -> Result<Job> {
        let routes = QueueRoutes::for_namespace(&job.provider_namespace)?;
        let retry = job.next_attempt();
        let payload = serde_json::to_vec(&retry)?;
        self.broker
            .publish(&routes.requests(), payload, retry.priority)
            .await?;
        info!(
            job_id = %retry.job_id,
            attempt = retry.attempt,
            "Job requeued for retry"
        );
        Ok(retry)
    }

    /// Route a job envelope to the dead-letter queue, `attempt` at its
    /// final value, for operator inspection and replay.
    pub async fn publish_dlq(&self, job: &Job) -> Result<()> {
        let routes = QueueRoutes::for_namespace(&job.provider_namespace)?;
        let payload = serde_json::to_vec(job)?;
        self.broker.publish(&routes.dlq(), payload, job.priority).await?;
        warn!(
            job_id = %job.job_id,
            attempt = job.attempt,
            "Job routed to dead-letter queue"
        );
        Ok(())
    }

    /// Wait up to `timeout` for the result of `job_id`; `None` means still
    /// pending. A zero timeout checks once without suspending.
    pub async fn get_result(&self, job_id: &str, timeout: Duration) -> Option<ResultEnvelope> {
        self.results.wait_for(job_id, timeout).await
    }

    /// Read-only introspection of one provider's queue topology.
    pub async fn get_queue_stats(&self, provider_namespace: &str) -> Result<QueueTopologyStats> {
        let routes = QueueRoutes::for_namespace(provider_namespace)?;
        let mut queues = BTreeMap::new();
        for name in routes.all() {
            let stats = self.broker.queue_stats(&name).await?;
            queues.insert(name, stats);
        }
        Ok(QueueTopologyStats {
            connected: self.broker.is_connected(),
            queues,
        })
    }

    async fn ensure_topology(&self, routes: &QueueRoutes) -> Result<()> {
        let already = {
            let declared = self.declared.lock().expect("declared set poisoned");
            declared.contains(routes.prefix())
        };
        if already {
            return Ok(());
        }
        for name in routes.all() {
            self.broker.declare_queue(&name).await?;
        }
        self.declared
            .lock()
            .expect("declared set poisoned")
            .insert(routes.prefix().to_string());
        Ok(())
    }

    /// Start the responses-queue listener for a prefix, once.
    async fn ensure_result_listener(&self, routes: &QueueRoutes) -> Result<()> {
        {
            let mut listeners = self.listeners.lock().expect("listener set poisoned");
            if listeners.contains(routes.prefix()) {
                return Ok(());
            }
            listeners.insert(routes.prefix().to_string());
        }

        let stream = match self
            .broker
            .consume(&routes.responses(), RESULT_LISTENER_PREFETCH)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.listeners
                    .lock()
                    .expect("listener set poisoned")
                    .remove(routes.prefix());
                return Err(e.into());
            }
        };

        let results = Arc::clone(&self.results);
        let prefix = routes.prefix().to_string();
        tokio::spawn(async move {
            Self::run_result_listener(stream, results, prefix).await;
        });
        Ok(())
    }

    async fn run_result_listener(
        mut stream: BoxStream<'static, Delivery>,
        results: Arc<ResultStore>,
        prefix: String,
    ) {
        debug!(prefix = %prefix, "Result listener started");
        while let Some(delivery) = stream.next().await {
            match serde_json::from_slice::<ResultEnvelope>(delivery.payload()) {
                Ok(envelope) => {
                    debug!(job_id = %envelope.job_id, status = %envelope.status, "Result received");
                    results.insert(envelope);
                    if let Err(e) = delivery.ack().await {
                        warn!(error = %e, "Failed to ack result message");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable result message");
                    if let Err(ack_err) = delivery.ack().await {
                        warn!(error = %ack_err, "Failed to ack undecodable result");
                    }
                }
            }
        }
        debug!(prefix = %prefix, "Result listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::broker::memory::MemoryBroker;
    use crate::port::id_provider::UuidProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use serde_json::json;

    fn queue_over(broker: MemoryBroker) -> JobQueue {
        JobQueue::new(
            Arc::new(broker),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        )
    }

    #[tokio::test]
    async fn submit_declares_topology_and_publishes() {
        let broker = MemoryBroker::new();
        let queue = queue_over(broker.clone());

        let job_id = queue
            .submit_job(
                "ITL.Compute",
                "virtualmachines",
                Operation::Create,
                json!({"name": "vm-1"}),
                Priority::default(),
            )
            .await
            .unwrap();
        assert!(!job_id.is_empty());

        let stats = queue.get_queue_stats("ITL.Compute").await.unwrap();
        assert!(stats.connected);
        assert_eq!(
            stats.queues["provider.compute.requests"].message_count,
            1
        );
        assert_eq!(stats.queues["provider.compute.dlq"].message_count, 0);
    }

    #[tokio::test]
    async fn submit_surfaces_connectivity_errors() {
        let broker = MemoryBroker::new();
        broker.disconnect();
        let queue = queue_over(broker);

        let err = queue
            .submit_job(
                "ITL.Core",
                "resourcegroups",
                Operation::Get,
                json!({}),
                Priority::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Broker(_)));
    }

    #[tokio::test]
    async fn poison_request_payload_is_dead_lettered() {
        let broker = MemoryBroker::new();
        let queue = queue_over(broker.clone());

        // Bypass submit_job to plant a payload that is not a Job envelope.
        broker.declare_queue("provider.core.requests").await.unwrap();
        broker
            .publish(
                "provider.core.requests",
                b"not json".to_vec(),
                Priority::default(),
            )
            .await
            .unwrap();

        let mut jobs = queue.consume_jobs("ITL.Core", 1).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(200), jobs.next()).await;
        assert!(pending.is_err(), "poison message must not surface as a job");

        let stats = queue.get_queue_stats("ITL.Core").await.unwrap();
        assert_eq!(stats.queues["provider.core.dlq"].message_count, 1);
        assert_eq!(stats.queues["provider.core.requests"].message_count, 0);
    }

    #[tokio::test]
    async fn get_result_resolves_after_worker_publishes() {
        let queue = Arc::new(queue_over(MemoryBroker::new()));
        let job_id = queue
            .submit_job(
                "ITL.Core",
                "resourcegroups",
                Operation::Create,
                json!({"name": "rg"}),
                Priority::default(),
            )
            .await
            .unwrap();

        assert!(queue.get_result(&job_id, Duration::ZERO).await.is_none());

        let envelope = ResultEnvelope::completed(job_id.clone(), json!({"id": "rg-1"}), 1);
        queue.publish_result("ITL.Core", &envelope).await.unwrap();

        let received = queue
            .get_result(&job_id, Duration::from_secs(2))
            .await
            .expect("result should arrive via the responses listener");
        assert_eq!(received.job_id, job_id);
    }

    #[tokio::test]
    async fn requeue_for_retry_increments_attempt() {
        let broker = MemoryBroker::new();
        let queue = queue_over(broker.clone());
        let job = Job::new(
            "j-1",
            "ITL.Core",
            "resourcegroups",
            Operation::Delete,
            json!({}),
            Priority::default(),
        );

        let retry = queue.requeue_for_retry(&job).await.unwrap();
        assert_eq!(retry.attempt, 2);

        let mut jobs = queue.consume_jobs("ITL.Core", 1).await.unwrap();
        let (redelivered, delivery) = jobs.next().await.unwrap();
        assert_eq!(redelivered.attempt, 2);
        delivery.ack().await.unwrap();
    }
}
