// Worker - consumes jobs, invokes the operation dispatcher, classifies
// failures and decides retry versus dead-letter.

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::application::classify::{classify, ErrorClass};
use crate::application::queue::JobQueue;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Job, JobOutcome, ResultEnvelope};
use crate::error::{AppError, Result};
use crate::port::broker::Delivery;
use crate::port::{OperationDispatcher, TimeProvider};

use constants::*;

/// Tunables for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// Snapshot of a worker's observable state. Never blocks in-flight work.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub provider_namespace: String,
    pub is_running: bool,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub started_at: Option<i64>,
}

// Everything the consume loop needs, cloneable into spawned tasks.
#[derive(Clone)]
struct WorkerContext {
    worker_id: String,
    namespace: String,
    queue: Arc<JobQueue>,
    dispatcher: Arc<dyn OperationDispatcher>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

struct WorkerRuntime {
    shutdown: ShutdownSender,
    handle: tokio::task::JoinHandle<()>,
}

/// A named, independent consumer bound to one provider namespace.
///
/// Per-attempt state machine: received, dispatching, then exactly one of
/// completed / retry-pending / failed-terminal. `jobs_processed` and
/// `jobs_failed` count terminal outcomes only, never individual attempts.
pub struct Worker {
    worker_id: String,
    namespace: String,
    queue: Arc<JobQueue>,
    dispatcher: Arc<dyn OperationDispatcher>,
    retry_policy: Arc<RetryPolicy>,
    max_concurrent_jobs: usize,
    time_provider: Arc<dyn TimeProvider>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
    started_at: Mutex<Option<i64>>,
    runtime: Mutex<Option<WorkerRuntime>>,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        provider_namespace: impl Into<String>,
        queue: Arc<JobQueue>,
        dispatcher: Arc<dyn OperationDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        let time_provider = Arc::clone(queue.time_provider());
        Self {
            worker_id: worker_id.into(),
            namespace: provider_namespace.into(),
            queue,
            dispatcher,
            retry_policy: Arc::new(RetryPolicy::new(config.max_retries, config.retry_delay)),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            time_provider,
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            is_running: Arc::new(AtomicBool::new(false)),
            started_at: Mutex::new(None),
            runtime: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn provider_namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::SeqCst)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.worker_id.clone(),
            provider_namespace: self.namespace.clone(),
            is_running: self.is_running(),
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
            started_at: *self.started_at.lock().expect("started_at poisoned"),
        }
    }

    /// Transition into the consuming state. Errors if already started.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().expect("runtime poisoned");
        if runtime.is_some() {
            return Err(AppError::Conflict(format!(
                "Worker {} is already running",
                self.worker_id
            )));
        }

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let ctx = self.context();
        let is_running = Arc::clone(&self.is_running);
        let max_concurrent = self.max_concurrent_jobs;

        *self.started_at.lock().expect("started_at poisoned") =
            Some(self.time_provider.now_millis());
        is_running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            Self::run(ctx, max_concurrent, shutdown_rx).await;
            is_running.store(false, Ordering::SeqCst);
        });

        *runtime = Some(WorkerRuntime {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Drain in-flight work and disconnect. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let runtime = self.runtime.lock().expect("runtime poisoned").take();
        let Some(WorkerRuntime { shutdown, handle }) = runtime else {
            return Ok(());
        };

        info!(worker_id = %self.worker_id, "Stopping worker");
        shutdown.shutdown();
        match tokio::time::timeout(STOP_DRAIN_TIMEOUT, handle).await {
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(worker_id = %self.worker_id, "Worker loop panicked");
            }
            Ok(_) => {}
            Err(_) => {
                warn!(worker_id = %self.worker_id, "Worker did not drain within the stop timeout");
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            worker_id: self.worker_id.clone(),
            namespace: self.namespace.clone(),
            queue: Arc::clone(&self.queue),
            dispatcher: Arc::clone(&self.dispatcher),
            retry_policy: Arc::clone(&self.retry_policy),
            time_provider: Arc::clone(&self.time_provider),
            jobs_processed: Arc::clone(&self.jobs_processed),
            jobs_failed: Arc::clone(&self.jobs_failed),
        }
    }

    async fn run(ctx: WorkerContext, max_concurrent: usize, mut shutdown: ShutdownToken) {
        info!(
            worker_id = %ctx.worker_id,
            namespace = %ctx.namespace,
            max_concurrent_jobs = max_concurrent,
            "Worker started"
        );
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        'outer: loop {
            if shutdown.is_shutdown() {
                break;
            }

            let mut jobs = match ctx.queue.consume_jobs(&ctx.namespace, max_concurrent).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(
                        worker_id = %ctx.worker_id,
                        error = %e,
                        "Failed to subscribe to request queue"
                    );
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP) => continue 'outer,
                        _ = shutdown.wait() => break 'outer,
                    }
                }
            };

            loop {
                // Claim a concurrency slot before pulling a job so shutdown
                // never strands an unprocessed delivery.
                let permit = tokio::select! {
                    _ = shutdown.wait() => break 'outer,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'outer,
                    },
                };

                tokio::select! {
                    _ = shutdown.wait() => {
                        drop(permit);
                        break 'outer;
                    }
                    next = jobs.next() => match next {
                        Some((job, delivery)) => {
                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                Self::process(ctx, job, delivery).await;
                                drop(permit);
                            });
                        }
                        None => {
                            drop(permit);
                            warn!(worker_id = %ctx.worker_id, "Request stream ended, resubscribing");
                            tokio::select! {
                                _ = sleep(ERROR_RECOVERY_SLEEP) => continue 'outer,
                                _ = shutdown.wait() => break 'outer,
                            }
                        }
                    }
                }
            }
        }

        // Drain: every slot back means no dispatch is still in flight.
        let _ = semaphore.acquire_many(max_concurrent as u32).await;
        info!(worker_id = %ctx.worker_id, "Worker stopped");
    }

    /// Process one delivery to a terminal decision. Captures every failure
    /// locally; nothing escapes into the consume loop.
    async fn process(ctx: WorkerContext, job: Job, delivery: Delivery) {
        info!(
            worker_id = %ctx.worker_id,
            job_id = %job.job_id,
            operation = %job.operation,
            attempt = job.attempt,
            "Dispatching job"
        );

        match Self::dispatch_guarded(&ctx, &job).await {
            Ok(value) => Self::finish_success(&ctx, &job, delivery, value).await,
            Err((message, class)) => {
                Self::finish_failure(&ctx, &job, delivery, message, class).await
            }
        }
    }

    // Runs the dispatcher in its own task so a panic is contained and
    // surfaced as a terminal failure instead of killing the worker.
    async fn dispatch_guarded(
        ctx: &WorkerContext,
        job: &Job,
    ) -> std::result::Result<serde_json::Value, (String, ErrorClass)> {
        let dispatcher = Arc::clone(&ctx.dispatcher);
        let dispatch_job = job.clone();
        let handle = tokio::spawn(async move {
            dispatcher
                .dispatch(
                    &dispatch_job.provider_namespace,
                    &dispatch_job.resource_type,
                    dispatch_job.operation,
                    &dispatch_job.request,
                )
                .await
        });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let message = e.to_string();
                let class = classify(&message);
                Err((message, class))
            }
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(job_id = %job.job_id, panic = %message, "Dispatcher panicked");
                Err((
                    format!("dispatch panicked: {}", message),
                    ErrorClass::NonRetryable,
                ))
            }
            Err(join_err) => Err((
                format!("dispatch cancelled: {}", join_err),
                ErrorClass::NonRetryable,
            )),
        }
    }

    async fn finish_success(
        ctx: &WorkerContext,
        job: &Job,
        delivery: Delivery,
        value: serde_json::Value,
    ) {
        let envelope = ResultEnvelope::from_outcome(
            job.job_id.clone(),
            &JobOutcome::Success(value),
            ctx.time_provider.now_millis(),
        );
        if let Err(e) = ctx
            .queue
            .publish_result(&job.provider_namespace, &envelope)
            .await
        {
            // Left unacked: the broker redelivers and the dispatcher's
            // idempotency contract absorbs the duplicate.
            error!(
                job_id = %job.job_id,
                error = %e,
                "Failed to publish result, leaving job for redelivery"
            );
            return;
        }
        if let Err(e) = delivery.ack().await {
            warn!(job_id = %job.job_id, error = %e, "Failed to ack completed job");
        }
        ctx.jobs_processed.fetch_add(1, Ordering::SeqCst);
        info!(
            worker_id = %ctx.worker_id,
            job_id = %job.job_id,
            attempt = job.attempt,
            "Job completed"
        );
    }

    async fn finish_failure(
        ctx: &WorkerContext,
        job: &Job,
        delivery: Delivery,
        message: String,
        class: ErrorClass,
    ) {
        match ctx.retry_policy.decide(job.attempt, class) {
            RetryDecision::Retry(delay) => {
                info!(
                    worker_id = %ctx.worker_id,
                    job_id = %job.job_id,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Retrying job after transient failure"
                );
                sleep(delay).await;
                if let Err(e) = ctx.queue.requeue_for_retry(job).await {
                    error!(
                        job_id = %job.job_id,
                        error = %e,
                        "Failed to requeue job, leaving delivery for broker redelivery"
                    );
                    return;
                }
                if let Err(e) = delivery.ack().await {
                    warn!(job_id = %job.job_id, error = %e, "Failed to ack retried job");
                }
                // Counters track terminal outcomes only.
            }
            RetryDecision::DeadLetter => {
                error!(
                    worker_id = %ctx.worker_id,
                    job_id = %job.job_id,
                    attempt = job.attempt,
                    error = %message,
                    "Job failed terminally"
                );
                let envelope = ResultEnvelope::from_outcome(
                    job.job_id.clone(),
                    &JobOutcome::Failure(message),
                    ctx.time_provider.now_millis(),
                );
                if let Err(e) = ctx
                    .queue
                    .publish_result(&job.provider_namespace, &envelope)
                    .await
                {
                    error!(job_id = %job.job_id, error = %e, "Failed to publish failure result");
                }
                if let Err(e) = ctx.queue.publish_dlq(job).await {
                    error!(
                        job_id = %job.job_id,
                        error = %e,
                        "Failed to dead-letter job, leaving delivery for broker redelivery"
                    );
                    return;
                }
                if let Err(e) = delivery.ack().await {
                    warn!(job_id = %job.job_id, error = %e, "Failed to ack dead-lettered job");
                }
                ctx.jobs_failed.fetch_add(1, Ordering::SeqCst);
                debug!(job_id = %job.job_id, "Terminal failure recorded");
            }
        }
    }
}
