// Worker end-to-end behavior over the in-process broker:
// success, retry, exhaustion and dead-letter routing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use offloadq_core::application::{JobQueue, Worker, WorkerConfig};
use offloadq_core::domain::{Job, JobStatus, Operation, Priority};
use offloadq_core::port::broker::memory::MemoryBroker;
use offloadq_core::port::broker::Broker;
use offloadq_core::port::dispatcher::mocks::MockDispatcher;
use offloadq_core::port::id_provider::UuidProvider;
use offloadq_core::port::time_provider::SystemTimeProvider;

fn engine() -> (MemoryBroker, Arc<JobQueue>) {
    let broker = MemoryBroker::new();
    let queue = Arc::new(JobQueue::new(
        Arc::new(broker.clone()),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    (broker, queue)
}

fn worker_with(
    queue: &Arc<JobQueue>,
    dispatcher: Arc<MockDispatcher>,
    max_retries: u32,
) -> Arc<Worker> {
    Arc::new(Worker::new(
        "w-test",
        "ITL.Core",
        Arc::clone(queue),
        dispatcher,
        WorkerConfig {
            max_retries,
            retry_delay: Duration::from_millis(20),
            max_concurrent_jobs: 1,
        },
    ))
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Pull the single job envelope sitting in a queue's dead-letter queue.
async fn take_dlq_entry(broker: &MemoryBroker, dlq: &str) -> Job {
    let mut stream = broker.consume(dlq, 1).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("DLQ entry should be present")
        .unwrap();
    let job: Job = serde_json::from_slice(delivery.payload()).unwrap();
    delivery.ack().await.unwrap();
    job
}

#[tokio::test]
async fn first_attempt_success_publishes_exactly_one_completed_result() {
    let (_broker, queue) = engine();
    let dispatcher = Arc::new(MockDispatcher::new_success());
    let worker = worker_with(&queue, Arc::clone(&dispatcher), 3);
    worker.start().await.unwrap();

    let job_id = queue
        .submit_job(
            "ITL.Core",
            "ResourceGroup",
            Operation::Create,
            json!({"name": "rg-1"}),
            Priority::default(),
        )
        .await
        .unwrap();

    let result = queue
        .get_result(&job_id, Duration::from_secs(5))
        .await
        .expect("completed result within the timeout");
    assert_eq!(result.job_id, job_id);
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.result, Some(json!({"name": "rg-1"})));

    assert!(wait_until(|| worker.jobs_processed() == 1, Duration::from_secs(2)).await);
    assert_eq!(worker.jobs_failed(), 0);
    assert_eq!(dispatcher.call_count(), 1);

    // Exactly one result: a second poll finds nothing further.
    assert!(queue.get_result(&job_id, Duration::ZERO).await.is_none());

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn transient_failures_are_absorbed_within_the_retry_budget() {
    let (_broker, queue) = engine();
    let dispatcher = Arc::new(MockDispatcher::new_fail_times(2, "connection refused"));
    let worker = worker_with(&queue, Arc::clone(&dispatcher), 3);
    worker.start().await.unwrap();

    let job_id = queue
        .submit_job(
            "ITL.Core",
            "ResourceGroup",
            Operation::Create,
            json!({"name": "rg-2"}),
            Priority::default(),
        )
        .await
        .unwrap();

    let result = queue
        .get_result(&job_id, Duration::from_secs(5))
        .await
        .expect("job should complete after retries");
    assert_eq!(result.status, JobStatus::Completed);

    // Three attempts total, but a single terminal outcome.
    assert_eq!(dispatcher.call_count(), 3);
    assert!(wait_until(|| worker.jobs_processed() == 1, Duration::from_secs(2)).await);
    assert_eq!(worker.jobs_failed(), 0);

    let stats = queue.get_queue_stats("ITL.Core").await.unwrap();
    assert_eq!(stats.queues["provider.core.dlq"].message_count, 0);

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_dead_letter_with_final_attempt_count() {
    let (broker, queue) = engine();
    let dispatcher = Arc::new(MockDispatcher::new_fail("service unavailable"));
    let worker = worker_with(&queue, Arc::clone(&dispatcher), 3);
    worker.start().await.unwrap();

    let job_id = queue
        .submit_job(
            "ITL.Core",
            "ResourceGroup",
            Operation::Delete,
            json!({"name": "rg-3"}),
            Priority::default(),
        )
        .await
        .unwrap();

    assert!(wait_until(|| worker.jobs_failed() == 1, Duration::from_secs(5)).await);
    assert_eq!(dispatcher.call_count(), 3);
    assert_eq!(worker.jobs_processed(), 0);

    let result = queue
        .get_result(&job_id, Duration::from_secs(2))
        .await
        .expect("terminal failure is published");
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("service unavailable"));

    worker.stop().await.unwrap();

    let entry = take_dlq_entry(&broker, "provider.core.dlq").await;
    assert_eq!(entry.job_id, job_id);
    assert_eq!(entry.attempt, 3);
}

#[tokio::test]
async fn non_retryable_failure_dead_letters_immediately() {
    let (broker, queue) = engine();
    let dispatcher = Arc::new(MockDispatcher::new_fail("validation error: missing field"));
    let worker = worker_with(&queue, Arc::clone(&dispatcher), 3);
    worker.start().await.unwrap();

    let job_id = queue
        .submit_job(
            "ITL.Core",
            "ResourceGroup",
            Operation::Create,
            json!({"bad": true}),
            Priority::default(),
        )
        .await
        .unwrap();

    assert!(wait_until(|| worker.jobs_failed() == 1, Duration::from_secs(5)).await);

    // First failure is terminal: no retry budget consumed.
    assert_eq!(dispatcher.call_count(), 1);
    assert_eq!(worker.jobs_processed(), 0);

    let stats = queue.get_queue_stats("ITL.Core").await.unwrap();
    assert_eq!(stats.queues["provider.core.dlq"].message_count, 1);

    worker.stop().await.unwrap();

    let entry = take_dlq_entry(&broker, "provider.core.dlq").await;
    assert_eq!(entry.job_id, job_id);
    assert_eq!(entry.attempt, 1);
}

#[tokio::test]
async fn panicking_dispatcher_is_contained_and_terminal() {
    let (_broker, queue) = engine();
    let dispatcher = Arc::new(MockDispatcher::new_panic_inducing("dispatcher exploded"));
    let worker = worker_with(&queue, Arc::clone(&dispatcher), 3);
    worker.start().await.unwrap();

    let job_id = queue
        .submit_job(
            "ITL.Core",
            "ResourceGroup",
            Operation::Action,
            json!({}),
            Priority::default(),
        )
        .await
        .unwrap();

    // The panic becomes a terminal failure, the worker keeps running.
    assert!(wait_until(|| worker.jobs_failed() == 1, Duration::from_secs(5)).await);
    assert!(worker.is_running());

    let result = queue
        .get_result(&job_id, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.error.unwrap().contains("dispatch panicked"));

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn submitted_job_ids_are_unique() {
    let (_broker, queue) = engine();

    let mut seen = HashSet::new();
    for n in 0..50 {
        let job_id = queue
            .submit_job(
                "ITL.Core",
                "ResourceGroup",
                Operation::Get,
                json!({"n": n}),
                Priority::default(),
            )
            .await
            .unwrap();
        assert!(!job_id.is_empty());
        assert!(seen.insert(job_id), "job ids must be unique");
    }
    assert_eq!(seen.len(), 50);
}
