// Broker Port - contract required from the durable message broker
//
// The subsystem delegates all cross-process coordination to the broker's
// consumer-acknowledgement protocol: persistent queues, bounded-prefetch
// consumption, and redelivery of unacknowledged messages (at-least-once).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Priority;

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Consume on {queue} failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Acknowledge failed: {0}")]
    Ack(String),
}

/// Per-queue counters for operational introspection.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub message_count: u64,
    pub consumer_count: u64,
}

/// Acknowledgement capability attached to a delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Remove the message from the queue permanently.
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// One message handed to a consumer.
///
/// Dropping a delivery without acknowledging leaves the message eligible
/// for redelivery; consumers must tolerate seeing a message twice.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Message broker client.
///
/// Implementations: `NatsBroker` (JetStream, production) and
/// [`memory::MemoryBroker`] (in-process, tests and single-process setups).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Publish a persistent message, returning once the broker has
    /// confirmed storage. `priority` is a scheduling preference, not an
    /// ordering guarantee.
    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        priority: Priority,
    ) -> Result<(), BrokerError>;

    /// Subscribe with at most `prefetch` unacknowledged deliveries in
    /// flight. The stream ends only when the broker side goes away.
    async fn consume(&self, queue: &str, prefetch: usize) -> Result<DeliveryStream, BrokerError>;

    /// Counters for one queue. Undeclared queues report zeroes.
    async fn queue_stats(&self, queue: &str) -> Result<QueueStats, BrokerError>;

    fn is_connected(&self) -> bool;
}

pub mod memory {
    //! In-process broker with real queue semantics.
    //!
    //! Backs the integration tests and single-process deployments: priority
    //! heap per queue, explicit acknowledgement, and redelivery of dropped
    //! unacknowledged messages.

    use super::*;
    use std::cmp::Ordering as CmpOrdering;
    use std::collections::{BinaryHeap, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Idle poll interval of consumer streams.
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    #[derive(Debug)]
    struct QueuedMessage {
        payload: Vec<u8>,
        priority: Priority,
        seq: u64,
    }

    impl PartialEq for QueuedMessage {
        fn eq(&self, other: &Self) -> bool {
            self.seq == other.seq
        }
    }

    impl Eq for QueuedMessage {}

    impl PartialOrd for QueuedMessage {
        fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for QueuedMessage {
        // Highest priority first, FIFO within a priority.
        fn cmp(&self, other: &Self) -> CmpOrdering {
            self.priority
                .cmp(&other.priority)
                .then_with(|| other.seq.cmp(&self.seq))
        }
    }

    #[derive(Default)]
    struct QueueState {
        heap: BinaryHeap<QueuedMessage>,
        consumers: u64,
    }

    struct Shared {
        queues: Mutex<HashMap<String, QueueState>>,
        seq: AtomicU64,
        connected: AtomicBool,
    }

    impl Shared {
        fn push(&self, queue: &str, message: QueuedMessage) {
            let mut queues = self.queues.lock().expect("queue map poisoned");
            queues.entry(queue.to_string()).or_default().heap.push(message);
        }

        fn pop(&self, queue: &str) -> Option<QueuedMessage> {
            let mut queues = self.queues.lock().expect("queue map poisoned");
            queues.get_mut(queue).and_then(|state| state.heap.pop())
        }
    }

    /// In-process [`Broker`] implementation.
    #[derive(Clone)]
    pub struct MemoryBroker {
        shared: Arc<Shared>,
    }

    impl MemoryBroker {
        pub fn new() -> Self {
            Self {
                shared: Arc::new(Shared {
                    queues: Mutex::new(HashMap::new()),
                    seq: AtomicU64::new(0),
                    connected: AtomicBool::new(true),
                }),
            }
        }

        /// Simulate losing the broker connection.
        pub fn disconnect(&self) {
            self.shared.connected.store(false, Ordering::SeqCst);
        }

        pub fn reconnect(&self) {
            self.shared.connected.store(true, Ordering::SeqCst);
        }

        fn ensure_connected(&self) -> Result<(), BrokerError> {
            if self.shared.connected.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BrokerError::Connection("broker unreachable".to_string()))
            }
        }
    }

    impl Default for MemoryBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    struct MemoryAcker {
        shared: Arc<Shared>,
        queue: String,
        message: Mutex<Option<QueuedMessage>>,
        in_flight: Arc<AtomicUsize>,
        settled: AtomicBool,
    }

    impl MemoryAcker {
        fn settle(&self) -> Option<QueuedMessage> {
            if self.settled.swap(true, Ordering::SeqCst) {
                return None;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.message.lock().expect("acker poisoned").take()
        }
    }

    #[async_trait]
    impl Acker for MemoryAcker {
        async fn ack(&self) -> Result<(), BrokerError> {
            self.settle();
            Ok(())
        }
    }

    impl Drop for MemoryAcker {
        // Unacknowledged deliveries go back on the queue.
        fn drop(&mut self) {
            if let Some(message) = self.settle() {
                self.shared.push(&self.queue, message);
            }
        }
    }

    // Decrements the consumer count when a consumer stream is dropped.
    struct ConsumerGuard {
        shared: Arc<Shared>,
        queue: String,
    }

    impl Drop for ConsumerGuard {
        fn drop(&mut self) {
            let mut queues = self.shared.queues.lock().expect("queue map poisoned");
            if let Some(state) = queues.get_mut(&self.queue) {
                state.consumers = state.consumers.saturating_sub(1);
            }
        }
    }

    #[async_trait]
    impl Broker for MemoryBroker {
        async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
            self.ensure_connected()?;
            let mut queues = self.shared.queues.lock().expect("queue map poisoned");
            queues.entry(queue.to_string()).or_default();
            Ok(())
        }

        async fn publish(
            &self,
            queue: &str,
            payload: Vec<u8>,
            priority: Priority,
        ) -> Result<(), BrokerError> {
            self.ensure_connected()?;
            let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst);
            self.shared.push(
                queue,
                QueuedMessage {
                    payload,
                    priority,
                    seq,
                },
            );
            Ok(())
        }

        async fn consume(
            &self,
            queue: &str,
            prefetch: usize,
        ) -> Result<DeliveryStream, BrokerError> {
            self.ensure_connected()?;
            let prefetch = prefetch.max(1);
            {
                let mut queues = self.shared.queues.lock().expect("queue map poisoned");
                queues.entry(queue.to_string()).or_default().consumers += 1;
            }

            let shared = Arc::clone(&self.shared);
            let queue = queue.to_string();
            let guard = ConsumerGuard {
                shared: Arc::clone(&shared),
                queue: queue.clone(),
            };
            let in_flight = Arc::new(AtomicUsize::new(0));

            let stream = async_stream::stream! {
                let _guard = guard;
                loop {
                    if in_flight.load(Ordering::SeqCst) >= prefetch {
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                    match shared.pop(&queue) {
                        Some(message) => {
                            in_flight.fetch_add(1, Ordering::SeqCst);
                            let payload = message.payload.clone();
                            let acker = MemoryAcker {
                                shared: Arc::clone(&shared),
                                queue: queue.clone(),
                                message: Mutex::new(Some(message)),
                                in_flight: Arc::clone(&in_flight),
                                settled: AtomicBool::new(false),
                            };
                            yield Delivery::new(payload, Box::new(acker));
                        }
                        None => {
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                    }
                }
            };

            Ok(Box::pin(stream))
        }

        async fn queue_stats(&self, queue: &str) -> Result<QueueStats, BrokerError> {
            self.ensure_connected()?;
            let queues = self.shared.queues.lock().expect("queue map poisoned");
            Ok(queues
                .get(queue)
                .map(|state| QueueStats {
                    message_count: state.heap.len() as u64,
                    consumer_count: state.consumers,
                })
                .unwrap_or_default())
        }

        fn is_connected(&self) -> bool {
            self.shared.connected.load(Ordering::SeqCst)
        }
    }

}
