//! NATS JetStream implementation of the broker port.
//!
//! Queues map to streams with work-queue retention and durable pull
//! consumers with explicit acknowledgement, which gives the at-least-once
//! delivery and redelivery-on-missing-ack semantics the port requires.
//! Multiple worker processes share one durable consumer per queue, so the
//! broker load-balances jobs across them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use offloadq_core::domain::Priority;
use offloadq_core::port::broker::{
    Acker, Broker, BrokerError, Delivery, DeliveryStream, QueueStats,
};

/// Message header carrying the advisory job priority.
const PRIORITY_HEADER: &str = "Offloadq-Priority";

/// Prefix isolating this subsystem's streams on a shared JetStream domain.
const STREAM_PREFIX: &str = "OFFLOADQ";

/// How long a fetch waits server-side before returning an empty batch.
const FETCH_EXPIRES: Duration = Duration::from_millis(500);

/// Pause after a fetch error before retrying.
const FETCH_RETRY_SLEEP: Duration = Duration::from_secs(1);

/// Redelivery window for unacknowledged messages.
const ACK_WAIT: Duration = Duration::from_secs(30);

/// Queue message retention bound (deployment parameter, not an invariant).
const MAX_MESSAGE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// NATS connection configuration with production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Request timeout in seconds (None = no timeout)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Max reconnection attempts
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,
    /// Client connection name
    #[serde(default)]
    pub client_name: Option<String>,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> Option<u64> {
    Some(30)
}

const fn default_max_reconnects() -> usize {
    5
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connection_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_reconnects: default_max_reconnects(),
            client_name: None,
        }
    }
}

impl NatsConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Broker port implementation over NATS JetStream.
pub struct NatsBroker {
    client: Client,
    jetstream: JetStreamContext,
    // Streams already verified or created this process lifetime.
    known_streams: Arc<Mutex<HashSet<String>>>,
}

impl NatsBroker {
    /// Connect to NATS and set up the JetStream context.
    pub async fn connect(config: NatsConfig) -> Result<Self, BrokerError> {
        let mut options = ConnectOptions::default()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .max_reconnects(config.max_reconnects);

        if let Some(timeout_secs) = config.request_timeout_secs {
            options = options.request_timeout(Some(Duration::from_secs(timeout_secs)));
        }
        if let Some(name) = &config.client_name {
            options = options.name(name);
        }

        let client = async_nats::connect_with_options(&config.url, options)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        info!(url = %config.url, "Connected to NATS");
        Ok(Self {
            client,
            jetstream,
            known_streams: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Stream name for a queue: `provider.compute.requests` becomes
    /// `OFFLOADQ_PROVIDER_COMPUTE_REQUESTS`.
    fn stream_name(queue: &str) -> String {
        format!(
            "{}_{}",
            STREAM_PREFIX,
            queue.to_uppercase().replace(['.', '-'], "_")
        )
    }

    fn consumer_name(queue: &str) -> String {
        format!("{}-consumer", queue.replace('.', "-"))
    }

    async fn ensure_stream(
        &self,
        queue: &str,
    ) -> Result<async_nats::jetstream::stream::Stream, BrokerError> {
        let stream_name = Self::stream_name(queue);

        {
            let known = self.known_streams.lock().await;
            if known.contains(&stream_name) {
                // Still fetch the handle; it is a cheap lookup once the
                // stream is known to exist.
                drop(known);
                return self
                    .jetstream
                    .get_stream(&stream_name)
                    .await
                    .map_err(|e| BrokerError::Connection(e.to_string()));
            }
        }

        // The stream may exist from a previous process run.
        if let Ok(stream) = self.jetstream.get_stream(&stream_name).await {
            debug!(stream = %stream_name, "Stream already exists");
            self.known_streams.lock().await.insert(stream_name);
            return Ok(stream);
        }

        info!(stream = %stream_name, queue = %queue, "Creating stream");
        let stream_config = StreamConfig {
            name: stream_name.clone(),
            subjects: vec![queue.to_string()],
            retention: async_nats::jetstream::stream::RetentionPolicy::WorkQueue,
            max_age: MAX_MESSAGE_AGE,
            storage: async_nats::jetstream::stream::StorageType::File,
            num_replicas: 1,
            discard: async_nats::jetstream::stream::DiscardPolicy::Old,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .create_stream(stream_config)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        self.known_streams.lock().await.insert(stream_name);
        Ok(stream)
    }

    async fn get_or_create_consumer(&self, queue: &str) -> Result<PullConsumer, BrokerError> {
        let mut stream = self.ensure_stream(queue).await?;
        let consumer_name = Self::consumer_name(queue);

        if let Ok(consumer) = stream.get_consumer(&consumer_name).await {
            debug!(consumer = %consumer_name, "Consumer already exists");
            return Ok(consumer);
        }

        info!(consumer = %consumer_name, queue = %queue, "Creating durable pull consumer");
        let consumer_config = PullConsumerConfig {
            durable_name: Some(consumer_name.clone()),
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait: ACK_WAIT,
            ..Default::default()
        };

        stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Advisory priority carried in the message headers; absent or
/// unparseable headers fall back to the default.
fn priority_from_headers(headers: Option<&HeaderMap>) -> Priority {
    headers
        .and_then(|h| h.get(PRIORITY_HEADER))
        .and_then(|value| value.as_str().parse::<u8>().ok())
        .and_then(|value| Priority::new(value).ok())
        .unwrap_or_default()
}

struct NatsAcker {
    message: async_nats::jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_stream(queue).await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        priority: Priority,
    ) -> Result<(), BrokerError> {
        self.ensure_stream(queue).await?;

        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, priority.value().to_string().as_str());

        // Await the JetStream ack: the message is on disk when this returns.
        let ack = self
            .jetstream
            .publish_with_headers(queue.to_string(), headers, payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        ack.await.map_err(|e| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;

        debug!(queue = %queue, priority = priority.value(), "Message published");
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Result<DeliveryStream, BrokerError> {
        let consumer = self.get_or_create_consumer(queue).await?;
        let prefetch = prefetch.max(1);
        let queue = queue.to_string();

        let stream = async_stream::stream! {
            loop {
                let batch = consumer
                    .fetch()
                    .max_messages(prefetch)
                    .expires(FETCH_EXPIRES)
                    .messages()
                    .await;

                let mut messages = match batch {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Fetch failed");
                        tokio::time::sleep(FETCH_RETRY_SLEEP).await;
                        continue;
                    }
                };

                let mut page = Vec::new();
                while let Some(item) = messages.next().await {
                    match item {
                        Ok(message) => page.push(message),
                        Err(e) => {
                            warn!(queue = %queue, error = %e, "Dropping errored fetch item");
                        }
                    }
                }

                // Scheduling preference: within a batch of simultaneously
                // available messages, hand out higher priorities first.
                page.sort_by_key(|m| {
                    std::cmp::Reverse(priority_from_headers(m.headers.as_ref()))
                });
                for message in page {
                    let payload = message.payload.to_vec();
                    yield Delivery::new(payload, Box::new(NatsAcker { message }));
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats, BrokerError> {
        let stream_name = Self::stream_name(queue);
        let mut stream = match self.jetstream.get_stream(&stream_name).await {
            Ok(stream) => stream,
            // Undeclared queues report zeroes rather than erroring.
            Err(_) => return Ok(QueueStats::default()),
        };
        let info = stream
            .info()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(QueueStats {
            message_count: info.state.messages,
            consumer_count: info.state.consumer_count as u64,
        })
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_are_jetstream_safe() {
        assert_eq!(
            NatsBroker::stream_name("provider.compute.requests"),
            "OFFLOADQ_PROVIDER_COMPUTE_REQUESTS"
        );
        assert_eq!(
            NatsBroker::stream_name("provider.core.dlq"),
            "OFFLOADQ_PROVIDER_CORE_DLQ"
        );
    }

    #[test]
    fn consumer_names_have_no_subject_tokens() {
        assert_eq!(
            NatsBroker::consumer_name("provider.core.requests"),
            "provider-core-requests-consumer"
        );
    }

    #[test]
    fn missing_or_bad_priority_header_defaults() {
        assert_eq!(priority_from_headers(None), Priority::default());

        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, "not-a-number");
        assert_eq!(priority_from_headers(Some(&headers)), Priority::default());

        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, "9");
        assert_eq!(
            priority_from_headers(Some(&headers)),
            Priority::new(9).unwrap()
        );

        // Out of range values also fall back.
        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, "42");
        assert_eq!(priority_from_headers(Some(&headers)), Priority::default());
    }
}
