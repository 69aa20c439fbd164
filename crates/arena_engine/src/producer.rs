//! Append side of the durable action log.
//!
//! The Kafka implementation keys every record by `user_id` with the
//! murmur2 consistent partitioner so all events for one user land on the
//! same partition. Delivery is at-least-once; the producer does not dedupe.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::config::AppConfig;
use crate::entities::GameAction;
use crate::error::ActionError;

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Append-only log of validated actions.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Append one action; returns only after the log acknowledges.
    async fn publish(&self, action: &GameAction) -> Result<(), ActionError>;

    /// Flush buffered records before shutdown. Best effort.
    fn close(&self) {}
}

/// `ActionLog` backed by a Kafka topic.
pub struct KafkaActionLog {
    producer: FutureProducer,
    topic: String,
}

impl KafkaActionLog {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            // Match the JVM partitioner so the per-user partition mapping
            // is stable across producer implementations.
            .set("partitioner", "murmur2")
            .set("message.timeout.ms", "5000")
            .create()
            .context("create kafka producer")?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl ActionLog for KafkaActionLog {
    async fn publish(&self, action: &GameAction) -> Result<(), ActionError> {
        let payload = serde_json::to_vec(action).context("encode game action")?;
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(action.user_id.as_bytes())
                    .payload(&payload),
                Timeout::After(PRODUCE_TIMEOUT),
            )
            .await
            .map_err(|(err, _)| anyhow!("produce game action: {err}"))?;
        Ok(())
    }

    fn close(&self) {
        if let Err(err) = self.producer.flush(Timeout::After(PRODUCE_TIMEOUT)) {
            tracing::warn!(error = %err, "kafka producer flush failed during shutdown");
        }
    }
}

/// In-memory `ActionLog` used by tests: records published actions in order.
#[derive(Default)]
pub struct MemoryActionLog {
    published: Mutex<Vec<GameAction>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<GameAction> {
        self.published.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl ActionLog for MemoryActionLog {
    async fn publish(&self, action: &GameAction) -> Result<(), ActionError> {
        self.published.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(action.clone());
        Ok(())
    }
}
