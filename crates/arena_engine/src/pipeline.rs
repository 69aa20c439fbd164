//! The partitioned worker pipeline: log consumer, dispatcher, and workers.
//!
//! A single consumer pulls from the log and routes each decoded action
//! into one of N bounded in-memory queues selected by
//! `leaderboard_id mod N`; one worker drains each queue strictly in order.
//! Sharding by leaderboard keeps every update to one sorted set on the
//! same worker, so per-leaderboard ordering holds end-to-end. A full queue
//! blocks the dispatcher, which halts log consumption: backpressure is the
//! throttle.
//!
//! Offsets are committed by the log client on its own 1 s timer,
//! independent of per-message processing: delivery is at-least-once and a
//! crash can replay up to one second of the stream. A message whose
//! handler fails is logged and dropped.

use std::sync::Arc;

use anyhow::Context;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionService;
use crate::config::AppConfig;
use crate::entities::GameAction;
use crate::metrics::{bump, EngineMetrics};

/// Routes decoded actions into per-worker queues.
///
/// Dropping the dispatcher closes every queue; workers then drain
/// naturally.
pub struct Dispatcher {
    senders: Vec<mpsc::Sender<GameAction>>,
    metrics: Arc<EngineMetrics>,
}

impl Dispatcher {
    /// Queue index for a leaderboard: `leaderboard_id mod N`.
    pub fn queue_index(&self, leaderboard_id: i32) -> usize {
        leaderboard_id.rem_euclid(self.senders.len() as i32) as usize
    }

    /// Enqueue one action on its leaderboard's queue. Blocks while the
    /// queue is full; fails only once the pipeline has shut down.
    pub async fn route(&self, action: GameAction) -> anyhow::Result<()> {
        let index = self.queue_index(action.leaderboard_id);
        self.senders[index]
            .send(action)
            .await
            .map_err(|_| anyhow::anyhow!("worker queue {index} is closed"))?;
        bump(&self.metrics.messages_dispatched);
        Ok(())
    }
}

/// Handles of the spawned worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Wait for every worker to drain its queue and exit. Queues close
    /// when the dispatcher is dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
    }
}

/// Spawn `worker_count` workers with `queue_buffer`-deep queues.
pub fn start_workers(
    worker_count: usize,
    queue_buffer: usize,
    service: Arc<ActionService>,
    metrics: Arc<EngineMetrics>,
) -> (Dispatcher, WorkerPool) {
    assert!(worker_count > 0, "worker pool requires at least one worker");
    let mut senders = Vec::with_capacity(worker_count);
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let (tx, rx) = mpsc::channel(queue_buffer);
        senders.push(tx);
        handles.push(tokio::spawn(run_worker(
            worker_id,
            rx,
            service.clone(),
            metrics.clone(),
        )));
    }

    (
        Dispatcher { senders, metrics },
        WorkerPool { handles },
    )
}

/// Drain one queue in order until it closes. One bad message never stalls
/// the queue: failures are logged and the message is dropped.
async fn run_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<GameAction>,
    service: Arc<ActionService>,
    metrics: Arc<EngineMetrics>,
) {
    while let Some(action) = rx.recv().await {
        if let Err(err) = service.handle(&action).await {
            bump(&metrics.handler_failures);
            tracing::error!(
                worker = worker_id,
                user_id = %action.user_id,
                leaderboard = action.leaderboard_id,
                error = %err,
                "failed to handle action"
            );
        }
    }
    tracing::debug!(worker = worker_id, "worker queue closed");
}

/// Build the log consumer with the configured fetch bounds and a 1 s
/// auto-commit interval.
pub fn build_consumer(config: &AppConfig) -> anyhow::Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("group.id", &config.kafka_consumer_group_id)
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        .set("auto.offset.reset", "earliest")
        .set("fetch.min.bytes", config.kafka_fetch_min_bytes.to_string())
        .set("fetch.max.bytes", config.kafka_fetch_max_bytes.to_string())
        .set(
            "fetch.wait.max.ms",
            config.kafka_fetch_max_wait.as_millis().to_string(),
        )
        .create()
        .context("create kafka consumer")?;
    consumer
        .subscribe(&[&config.kafka_topic])
        .context("subscribe to action topic")?;
    Ok(consumer)
}

/// Pull messages and route them until cancelled.
///
/// Owns the dispatcher: when this loop exits the queues close and workers
/// drain. Decode failures are poison messages; they are logged and skipped
/// while the client keeps committing offsets on its timer.
pub async fn run_consumer(
    consumer: StreamConsumer,
    dispatcher: Dispatcher,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = consumer.recv() => message,
        };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "error while fetching messages from the log");
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                continue;
            }
        };
        let Some(payload) = message.payload() else {
            continue;
        };
        let action: GameAction = match serde_json::from_slice(payload) {
            Ok(action) => action,
            Err(err) => {
                tracing::error!(error = %err, "failed to decode game action payload");
                continue;
            }
        };
        if let Err(err) = dispatcher.route(action).await {
            tracing::error!(error = %err, "dispatch failed, stopping consumer");
            break;
        }
    }
    tracing::info!("log consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EngineMetrics;

    fn dispatcher_with(n: usize) -> Dispatcher {
        let senders = (0..n).map(|_| mpsc::channel(1).0).collect();
        Dispatcher {
            senders,
            metrics: EngineMetrics::new(),
        }
    }

    #[test]
    fn queue_index_is_leaderboard_mod_workers() {
        let dispatcher = dispatcher_with(5);
        assert_eq!(dispatcher.queue_index(0), 0);
        assert_eq!(dispatcher.queue_index(3), 3);
        assert_eq!(dispatcher.queue_index(5), 0);
        assert_eq!(dispatcher.queue_index(12), 2);
    }

    #[test]
    fn same_leaderboard_always_maps_to_one_queue() {
        let dispatcher = dispatcher_with(3);
        let first = dispatcher.queue_index(7);
        for _ in 0..10 {
            assert_eq!(dispatcher.queue_index(7), first);
        }
    }
}
