//! In-process counters for the action pipeline.
//!
//! These are intentionally lightweight and lock-free so they can be bumped
//! on the hot path. A periodic stats line is the only export surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Aggregated counters for produced, dispatched, and handled actions.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Actions accepted at ingress and appended to the log.
    pub actions_produced: AtomicU64,
    /// Messages decoded and routed into a worker queue.
    pub messages_dispatched: AtomicU64,
    /// Actions fully handled by a worker.
    pub actions_processed: AtomicU64,
    /// Handler calls that failed; the message was logged and dropped.
    pub handler_failures: AtomicU64,
    /// Level promotions applied via CAS.
    pub promotions_applied: AtomicU64,
    /// Level promotions dropped because the CAS lost a race.
    pub promotions_race_lost: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub actions_produced: u64,
    pub messages_dispatched: u64,
    pub actions_processed: u64,
    pub handler_failures: u64,
    pub promotions_applied: u64,
    pub promotions_race_lost: u64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            actions_produced: self.actions_produced.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            actions_processed: self.actions_processed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            promotions_applied: self.promotions_applied.load(Ordering::Relaxed),
            promotions_race_lost: self.promotions_race_lost.load(Ordering::Relaxed),
        }
    }
}

/// Increment helper used across the pipeline.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Spawn a task that logs a stats line every `interval` until cancelled.
pub fn spawn_stats_logger(
    metrics: Arc<EngineMetrics>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = metrics.snapshot();
                    tracing::info!(
                        produced = snap.actions_produced,
                        dispatched = snap.messages_dispatched,
                        processed = snap.actions_processed,
                        failures = snap.handler_failures,
                        promotions = snap.promotions_applied,
                        race_lost = snap.promotions_race_lost,
                        "pipeline stats"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let metrics = EngineMetrics::new();
        bump(&metrics.actions_processed);
        bump(&metrics.actions_processed);
        bump(&metrics.promotions_race_lost);
        let snap = metrics.snapshot();
        assert_eq!(snap.actions_processed, 2);
        assert_eq!(snap.promotions_race_lost, 1);
        assert_eq!(snap.handler_failures, 0);
    }
}
