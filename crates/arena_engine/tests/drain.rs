//! Shutdown drain behaviour: full queues block the dispatcher, closure
//! drains in-flight work, and outputs close only after the grace window.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arena_engine::entities::LeaderboardRow;
use arena_engine::error::ActionError;
use arena_engine::pipeline::start_workers;
use arena_engine::score_store::{MemoryScoreBoard, ScoreBoard};
use arena_engine::shutdown::Lifecycle;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use arena_engine::profile_store::{MemoryProfileStore, ProfileStore};

use common::{action, harness_with};

/// Score board whose writes block until the test hands out permits,
/// simulating a slow backend store holding a worker mid-message.
struct GatedScores {
    inner: Arc<MemoryScoreBoard>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ScoreBoard for GatedScores {
    async fn add_user(&self, leaderboard: i32, user_id: &str) -> Result<(), ActionError> {
        self.inner.add_user(leaderboard, user_id).await
    }

    async fn update_score(
        &self,
        leaderboard: i32,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, ActionError> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.inner.update_score(leaderboard, user_id, delta).await
    }

    async fn top_n(&self, leaderboard: i32) -> Result<Vec<LeaderboardRow>, ActionError> {
        self.inner.top_n(leaderboard).await
    }

    async fn leaderboard_ids(&self) -> Result<Vec<i32>, ActionError> {
        self.inner.leaderboard_ids().await
    }

    async fn purge(&self) -> Result<(), ActionError> {
        self.inner.purge().await
    }
}

#[tokio::test]
async fn full_queue_drains_before_outputs_close() {
    let profiles = Arc::new(MemoryProfileStore::new());
    let gate = Arc::new(Semaphore::new(0));
    let scores = Arc::new(MemoryScoreBoard::new());
    let gated = Arc::new(GatedScores {
        inner: scores.clone(),
        gate: gate.clone(),
    });
    let h = harness_with(profiles.clone(), profiles.clone(), Some(gated));

    let user = h.profiles.sign_up("D", 1).await.unwrap();
    let user_id = user.id.to_string();

    // One worker with a queue of four: one message in flight blocked on
    // the gate, four more filling the queue to capacity.
    let (dispatcher, pool) = start_workers(1, 4, h.service.clone(), h.metrics.clone());
    for _ in 0..5 {
        dispatcher.route(action(&user_id, 1, "goal")).await.unwrap();
    }

    // Backpressure: with the queue full, the next route call blocks.
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        dispatcher.route(action(&user_id, 1, "goal")),
    )
    .await;
    assert!(blocked.is_err(), "route should block while the queue is full");

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut lifecycle = Lifecycle::new(Duration::from_millis(50));
    lifecycle.on_input_close("action pipeline", {
        let events = events.clone();
        let gate = gate.clone();
        async move {
            // Closing the queues stops new messages from entering.
            drop(dispatcher);
            // The backend recovers; the worker can drain what is queued.
            gate.add_permits(100);
            pool.join().await;
            events.lock().unwrap().push("drained");
        }
    });
    lifecycle.on_output_close("stores", {
        let events = events.clone();
        async move {
            events.lock().unwrap().push("outputs-closed");
        }
    });

    lifecycle.shutdown().await;

    // Outputs closed strictly after the drain finished.
    assert_eq!(*events.lock().unwrap(), vec!["drained", "outputs-closed"]);
    // Every message that made it into the queues was applied.
    assert_eq!(scores.score(1, &user_id), Some(50));
    assert_eq!(h.metrics.snapshot().actions_processed, 5);
}
