//! Shared helpers for integration tests.
//!
//! All tests run against the in-memory store variants so the full
//! pipeline can be exercised without Kafka, Redis, or Scylla.

use std::sync::Arc;

use arena_engine::actions::ActionService;
use arena_engine::entities::GameAction;
use arena_engine::metrics::EngineMetrics;
use arena_engine::producer::MemoryActionLog;
use arena_engine::profile_store::{MemoryProfileStore, ProfileStore};
use arena_engine::rules::GameRules;
use arena_engine::score_store::{MemoryScoreBoard, ScoreBoard};
use arena_engine::xp_store::MemoryXpCounter;

/// The literal configuration from the test scenarios: goal 10, assist 4,
/// hat-trick 25, thresholds [5, 20, 100].
pub const TEST_RULES: &str = r#"{
    "actions_score_map": {"goal": 10, "assist": 4, "hat-trick": 25},
    "xp_to_level_thresholds": [5, 20, 100]
}"#;

/// Fully wired action service over in-memory stores.
pub struct Harness {
    pub rules: Arc<GameRules>,
    pub log: Arc<MemoryActionLog>,
    pub scores: Arc<MemoryScoreBoard>,
    pub xp: Arc<MemoryXpCounter>,
    pub profiles: Arc<MemoryProfileStore>,
    pub metrics: Arc<EngineMetrics>,
    pub service: Arc<ActionService>,
}

pub fn harness() -> Harness {
    let profiles = Arc::new(MemoryProfileStore::new());
    harness_with(profiles.clone(), profiles, None)
}

/// Build a harness with a custom profile-store view for the handler while
/// keeping direct access to the underlying memory store, and optionally a
/// wrapped score board.
pub fn harness_with(
    profiles: Arc<MemoryProfileStore>,
    handler_profiles: Arc<dyn ProfileStore>,
    handler_scores: Option<Arc<dyn ScoreBoard>>,
) -> Harness {
    let rules = Arc::new(GameRules::from_json(TEST_RULES).expect("test rules parse"));
    let log = Arc::new(MemoryActionLog::new());
    let scores = Arc::new(MemoryScoreBoard::new());
    let xp = Arc::new(MemoryXpCounter::new());
    let metrics = EngineMetrics::new();
    let handler_scores: Arc<dyn ScoreBoard> = match handler_scores {
        Some(scores) => scores,
        None => scores.clone(),
    };
    let service = Arc::new(ActionService::new(
        rules.clone(),
        log.clone(),
        handler_scores,
        xp.clone(),
        handler_profiles,
        metrics.clone(),
    ));
    Harness {
        rules,
        log,
        scores,
        xp,
        profiles,
        metrics,
        service,
    }
}

/// A decoded action as the dispatcher would see it.
pub fn action(user_id: &str, leaderboard_id: i32, key: &str) -> GameAction {
    GameAction {
        user_id: user_id.to_string(),
        leaderboard_id,
        action: key.to_string(),
        timestamp: 0.0,
    }
}
