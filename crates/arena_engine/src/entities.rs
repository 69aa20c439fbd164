//! Wire and storage entities shared across the engine.
//!
//! JSON field names are part of the external contract (HTTP bodies and the
//! Kafka payload) and must not drift.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Durable per-user record owned by the profile store.
///
/// `xp` is not persisted in the profile table; it defaults to 0 and is
/// overwritten from the XP counter by the query surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Uuid,
    pub nickname: String,
    #[serde(default)]
    pub xp: i64,
    pub level: i32,
    pub leaderboard: i32,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// A client-submitted game action as it travels through the durable log.
///
/// `leaderboard_id` is stamped server-side from the user's profile at
/// ingress; any client-provided value never reaches this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameAction {
    pub user_id: String,
    pub leaderboard_id: i32,
    pub action: String,
    pub timestamp: f64,
}

/// One ranked leaderboard entry as read from the sorted-set store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub leaderboard: i32,
    pub user_id: String,
    pub score: i64,
    pub position: i32,
}

/// A leaderboard row joined with the user's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedPlayer {
    #[serde(flatten)]
    pub row: LeaderboardRow,
    pub nickname: String,
}

/// Body of `POST /api/v1/users/sign-up`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub nickname: String,
}

/// Body of `POST /api/v1/users/actions`.
///
/// Deliberately has no `leaderboard_id` field so clients cannot target
/// arbitrary leaderboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub user_id: String,
    pub action: String,
    pub timestamp: f64,
}

/// Milliseconds since the Unix epoch, saturating at zero on clock skew.
pub fn unix_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
