//! Sorted-set score engine.
//!
//! This module provides the `ScoreBoard` abstraction and two
//! implementations: `RedisScoreBoard` against a real sorted-set store and
//! `MemoryScoreBoard` for tests. The redis key layout is part of the
//! protocol: the `{…}` segments are co-location hints for clustered
//! deployments and must be kept verbatim.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis_protocol::resp2::types::BytesFrame;

use crate::entities::LeaderboardRow;
use crate::error::ActionError;
use crate::resp::{arg, as_exec_results, as_f64, as_string_array, check_error, command_frame, RespClient};

/// Reverse-rank range read by `top_n`: ranks 0..=10, eleven entries.
const TOP_RANGE_END: i64 = 10;

/// Score engine API: per-leaderboard sorted scores plus the set of active
/// leaderboard ids.
#[async_trait]
pub trait ScoreBoard: Send + Sync {
    /// Record the leaderboard as active and add the member with score 0.
    /// Idempotent: re-adding an existing member leaves its score alone.
    async fn add_user(&self, leaderboard: i32, user_id: &str) -> Result<(), ActionError>;

    /// Atomically increment the member's score and return the new value.
    /// The returned score reflects exactly this increment.
    async fn update_score(
        &self,
        leaderboard: i32,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, ActionError>;

    /// Highest-scoring members in descending order, position = rank + 1.
    async fn top_n(&self, leaderboard: i32) -> Result<Vec<LeaderboardRow>, ActionError>;

    /// All leaderboard ids known to contain data.
    async fn leaderboard_ids(&self) -> Result<Vec<i32>, ActionError>;

    /// Administrative wipe of all keys.
    async fn purge(&self) -> Result<(), ActionError>;
}

fn board_key(leaderboard: i32) -> String {
    format!("leaderboard:{{{leaderboard}}}:data")
}

/// `ScoreBoard` backed by a redis sorted set per leaderboard.
pub struct RedisScoreBoard {
    client: Arc<RespClient>,
}

impl RedisScoreBoard {
    pub fn new(client: Arc<RespClient>) -> Self {
        Self { client }
    }

    async fn mark_active(&self, leaderboard: i32) -> Result<(), ActionError> {
        let reply = self
            .client
            .command(&[arg("SADD"), arg("leaderboards"), arg(leaderboard)])
            .await?;
        check_error(&reply)?;
        Ok(())
    }

    async fn read_score(&self, key: &str, user_id: &str) -> Result<i64, ActionError> {
        let reply = self
            .client
            .command(&[arg("ZSCORE"), arg(key), arg(user_id)])
            .await?;
        Ok(as_f64(&reply)? as i64)
    }
}

/// Pull the post-increment score out of an `EXEC` reply.
fn exec_new_score(exec: Option<&BytesFrame>) -> anyhow::Result<i64> {
    let exec = exec.ok_or_else(|| anyhow::anyhow!("empty EXEC reply"))?;
    let results = as_exec_results(exec)?;
    if results.len() < 2 {
        return Err(anyhow::anyhow!(
            "unexpected number of results from score transaction"
        ));
    }
    Ok(as_f64(&results[1])? as i64)
}

#[async_trait]
impl ScoreBoard for RedisScoreBoard {
    async fn add_user(&self, leaderboard: i32, user_id: &str) -> Result<(), ActionError> {
        self.mark_active(leaderboard).await?;
        let reply = self
            .client
            .command(&[arg("ZADD"), arg(board_key(leaderboard)), arg(0), arg(user_id)])
            .await?;
        check_error(&reply)?;
        Ok(())
    }

    async fn update_score(
        &self,
        leaderboard: i32,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, ActionError> {
        self.mark_active(leaderboard).await?;
        let key = board_key(leaderboard);
        // Increment and read back inside one transaction so the returned
        // value reflects exactly this increment.
        let frames = [
            command_frame(&[arg("MULTI")]),
            command_frame(&[arg("ZINCRBY"), arg(&key), arg(delta), arg(user_id)]),
            command_frame(&[arg("ZSCORE"), arg(&key), arg(user_id)]),
            command_frame(&[arg("EXEC")]),
        ];
        let replies = self.client.pipeline(&frames).await?;
        for reply in &replies {
            check_error(reply)?;
        }
        // Once EXEC succeeds the increment is committed. If the read
        // inside the reply is lost or unparseable, retry the read alone;
        // re-running the transaction would apply the delta twice.
        match exec_new_score(replies.last()) {
            Ok(new_score) => Ok(new_score),
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    user_id = %user_id,
                    error = %err,
                    "score read lost after increment, retrying read"
                );
                self.read_score(&key, user_id).await
            }
        }
    }

    async fn top_n(&self, leaderboard: i32) -> Result<Vec<LeaderboardRow>, ActionError> {
        let reply = self
            .client
            .command(&[
                arg("ZRANGE"),
                arg(board_key(leaderboard)),
                arg(0),
                arg(TOP_RANGE_END),
                arg("REV"),
                arg("WITHSCORES"),
            ])
            .await?;
        let flat = as_string_array(&reply)?;
        let mut rows = Vec::with_capacity(flat.len() / 2);
        for (rank, pair) in flat.chunks_exact(2).enumerate() {
            let score = pair[1]
                .parse::<f64>()
                .map_err(|err| anyhow::anyhow!("parse score {:?}: {err}", pair[1]))?;
            rows.push(LeaderboardRow {
                leaderboard,
                user_id: pair[0].clone(),
                score: score as i64,
                position: rank as i32 + 1,
            });
        }
        Ok(rows)
    }

    async fn leaderboard_ids(&self) -> Result<Vec<i32>, ActionError> {
        let reply = self
            .client
            .command(&[arg("SMEMBERS"), arg("leaderboards")])
            .await?;
        let members = as_string_array(&reply)?;
        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            ids.push(
                member
                    .parse::<i32>()
                    .map_err(|err| anyhow::anyhow!("parse leaderboard id {member:?}: {err}"))?,
            );
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn purge(&self) -> Result<(), ActionError> {
        let reply = self.client.command(&[arg("FLUSHALL")]).await?;
        check_error(&reply)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryScores {
    boards: BTreeMap<i32, BTreeMap<String, i64>>,
    active: BTreeSet<i32>,
    // Order of applied increments, kept for ordering assertions in tests.
    applied: Vec<(i32, String, i64)>,
}

/// In-memory `ScoreBoard` used by tests and local development.
#[derive(Default)]
pub struct MemoryScoreBoard {
    inner: RwLock<MemoryScores>,
}

impl MemoryScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence of `(leaderboard, user, delta)` increments applied so
    /// far, in application order.
    pub fn applied_log(&self) -> Vec<(i32, String, i64)> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner()).applied.clone()
    }

    /// Current raw score for a member, if present.
    pub fn score(&self, leaderboard: i32, user_id: &str) -> Option<i64> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .boards
            .get(&leaderboard)
            .and_then(|board| board.get(user_id).copied())
    }
}

#[async_trait]
impl ScoreBoard for MemoryScoreBoard {
    async fn add_user(&self, leaderboard: i32, user_id: &str) -> Result<(), ActionError> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.active.insert(leaderboard);
        guard
            .boards
            .entry(leaderboard)
            .or_default()
            .entry(user_id.to_string())
            .or_insert(0);
        Ok(())
    }

    async fn update_score(
        &self,
        leaderboard: i32,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, ActionError> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.active.insert(leaderboard);
        let board = guard.boards.entry(leaderboard).or_default();
        let score = board.entry(user_id.to_string()).or_insert(0);
        *score += delta;
        let new_score = *score;
        guard.applied.push((leaderboard, user_id.to_string(), delta));
        Ok(new_score)
    }

    async fn top_n(&self, leaderboard: i32) -> Result<Vec<LeaderboardRow>, ActionError> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(board) = guard.boards.get(&leaderboard) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(&String, &i64)> = board.iter().collect();
        // Mirror ZRANGE REV: score descending, then member in reverse
        // lexicographic order for ties.
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| b.0.cmp(a.0)));
        Ok(entries
            .into_iter()
            .take(TOP_RANGE_END as usize + 1)
            .enumerate()
            .map(|(rank, (user_id, score))| LeaderboardRow {
                leaderboard,
                user_id: user_id.clone(),
                score: *score,
                position: rank as i32 + 1,
            })
            .collect())
    }

    async fn leaderboard_ids(&self) -> Result<Vec<i32>, ActionError> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.active.iter().copied().collect())
    }

    async fn purge(&self) -> Result<(), ActionError> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = MemoryScores::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_user_is_idempotent() {
        let board = MemoryScoreBoard::new();
        board.add_user(1, "u1").await.unwrap();
        board.update_score(1, "u1", 7).await.unwrap();
        board.add_user(1, "u1").await.unwrap();
        assert_eq!(board.score(1, "u1"), Some(7));
    }

    #[tokio::test]
    async fn update_score_returns_running_sum() {
        let board = MemoryScoreBoard::new();
        assert_eq!(board.update_score(3, "u1", 10).await.unwrap(), 10);
        assert_eq!(board.update_score(3, "u1", -4).await.unwrap(), 6);
        assert_eq!(board.leaderboard_ids().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn top_n_orders_by_score_and_caps_at_eleven() {
        let board = MemoryScoreBoard::new();
        for i in 0..15 {
            board
                .update_score(1, &format!("u{i:02}"), i as i64)
                .await
                .unwrap();
        }
        let rows = board.top_n(1).await.unwrap();
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0].user_id, "u14");
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[10].user_id, "u04");
        assert_eq!(rows[10].position, 11);
    }

    #[tokio::test]
    async fn purge_empties_every_board() {
        let board = MemoryScoreBoard::new();
        board.update_score(1, "u1", 5).await.unwrap();
        board.update_score(2, "u2", 5).await.unwrap();
        board.purge().await.unwrap();
        assert!(board.top_n(1).await.unwrap().is_empty());
        assert!(board.top_n(2).await.unwrap().is_empty());
        assert!(board.leaderboard_ids().await.unwrap().is_empty());
    }

    #[test]
    fn board_keys_keep_colocation_braces() {
        assert_eq!(board_key(7), "leaderboard:{7}:data");
    }
}
