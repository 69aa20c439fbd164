//! Lifetime XP counters, one integer per user.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis_protocol::resp2::types::BytesFrame;

use crate::error::ActionError;
use crate::resp::{arg, as_i64, RespClient};

/// Atomic per-user XP counter API.
#[async_trait]
pub trait XpCounter: Send + Sync {
    /// Add `delta` to the user's XP and return the new value.
    async fn increment_xp(&self, user_id: &str, delta: i64) -> Result<i64, ActionError>;

    /// Current XP for a user; 0 when the user has none yet.
    async fn xp(&self, user_id: &str) -> Result<i64, ActionError>;

    /// Bulk read as a sequence of point reads. Missing keys and failed
    /// point reads both come back as 0 so one bad row cannot fail a whole
    /// leaderboard page.
    async fn many_xp(&self, user_ids: &[String]) -> Result<HashMap<String, i64>, ActionError>;
}

fn xp_key(user_id: &str) -> String {
    format!("user:{{{user_id}}}:xp")
}

/// `XpCounter` backed by redis integer counters.
pub struct RedisXpCounter {
    client: Arc<RespClient>,
}

impl RedisXpCounter {
    pub fn new(client: Arc<RespClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl XpCounter for RedisXpCounter {
    async fn increment_xp(&self, user_id: &str, delta: i64) -> Result<i64, ActionError> {
        let reply = self
            .client
            .command(&[arg("INCRBY"), arg(xp_key(user_id)), arg(delta)])
            .await?;
        Ok(as_i64(&reply)?)
    }

    async fn xp(&self, user_id: &str) -> Result<i64, ActionError> {
        let reply = self
            .client
            .command(&[arg("GET"), arg(xp_key(user_id))])
            .await?;
        if matches!(reply, BytesFrame::Null) {
            // No key yet: the user simply has no XP.
            return Ok(0);
        }
        Ok(as_i64(&reply)?)
    }

    async fn many_xp(&self, user_ids: &[String]) -> Result<HashMap<String, i64>, ActionError> {
        // TODO: batch with one MGET per shard once a board page shows up
        // in read latency; point reads match the write-path access pattern
        // for now.
        let mut out = HashMap::with_capacity(user_ids.len());
        for user_id in user_ids {
            let xp = self.xp(user_id).await.unwrap_or(0);
            out.insert(user_id.clone(), xp);
        }
        Ok(out)
    }
}

/// In-memory `XpCounter` used by tests.
#[derive(Default)]
pub struct MemoryXpCounter {
    inner: RwLock<HashMap<String, i64>>,
}

impl MemoryXpCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl XpCounter for MemoryXpCounter {
    async fn increment_xp(&self, user_id: &str, delta: i64) -> Result<i64, ActionError> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let xp = guard.entry(user_id.to_string()).or_insert(0);
        *xp += delta;
        Ok(*xp)
    }

    async fn xp(&self, user_id: &str) -> Result<i64, ActionError> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(user_id).copied().unwrap_or(0))
    }

    async fn many_xp(&self, user_ids: &[String]) -> Result<HashMap<String, i64>, ActionError> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(user_ids
            .iter()
            .map(|id| (id.clone(), guard.get(id).copied().unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_accumulate() {
        let counter = MemoryXpCounter::new();
        assert_eq!(counter.increment_xp("u1", 10).await.unwrap(), 10);
        assert_eq!(counter.increment_xp("u1", 4).await.unwrap(), 14);
        assert_eq!(counter.xp("u1").await.unwrap(), 14);
    }

    #[tokio::test]
    async fn missing_users_read_as_zero() {
        let counter = MemoryXpCounter::new();
        counter.increment_xp("u1", 3).await.unwrap();
        let xp = counter
            .many_xp(&["u1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(xp["u1"], 3);
        assert_eq!(xp["ghost"], 0);
    }

    #[test]
    fn xp_keys_keep_colocation_braces() {
        assert_eq!(xp_key("abc"), "user:{abc}:xp");
    }
}
