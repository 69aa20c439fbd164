//! Durable user profiles in a wide-column store.
//!
//! The Scylla implementation bootstraps the `leaderboard` keyspace and
//! `user_profile` table at startup with a short-lived DDL session, then
//! opens the main session with quorum consistency and token-aware routing.
//! Level promotion is the only conditional write and goes through an LWT.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::CqlTimestamp;
use scylla::prepared_statement::PreparedStatement;
use scylla::statement::{Consistency, SerialConsistency};
use scylla::transport::session::PoolSize;
use scylla::{Session, SessionBuilder};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{unix_time_ms, UserProfile};
use crate::error::ActionError;

/// Profile store API. The store exclusively owns `UserProfile` rows;
/// `level` is mutated only through `update_level`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Mint a profile with a random id and the given leaderboard
    /// assignment, persist it, and return the materialized row.
    async fn sign_up(&self, nickname: &str, leaderboard: i32) -> Result<UserProfile, ActionError>;

    /// Strong-consistency point read.
    async fn profile(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError>;

    /// Low-consistency point read for non-critical paths.
    async fn profile_eventual(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError>;

    /// Bulk read by primary key. Unknown ids are simply absent from the
    /// result.
    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, ActionError>;

    /// Linearizable compare-and-set on `level`. Returns false when the
    /// expected level no longer matches.
    async fn update_level(&self, id: Uuid, expected: i32, next: i32)
        -> Result<bool, ActionError>;

    /// Administrative truncate.
    async fn purge(&self) -> Result<(), ActionError>;
}

const SELECT_COLUMNS: &str = "id, nickname, level, leaderboard, created_at";

type ProfileRow = (Uuid, String, i32, i32, CqlTimestamp);

fn row_to_profile(row: ProfileRow) -> UserProfile {
    let (id, nickname, level, leaderboard, created_at) = row;
    UserProfile {
        id,
        nickname,
        xp: 0,
        level,
        leaderboard,
        created_at: created_at.0,
    }
}

/// `ProfileStore` backed by Scylla.
pub struct ScyllaProfileStore {
    session: Session,
    insert: PreparedStatement,
    select_one: PreparedStatement,
    select_one_eventual: PreparedStatement,
    select_many: PreparedStatement,
    cas_level: PreparedStatement,
}

impl ScyllaProfileStore {
    /// Create schema if absent, then open the tuned main session.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        // DDL session: minimal config, no keyspace.
        let ddl = SessionBuilder::new()
            .known_node(&config.scylla_url)
            .build()
            .await
            .context("connect ddl session to scylla")?;
        ddl.query(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS leaderboard WITH replication = \
                 {{'class': '{}', 'replication_factor': {}}}",
                config.scylla_replication_class, config.scylla_replication_factor
            ),
            (),
        )
        .await
        .context("create leaderboard keyspace")?;
        ddl.query(
            "CREATE TABLE IF NOT EXISTS leaderboard.user_profile (
                id uuid,
                nickname text,
                level int,
                leaderboard int,
                created_at timestamp,
                PRIMARY KEY (id))",
            (),
        )
        .await
        .context("create user_profile table")?;
        ddl.await_schema_agreement()
            .await
            .context("await schema agreement")?;

        // Main session, tuned for the production queries.
        let session = SessionBuilder::new()
            .known_node(&config.scylla_url)
            .pool_size(PoolSize::PerHost(
                NonZeroUsize::new(config.scylla_num_conns.max(1)).expect("non-zero pool size"),
            ))
            .use_keyspace("leaderboard", false)
            .build()
            .await
            .context("connect main session to scylla")?;

        let mut insert = session
            .prepare(
                "INSERT INTO user_profile (id, nickname, level, leaderboard, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .await
            .context("prepare sign-up insert")?;
        insert.set_consistency(Consistency::Quorum);

        let mut select_one = session
            .prepare(format!(
                "SELECT {SELECT_COLUMNS} FROM user_profile WHERE id = ?"
            ))
            .await
            .context("prepare profile select")?;
        select_one.set_consistency(Consistency::Quorum);

        let mut select_one_eventual = session
            .prepare(format!(
                "SELECT {SELECT_COLUMNS} FROM user_profile WHERE id = ?"
            ))
            .await
            .context("prepare eventual profile select")?;
        select_one_eventual.set_consistency(Consistency::One);

        let mut select_many = session
            .prepare(format!(
                "SELECT {SELECT_COLUMNS} FROM user_profile WHERE id IN ?"
            ))
            .await
            .context("prepare bulk profile select")?;
        select_many.set_consistency(Consistency::Quorum);

        let mut cas_level = session
            .prepare("UPDATE user_profile SET level = ? WHERE id = ? IF level = ?")
            .await
            .context("prepare level cas")?;
        cas_level.set_consistency(Consistency::Quorum);
        cas_level.set_serial_consistency(Some(SerialConsistency::Serial));

        Ok(Self {
            session,
            insert,
            select_one,
            select_one_eventual,
            select_many,
            cas_level,
        })
    }

    async fn read_one(
        &self,
        statement: &PreparedStatement,
        id: Uuid,
    ) -> Result<Option<UserProfile>, ActionError> {
        let result = self
            .session
            .execute(statement, (id,))
            .await
            .context("read user profile")?;
        let row = result
            .maybe_first_row_typed::<ProfileRow>()
            .context("decode user profile row")?;
        Ok(row.map(row_to_profile))
    }
}

#[async_trait]
impl ProfileStore for ScyllaProfileStore {
    async fn sign_up(&self, nickname: &str, leaderboard: i32) -> Result<UserProfile, ActionError> {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            nickname: nickname.to_string(),
            xp: 0,
            level: 0,
            leaderboard,
            created_at: unix_time_ms(),
        };
        self.session
            .execute(
                &self.insert,
                (
                    profile.id,
                    profile.nickname.as_str(),
                    profile.level,
                    profile.leaderboard,
                    CqlTimestamp(profile.created_at),
                ),
            )
            .await
            .context("insert user profile")?;
        Ok(profile)
    }

    async fn profile(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError> {
        self.read_one(&self.select_one, id).await
    }

    async fn profile_eventual(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError> {
        self.read_one(&self.select_one_eventual, id).await
    }

    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, ActionError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .session
            .execute(&self.select_many, (ids.to_vec(),))
            .await
            .context("bulk read user profiles")?;
        let mut profiles = Vec::with_capacity(ids.len());
        for row in result
            .rows_typed::<ProfileRow>()
            .context("decode bulk profile rows")?
        {
            profiles.push(row_to_profile(row.context("decode profile row")?));
        }
        Ok(profiles)
    }

    async fn update_level(
        &self,
        id: Uuid,
        expected: i32,
        next: i32,
    ) -> Result<bool, ActionError> {
        let result = self
            .session
            .execute(&self.cas_level, (next, id, expected))
            .await
            .context("cas user level")?;
        // LWT result arity depends on whether the condition matched, so
        // read the `[applied]` column positionally.
        let applied = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next().flatten())
            .map(|value| matches!(value, CqlValue::Boolean(true)))
            .unwrap_or(false);
        Ok(applied)
    }

    async fn purge(&self) -> Result<(), ActionError> {
        self.session
            .query("TRUNCATE user_profile", ())
            .await
            .context("truncate user_profile")?;
        Ok(())
    }
}

/// In-memory `ProfileStore` used by tests.
#[derive(Default)]
pub struct MemoryProfileStore {
    inner: RwLock<HashMap<Uuid, UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored level out of band, bypassing the CAS. Lets tests
    /// stage the race the handler must lose gracefully.
    pub fn force_level(&self, id: Uuid, level: i32) {
        if let Some(profile) = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner()).get_mut(&id) {
            profile.level = level;
        }
    }

    /// Remove a profile entirely, as an out-of-band purge would.
    pub fn remove(&self, id: Uuid) {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(&id);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn sign_up(&self, nickname: &str, leaderboard: i32) -> Result<UserProfile, ActionError> {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            nickname: nickname.to_string(),
            xp: 0,
            level: 0,
            leaderboard,
            created_at: unix_time_ms(),
        };
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn profile(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError> {
        Ok(self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner()).get(&id).cloned())
    }

    async fn profile_eventual(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError> {
        self.profile(id).await
    }

    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, ActionError> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn update_level(
        &self,
        id: Uuid,
        expected: i32,
        next: i32,
    ) -> Result<bool, ActionError> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.get_mut(&id) {
            Some(profile) if profile.level == expected => {
                profile.level = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn purge(&self) -> Result<(), ActionError> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_applies_only_on_expected_level() {
        let store = MemoryProfileStore::new();
        let profile = store.sign_up("A", 1).await.unwrap();
        assert!(store.update_level(profile.id, 0, 1).await.unwrap());
        // Stale expectation: the level moved on already.
        assert!(!store.update_level(profile.id, 0, 2).await.unwrap());
        assert!(store.update_level(profile.id, 1, 2).await.unwrap());
        let stored = store.profile(profile.id).await.unwrap().unwrap();
        assert_eq!(stored.level, 2);
    }

    #[tokio::test]
    async fn bulk_read_skips_unknown_ids() {
        let store = MemoryProfileStore::new();
        let a = store.sign_up("A", 1).await.unwrap();
        let ghost = Uuid::new_v4();
        let profiles = store.profiles(&[a.id, ghost]).await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, a.id);
    }
}
