//! Read path: assemble ranked leaderboard pages from the three stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::entities::{RankedPlayer, UserProfile};
use crate::error::ActionError;
use crate::profile_store::ProfileStore;
use crate::score_store::ScoreBoard;
use crate::xp_store::XpCounter;

/// Joins sorted-set rankings with profiles and XP counters.
pub struct LeaderboardService {
    scores: Arc<dyn ScoreBoard>,
    profiles: Arc<dyn ProfileStore>,
    xp: Arc<dyn XpCounter>,
}

impl LeaderboardService {
    pub fn new(
        scores: Arc<dyn ScoreBoard>,
        profiles: Arc<dyn ProfileStore>,
        xp: Arc<dyn XpCounter>,
    ) -> Self {
        Self {
            scores,
            profiles,
            xp,
        }
    }

    /// Every active leaderboard with its ranked, profile-joined rows.
    pub async fn all_leaderboards(
        &self,
    ) -> Result<BTreeMap<i32, Vec<RankedPlayer>>, ActionError> {
        let ids = self.scores.leaderboard_ids().await?;
        let mut boards = BTreeMap::new();
        for id in ids {
            boards.insert(id, self.leaderboard(id).await?);
        }
        Ok(boards)
    }

    /// One leaderboard's top rows joined with nickname and authoritative
    /// XP. Ranked users whose profile is gone (purged out of band) are
    /// omitted.
    pub async fn leaderboard(&self, leaderboard: i32) -> Result<Vec<RankedPlayer>, ActionError> {
        let rows = self.scores.top_n(leaderboard).await?;

        let user_ids: Vec<String> = rows.iter().map(|row| row.user_id.clone()).collect();
        let uuids: Vec<Uuid> = user_ids
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();

        let profiles = self.profiles.profiles(&uuids).await?;
        let xp = self.xp.many_xp(&user_ids).await?;

        let by_id: BTreeMap<String, UserProfile> = profiles
            .into_iter()
            .map(|mut profile| {
                // The counter is authoritative over any stale profile XP.
                profile.xp = xp.get(&profile.id.to_string()).copied().unwrap_or(0);
                (profile.id.to_string(), profile)
            })
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                by_id.get(&row.user_id).map(|profile| RankedPlayer {
                    nickname: profile.nickname.clone(),
                    row,
                })
            })
            .collect())
    }
}
