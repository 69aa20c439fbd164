//! The action service: ingress validation plus the per-message handler.
//!
//! `submit` runs at HTTP ingress and appends to the durable log; `handle`
//! runs on a worker and applies the score, XP, and level effects. Partial
//! completions are accepted: score and XP are durable the moment their
//! store call returns, and a dropped level promotion is picked up by the
//! next successful action.

use std::sync::Arc;

use uuid::Uuid;

use crate::entities::GameAction;
use crate::error::ActionError;
use crate::metrics::{bump, EngineMetrics};
use crate::producer::ActionLog;
use crate::profile_store::ProfileStore;
use crate::rules::GameRules;
use crate::score_store::ScoreBoard;
use crate::xp_store::XpCounter;

/// What happened to the user's level while handling one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// XP did not clear a new threshold.
    None,
    /// The CAS applied and the user now holds this level.
    Applied(i32),
    /// The CAS did not apply; a concurrent writer got there first. The
    /// promotion is dropped and will be recomputed by a later action.
    RaceLost { target: i32 },
}

/// Report of one fully handled action, for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledAction {
    pub new_score: i64,
    pub new_xp: i64,
    pub promotion: Promotion,
}

/// Validates, produces, and handles game actions.
pub struct ActionService {
    rules: Arc<GameRules>,
    log: Arc<dyn ActionLog>,
    scores: Arc<dyn ScoreBoard>,
    xp: Arc<dyn XpCounter>,
    profiles: Arc<dyn ProfileStore>,
    metrics: Arc<EngineMetrics>,
}

impl ActionService {
    pub fn new(
        rules: Arc<GameRules>,
        log: Arc<dyn ActionLog>,
        scores: Arc<dyn ScoreBoard>,
        xp: Arc<dyn XpCounter>,
        profiles: Arc<dyn ProfileStore>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            rules,
            log,
            scores,
            xp,
            profiles,
            metrics,
        }
    }

    /// Ingress path: validate the action key and the user, stamp the
    /// action's leaderboard from the profile (a client-supplied value is
    /// never trusted), and append to the log.
    pub async fn submit(
        &self,
        user_id: &str,
        action_key: &str,
        timestamp: f64,
    ) -> Result<GameAction, ActionError> {
        if self.rules.score_for(action_key).is_none() {
            return Err(ActionError::invalid(format!("unknown action: {action_key}")));
        }
        let id = parse_user_id(user_id)?;
        let profile = self
            .profiles
            .profile(id)
            .await?
            .ok_or_else(|| ActionError::not_found(user_id))?;

        let action = GameAction {
            user_id: user_id.to_string(),
            leaderboard_id: profile.leaderboard,
            action: action_key.to_string(),
            timestamp,
        };
        self.log.publish(&action).await?;
        bump(&self.metrics.actions_produced);
        Ok(action)
    }

    /// Worker path: apply one decoded action.
    ///
    /// Steps, in order: score lookup, profile read, sorted-set increment,
    /// XP increment, level computation, conditional promotion. Any failure
    /// surfaces as a message failure; the caller logs and drops.
    pub async fn handle(&self, action: &GameAction) -> Result<HandledAction, ActionError> {
        let score = self
            .rules
            .score_for(&action.action)
            .ok_or_else(|| ActionError::invalid(format!("unknown action: {}", action.action)))?;

        let id = parse_user_id(&action.user_id)?;
        // The user may have been deleted while the message was in flight;
        // that is fatal for this message only.
        let profile = self
            .profiles
            .profile(id)
            .await?
            .ok_or_else(|| ActionError::not_found(&action.user_id))?;

        let new_score = self
            .scores
            .update_score(action.leaderboard_id, &action.user_id, score)
            .await?;
        let new_xp = self.xp.increment_xp(&action.user_id, score).await?;

        let target = self.rules.target_level(new_xp, profile.level);
        let promotion = if target > profile.level {
            if self.profiles.update_level(id, profile.level, target).await? {
                bump(&self.metrics.promotions_applied);
                Promotion::Applied(target)
            } else {
                // The only writer of `level` is this CAS; losing it means
                // another action for the same user won. Do not retry.
                bump(&self.metrics.promotions_race_lost);
                tracing::warn!(
                    user_id = %action.user_id,
                    from = profile.level,
                    target,
                    "level promotion lost a race, dropping"
                );
                Promotion::RaceLost { target }
            }
        } else {
            Promotion::None
        };

        bump(&self.metrics.actions_processed);
        Ok(HandledAction {
            new_score,
            new_xp,
            promotion,
        })
    }
}

fn parse_user_id(user_id: &str) -> Result<Uuid, ActionError> {
    Uuid::parse_str(user_id)
        .map_err(|_| ActionError::invalid(format!("non-parseable user id: {user_id}")))
}
