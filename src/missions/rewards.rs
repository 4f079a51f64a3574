//! Reward issuance
//!
//! A reward is either a currency grant (coins into the wallet, experience
//! into the level record) or a title grant. Each grant is applied as a
//! whole or not at all; a list of grants is issued best-effort, with every
//! business failure reported back instead of stopping the list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Entity, InvalidState, ProgressError, ProgressResult};
use crate::model::{LevelCurve, Reward, Rewardable, Track};
use crate::storage::StoreTx;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IssuedReward {
    Currency {
        coins: i64,
        experience: i64,
        new_balance: i64,
        levels_gained: u32,
    },
    Title {
        title_id: i64,
        /// False when the user already held the title
        newly_granted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedReward {
    /// `None` for a mission's implicit base grant
    pub reward_id: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewardSummary {
    pub issued: Vec<IssuedReward>,
    pub failed: Vec<FailedReward>,
}

impl RewardSummary {
    pub fn coins(&self) -> i64 {
        self.issued
            .iter()
            .map(|r| match r {
                IssuedReward::Currency { coins, .. } => *coins,
                IssuedReward::Title { .. } => 0,
            })
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RewardIssuer {
    curve: LevelCurve,
}

impl RewardIssuer {
    pub fn new(curve: LevelCurve) -> Self {
        Self { curve }
    }

    /// Apply one grant to `user_id` inside the caller's transaction
    pub async fn issue(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
        grant: &Rewardable,
        now: DateTime<Utc>,
    ) -> ProgressResult<IssuedReward> {
        match *grant {
            Rewardable::Currency { coins, experience } => {
                for amount in [coins, experience] {
                    if amount < 0 {
                        return Err(InvalidState::NegativeAmount { amount }.into());
                    }
                }

                let mut wallet = tx
                    .lock_wallet(user_id)
                    .await?
                    .ok_or(ProgressError::NotFound(Entity::Wallet(user_id)))?;
                let mut level = tx
                    .lock_level(user_id)
                    .await?
                    .ok_or(ProgressError::NotFound(Entity::Level(user_id)))?;

                let new_balance = wallet.credit(coins)?;
                let levels_gained = level.gain_experience(experience, &self.curve);

                tx.save_wallet(&wallet).await?;
                tx.save_level(&level).await?;

                if levels_gained > 0 {
                    info!(user_id, level = level.level, "Level up");
                }

                Ok(IssuedReward::Currency {
                    coins,
                    experience,
                    new_balance,
                    levels_gained,
                })
            }
            Rewardable::Title { title_id } => {
                if tx.get_title(title_id).await?.is_none() {
                    return Err(ProgressError::NotFound(Entity::Title(title_id)));
                }

                let mut held = tx.lock_completion(Track::Title, user_id, title_id).await?;
                if held.completed {
                    return Ok(IssuedReward::Title {
                        title_id,
                        newly_granted: false,
                    });
                }
                held.mark_completed(now)?;
                tx.save_completion(&held).await?;
                tx.set_title_enabled(user_id, title_id, false).await?;

                info!(user_id, title_id, "Title granted");
                Ok(IssuedReward::Title {
                    title_id,
                    newly_granted: true,
                })
            }
        }
    }

    /// Issue every reward in order.
    ///
    /// Business failures are collected in the summary and the remaining
    /// rewards are still issued. A persistence failure is returned as an
    /// error so the caller's transaction rolls back as a whole.
    pub async fn issue_all(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
        rewards: &[Reward],
        now: DateTime<Utc>,
    ) -> ProgressResult<RewardSummary> {
        let mut summary = RewardSummary::default();
        for reward in rewards {
            match self.issue(tx, user_id, &reward.grant, now).await {
                Ok(issued) => summary.issued.push(issued),
                Err(ProgressError::Persistence(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(user_id, reward_id = ?reward.id, error = %e, "Reward not issued");
                    summary.failed.push(FailedReward {
                        reward_id: reward.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }
}
