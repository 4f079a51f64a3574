//! Mission & Title Progress Engine
//!
//! Tracks per-user progress against requirement lists, completes missions
//! and titles at most once, pays out their rewards and periodically resets
//! recurring missions.
//!
//! - `resolver`: action key → matching requirements
//! - `evaluator`: progress increments, completion guard
//! - `rewards`: coin/experience and title grants
//! - `reset`: recurring mission sweep
//!
//! Every public operation on [`MissionService`] is one unit of work: it
//! commits on success and rolls back on any error.

pub mod evaluator;
pub mod reset;
pub mod resolver;
pub mod rewards;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::ProgressConfig;
use crate::error::{Entity, InvalidState, ProgressError, ProgressResult};
use crate::model::*;
use crate::storage::{Store, StoreTx};
use crate::validation::Validator;

pub use evaluator::{CompletionEvaluator, ParentOutcome, ParentStatus, ProgressReport, ProgressUpdate};
pub use reset::{next_reset, MissionReset, ResetScheduler, SweepReport};
pub use rewards::{FailedReward, IssuedReward, RewardIssuer, RewardSummary};

/// A requirement paired with the user's counter for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementProgress {
    pub requirement: Requirement,
    pub progress: i64,
    pub completed: bool,
}

/// A user's standing on one mission or title
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentProgress {
    pub track: Track,
    pub parent_id: i64,
    pub requirements: Vec<RequirementProgress>,
    pub completed: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

pub struct MissionService<S: Store> {
    store: Arc<S>,
    validator: Validator,
    evaluator: CompletionEvaluator,
    scheduler: ResetScheduler<S>,
}

impl<S: Store> MissionService<S> {
    pub fn new(store: Arc<S>, config: &ProgressConfig) -> Self {
        let issuer = RewardIssuer::new(config.level_curve);
        Self {
            validator: Validator::new(config),
            evaluator: CompletionEvaluator::new(issuer),
            scheduler: ResetScheduler::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn begin(&self) -> ProgressResult<Box<dyn StoreTx>> {
        Ok(self.store.begin().await?)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub async fn create_user(&self, username: &str) -> ProgressResult<i64> {
        self.validator.username(username)?;
        let mut tx = self.begin().await?;
        let id = tx.create_user(username.trim()).await?;
        tx.commit().await?;
        info!(user_id = id, "User created");
        Ok(id)
    }

    /// Insert a mission with its requirements and rewards. Recurring
    /// missions get their first reset boundary from `now`.
    pub async fn create_mission(
        &self,
        mission: &NewMission,
        now: DateTime<Utc>,
    ) -> ProgressResult<i64> {
        self.validator.new_mission(mission)?;
        let mut tx = self.begin().await?;

        let reset_time = next_reset(mission.frequency, now);
        let id = tx.insert_mission(mission, reset_time).await?;
        for req in &mission.requirements {
            tx.insert_requirement(Track::Mission, id, &req.trimmed()).await?;
        }
        for grant in &mission.rewards {
            check_grant_target(tx.as_mut(), grant).await?;
            tx.insert_reward(RewardSource::Mission(id), grant).await?;
        }
        tx.commit().await?;

        info!(mission_id = id, frequency = mission.frequency.as_str(), "Mission created");
        Ok(id)
    }

    pub async fn create_title(&self, title: &NewTitle) -> ProgressResult<i64> {
        self.validator.new_title(title)?;
        let mut tx = self.begin().await?;

        let id = tx.insert_title(title).await?;
        for req in &title.requirements {
            tx.insert_requirement(Track::Title, id, &req.trimmed()).await?;
        }
        for grant in &title.rewards {
            check_grant_target(tx.as_mut(), grant).await?;
            tx.insert_reward(RewardSource::Title(id), grant).await?;
        }
        tx.commit().await?;

        info!(title_id = id, "Title created");
        Ok(id)
    }

    pub async fn attach_reward(
        &self,
        source: RewardSource,
        grant: Rewardable,
    ) -> ProgressResult<i64> {
        self.validator.grant(&grant)?;
        let mut tx = self.begin().await?;
        ensure_parent(tx.as_mut(), source.track(), source.id()).await?;
        check_grant_target(tx.as_mut(), &grant).await?;
        let id = tx.insert_reward(source, &grant).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Returns false when the user was already assigned
    pub async fn assign_mission(&self, user_id: i64, mission_id: i64) -> ProgressResult<bool> {
        let mut tx = self.begin().await?;
        ensure_user(tx.as_mut(), user_id).await?;
        ensure_parent(tx.as_mut(), Track::Mission, mission_id).await?;
        let created = tx.assign_mission(user_id, mission_id).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub async fn set_mission_status(
        &self,
        mission_id: i64,
        status: MissionStatus,
    ) -> ProgressResult<()> {
        let mut tx = self.begin().await?;
        if !tx.set_mission_status(mission_id, status).await? {
            return Err(ProgressError::NotFound(Entity::Mission(mission_id)));
        }
        tx.commit().await?;
        info!(mission_id, status = status.as_str(), "Mission status changed");
        Ok(())
    }

    /// Delete a mission together with its requirements, progress,
    /// completions, assignments and rewards
    pub async fn delete_mission(&self, mission_id: i64) -> ProgressResult<()> {
        let mut tx = self.begin().await?;
        if !tx.delete_mission(mission_id).await? {
            return Err(ProgressError::NotFound(Entity::Mission(mission_id)));
        }
        tx.commit().await?;
        info!(mission_id, "Mission deleted");
        Ok(())
    }

    /// Delete a title together with its requirements, progress, holders,
    /// its rewards and every reward that grants it
    pub async fn delete_title(&self, title_id: i64) -> ProgressResult<()> {
        let mut tx = self.begin().await?;
        if !tx.delete_title(title_id).await? {
            return Err(ProgressError::NotFound(Entity::Title(title_id)));
        }
        tx.commit().await?;
        info!(title_id, "Title deleted");
        Ok(())
    }

    // ========================================================================
    // Progress & completion
    // ========================================================================

    pub async fn record_progress(
        &self,
        user_id: i64,
        key: &str,
        delta: i64,
    ) -> ProgressResult<ProgressReport> {
        self.record_progress_at(user_id, key, delta, Utc::now()).await
    }

    pub async fn record_progress_at(
        &self,
        user_id: i64,
        key: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> ProgressResult<ProgressReport> {
        self.validator.action(key, delta)?;
        let mut tx = self.begin().await?;
        let report = self
            .evaluator
            .record(tx.as_mut(), user_id, key.trim(), delta, now)
            .await?;
        tx.commit().await?;
        Ok(report)
    }

    pub async fn complete_mission(
        &self,
        user_id: i64,
        mission_id: i64,
    ) -> ProgressResult<RewardSummary> {
        self.complete(Track::Mission, user_id, mission_id).await
    }

    pub async fn complete_title(&self, user_id: i64, title_id: i64) -> ProgressResult<RewardSummary> {
        self.complete(Track::Title, user_id, title_id).await
    }

    async fn complete(
        &self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> ProgressResult<RewardSummary> {
        let mut tx = self.begin().await?;
        let summary = self
            .evaluator
            .complete(tx.as_mut(), track, user_id, parent_id, Utc::now())
            .await?;
        tx.commit().await?;
        Ok(summary)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn mission_progress(
        &self,
        user_id: i64,
        mission_id: i64,
    ) -> ProgressResult<ParentProgress> {
        self.parent_progress(Track::Mission, user_id, mission_id).await
    }

    pub async fn title_progress(&self, user_id: i64, title_id: i64) -> ProgressResult<ParentProgress> {
        self.parent_progress(Track::Title, user_id, title_id).await
    }

    async fn parent_progress(
        &self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> ProgressResult<ParentProgress> {
        let mut tx = self.begin().await?;
        ensure_user(tx.as_mut(), user_id).await?;
        ensure_parent(tx.as_mut(), track, parent_id).await?;

        let progress = tx.progress_of(track, user_id, parent_id).await?;
        let requirements = tx
            .requirements_of(track, parent_id)
            .await?
            .into_iter()
            .map(|requirement| {
                let own = progress.iter().find(|p| p.requirement_id == requirement.id);
                RequirementProgress {
                    progress: own.map_or(0, |p| p.progress),
                    completed: own.map_or(false, |p| p.completed),
                    requirement,
                }
            })
            .collect();

        // never committed, so a row created by lock_completion is discarded
        let completion = tx.lock_completion(track, user_id, parent_id).await?;

        Ok(ParentProgress {
            track,
            parent_id,
            requirements,
            completed: completion.completed,
            last_completed_at: completion.last_completed_at,
        })
    }

    /// Titles the user holds
    pub async fn user_titles(&self, user_id: i64) -> ProgressResult<Vec<UserTitle>> {
        let mut tx = self.begin().await?;
        ensure_user(tx.as_mut(), user_id).await?;
        let titles = tx.user_titles(user_id).await?;
        Ok(titles.into_iter().filter(|t| t.completed).collect())
    }

    /// Enable one held title and disable every other one
    pub async fn set_active_title(&self, user_id: i64, title_id: i64) -> ProgressResult<()> {
        let mut tx = self.begin().await?;
        ensure_user(tx.as_mut(), user_id).await?;
        evaluator::lock_user(tx.as_mut(), user_id).await?;
        ensure_parent(tx.as_mut(), Track::Title, title_id).await?;

        let held = tx.user_titles(user_id).await?;
        if !held.iter().any(|t| t.title_id == title_id && t.completed) {
            return Err(InvalidState::TitleNotHeld { user_id, title_id }.into());
        }
        for title in held.iter().filter(|t| t.enabled && t.title_id != title_id) {
            tx.set_title_enabled(user_id, title.title_id, false).await?;
        }
        tx.set_title_enabled(user_id, title_id, true).await?;
        tx.commit().await?;

        info!(user_id, title_id, "Active title changed");
        Ok(())
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    pub async fn reset_due_missions(&self, now: DateTime<Utc>) -> ProgressResult<SweepReport> {
        Ok(self.scheduler.sweep(now).await?)
    }
}

async fn ensure_user(tx: &mut dyn StoreTx, user_id: i64) -> ProgressResult<()> {
    if tx.user_exists(user_id).await? {
        Ok(())
    } else {
        Err(ProgressError::NotFound(Entity::User(user_id)))
    }
}

async fn ensure_parent(tx: &mut dyn StoreTx, track: Track, parent_id: i64) -> ProgressResult<()> {
    let exists = match track {
        Track::Mission => tx.get_mission(parent_id).await?.is_some(),
        Track::Title => tx.get_title(parent_id).await?.is_some(),
    };
    if exists {
        Ok(())
    } else {
        Err(ProgressError::NotFound(match track {
            Track::Mission => Entity::Mission(parent_id),
            Track::Title => Entity::Title(parent_id),
        }))
    }
}

/// A title grant must point at an existing title
async fn check_grant_target(tx: &mut dyn StoreTx, grant: &Rewardable) -> ProgressResult<()> {
    match *grant {
        Rewardable::Title { title_id } => ensure_parent(tx, Track::Title, title_id).await,
        Rewardable::Currency { .. } => Ok(()),
    }
}
