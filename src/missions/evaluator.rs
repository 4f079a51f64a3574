//! Completion evaluation
//!
//! `record` is the action-event path: advance every requirement that
//! tracks the key, then re-evaluate each affected mission/title and issue
//! its rewards the first time it becomes fully satisfied. `complete` is
//! the explicit path used when a caller asks for completion directly.
//!
//! Everything runs inside the caller's transaction. Progress and
//! completion rows are read with `lock_*`, so the increment and the
//! completed flag flip are atomic per row.
//!
//! Lock order for one user: wallet, then per parent its UserMission /
//! UserTitle row and progress rows, then the rows its rewards touch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::resolver;
use super::rewards::{RewardIssuer, RewardSummary};
use crate::error::{Entity, InvalidState, ProgressError, ProgressResult};
use crate::model::{Mission, Reward, RewardSource, Title, Track};
use crate::storage::{StoreResult, StoreTx};

/// One requirement advanced by an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub track: Track,
    pub parent_id: i64,
    pub requirement_id: i64,
    pub progress: i64,
    pub goal: i64,
    pub completed: bool,
    /// This action crossed the goal
    pub newly_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParentStatus {
    InProgress { satisfied: usize, total: usize },
    Completed(RewardSummary),
    AlreadyCompleted,
    Rejected(InvalidState),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentOutcome {
    pub track: Track,
    pub parent_id: i64,
    pub status: ParentStatus,
}

/// Everything one action changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub user_id: i64,
    pub key: String,
    pub updated: Vec<ProgressUpdate>,
    pub outcomes: Vec<ParentOutcome>,
}

impl ProgressReport {
    fn new(user_id: i64, key: &str) -> Self {
        Self {
            user_id,
            key: key.to_string(),
            updated: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// No mission or title tracks the action
    pub fn is_noop(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, track: Track, parent_id: i64) -> Option<&ParentStatus> {
        self.outcomes
            .iter()
            .find(|o| o.track == track && o.parent_id == parent_id)
            .map(|o| &o.status)
    }

    /// Parents completed by this action, with what they paid out
    pub fn completions(&self) -> impl Iterator<Item = (&ParentOutcome, &RewardSummary)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            ParentStatus::Completed(summary) => Some((o, summary)),
            _ => None,
        })
    }

    /// Serialize for the presentation layer
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Lock the user's wallet row. Every path that writes completion, title,
/// wallet or level rows of a user takes this lock first, so those rows are
/// always acquired in one order.
pub(crate) async fn lock_user(tx: &mut dyn StoreTx, user_id: i64) -> ProgressResult<()> {
    tx.lock_wallet(user_id)
        .await?
        .map(|_| ())
        .ok_or(ProgressError::NotFound(Entity::Wallet(user_id)))
}

/// A loaded mission or title
enum Parent {
    Mission(Mission),
    Title(Title),
}

impl Parent {
    async fn load(tx: &mut dyn StoreTx, track: Track, parent_id: i64) -> ProgressResult<Self> {
        match track {
            Track::Mission => tx
                .get_mission(parent_id)
                .await?
                .map(Parent::Mission)
                .ok_or(ProgressError::NotFound(Entity::Mission(parent_id))),
            Track::Title => tx
                .get_title(parent_id)
                .await?
                .map(Parent::Title)
                .ok_or(ProgressError::NotFound(Entity::Title(parent_id))),
        }
    }

    fn track(&self) -> Track {
        match self {
            Parent::Mission(_) => Track::Mission,
            Parent::Title(_) => Track::Title,
        }
    }

    fn id(&self) -> i64 {
        match self {
            Parent::Mission(m) => m.id,
            Parent::Title(t) => t.id,
        }
    }

    /// Status and assignment gate. Titles are open to everyone.
    async fn eligibility(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
    ) -> StoreResult<Result<(), InvalidState>> {
        let Parent::Mission(mission) = self else {
            return Ok(Ok(()));
        };
        if !mission.status.is_active() {
            return Ok(Err(InvalidState::MissionInactive {
                mission_id: mission.id,
                status: mission.status,
            }));
        }
        if !mission.for_all && !tx.is_assigned(user_id, mission.id).await? {
            return Ok(Err(InvalidState::NotAssigned {
                user_id,
                mission_id: mission.id,
            }));
        }
        Ok(Ok(()))
    }

    /// Base grant first, then the attached reward list
    async fn rewards(&self, tx: &mut dyn StoreTx) -> StoreResult<Vec<Reward>> {
        let source = RewardSource::of(self.track(), self.id());
        let mut rewards = Vec::new();
        if let Parent::Mission(mission) = self {
            if let Some(grant) = mission.base_grant() {
                rewards.push(Reward {
                    id: None,
                    source,
                    grant,
                });
            }
        }
        rewards.extend(tx.rewards_for(source).await?);
        Ok(rewards)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionEvaluator {
    issuer: RewardIssuer,
}

impl CompletionEvaluator {
    pub fn new(issuer: RewardIssuer) -> Self {
        Self { issuer }
    }

    /// Apply `delta` to every requirement tracking `key` and settle the
    /// affected missions and titles
    pub async fn record(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
        key: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> ProgressResult<ProgressReport> {
        if !tx.user_exists(user_id).await? {
            return Err(ProgressError::NotFound(Entity::User(user_id)));
        }

        let mut report = ProgressReport::new(user_id, key);

        let mut matched = Vec::new();
        for track in Track::ALL {
            let requirements = resolver::requirements_for_key(tx, track, key).await?;
            if !requirements.is_empty() {
                matched.push((track, resolver::group_by_parent(requirements)));
            }
        }
        if matched.is_empty() {
            return Ok(report);
        }
        lock_user(tx, user_id).await?;

        for (track, groups) in matched {
            for (parent_id, requirements) in groups {
                let parent = Parent::load(tx, track, parent_id).await?;

                if let Err(reason) = parent.eligibility(tx, user_id).await? {
                    debug!(user_id, %track, parent_id, %reason, "Progress rejected");
                    report.outcomes.push(ParentOutcome {
                        track,
                        parent_id,
                        status: ParentStatus::Rejected(reason),
                    });
                    continue;
                }

                if track == Track::Mission {
                    // participants of a mission are whoever holds a UserMission row
                    tx.lock_completion(track, user_id, parent_id).await?;
                }

                for req in requirements {
                    let mut progress = tx.lock_progress(track, user_id, req.id).await?;
                    let newly_completed = progress.advance(delta, req.goal);
                    tx.save_progress(&progress).await?;
                    report.updated.push(ProgressUpdate {
                        track,
                        parent_id,
                        requirement_id: req.id,
                        progress: progress.progress,
                        goal: req.goal,
                        completed: progress.completed,
                        newly_completed,
                    });
                }

                let (satisfied, total) = self.satisfaction(tx, track, user_id, parent_id).await?;
                let status = if satisfied < total {
                    ParentStatus::InProgress { satisfied, total }
                } else {
                    match self.settle(tx, &parent, user_id, now).await {
                        Ok(summary) => ParentStatus::Completed(summary),
                        Err(ProgressError::AlreadyCompleted { .. }) => ParentStatus::AlreadyCompleted,
                        Err(e) => return Err(e),
                    }
                };
                report.outcomes.push(ParentOutcome {
                    track,
                    parent_id,
                    status,
                });
            }
        }

        Ok(report)
    }

    /// Explicit completion: every requirement must already be satisfied
    pub async fn complete(
        &self,
        tx: &mut dyn StoreTx,
        track: Track,
        user_id: i64,
        parent_id: i64,
        now: DateTime<Utc>,
    ) -> ProgressResult<RewardSummary> {
        if !tx.user_exists(user_id).await? {
            return Err(ProgressError::NotFound(Entity::User(user_id)));
        }
        lock_user(tx, user_id).await?;
        let parent = Parent::load(tx, track, parent_id).await?;
        parent.eligibility(tx, user_id).await??;

        let (satisfied, total) = self.satisfaction(tx, track, user_id, parent_id).await?;
        if satisfied < total {
            return Err(InvalidState::NotSatisfied {
                track,
                parent_id,
                satisfied,
                total,
            }
            .into());
        }
        self.settle(tx, &parent, user_id, now).await
    }

    /// (requirements satisfied by `user_id`, requirements in total)
    pub async fn satisfaction(
        &self,
        tx: &mut dyn StoreTx,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<(usize, usize)> {
        let requirements = tx.requirements_of(track, parent_id).await?;
        let progress = tx.progress_of(track, user_id, parent_id).await?;
        let satisfied = requirements
            .iter()
            .filter(|req| {
                progress
                    .iter()
                    .any(|p| p.requirement_id == req.id && p.completed)
            })
            .count();
        Ok((satisfied, requirements.len()))
    }

    /// Flip the completion guard and pay out. Fails with `AlreadyCompleted`
    /// when the guard is already set.
    async fn settle(
        &self,
        tx: &mut dyn StoreTx,
        parent: &Parent,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> ProgressResult<RewardSummary> {
        let track = parent.track();
        let parent_id = parent.id();

        let mut completion = tx.lock_completion(track, user_id, parent_id).await?;
        completion.mark_completed(now)?;
        tx.save_completion(&completion).await?;

        let rewards = parent.rewards(tx).await?;
        let summary = self.issuer.issue_all(tx, user_id, &rewards, now).await?;

        info!(
            user_id,
            %track,
            parent_id,
            issued = summary.issued.len(),
            failed = summary.failed.len(),
            "Completed"
        );
        Ok(summary)
    }
}
