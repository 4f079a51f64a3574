//! Repository traits - the persistence collaborator
//!
//! The engine never talks to a database directly. It opens a unit of work
//! with [`Store::begin`] and reads/writes through [`StoreTx`]. Nothing is
//! visible to other units of work until [`StoreTx::commit`]; dropping a
//! transaction without committing rolls it back.
//!
//! `lock_*` reads take a row lock that is held until the transaction ends,
//! which is what makes the read-modify-write sequences in the engine safe
//! under concurrent requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::*;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Transaction already finished")]
    Finished,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Generic result type for repository operations
pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One unit of work against the store
///
/// Cascades are part of this contract, not of any schema:
/// - `delete_mission` removes the mission's requirements, their progress
///   rows, its UserMission rows, its assignments and every reward sourced
///   from it.
/// - `delete_title` removes the title's requirements, their progress rows,
///   its UserTitle rows, every reward sourced from it and every reward that
///   grants it.
#[async_trait]
pub trait StoreTx: Send {
    // ---- users --------------------------------------------------------------

    /// Insert a user together with an empty wallet and a level-1 record
    async fn create_user(&mut self, username: &str) -> StoreResult<i64>;
    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool>;
    async fn all_user_ids(&mut self) -> StoreResult<Vec<i64>>;

    // ---- missions -----------------------------------------------------------

    async fn insert_mission(
        &mut self,
        mission: &NewMission,
        reset_time: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;
    async fn get_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>>;
    async fn lock_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>>;
    async fn set_mission_status(
        &mut self,
        mission_id: i64,
        status: MissionStatus,
    ) -> StoreResult<bool>;
    async fn set_reset_time(&mut self, mission_id: i64, at: DateTime<Utc>) -> StoreResult<()>;
    /// Recurring, active missions whose `reset_time` is strictly before `now`
    async fn due_missions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Mission>>;
    async fn delete_mission(&mut self, mission_id: i64) -> StoreResult<bool>;

    // ---- titles -------------------------------------------------------------

    async fn insert_title(&mut self, title: &NewTitle) -> StoreResult<i64>;
    async fn get_title(&mut self, title_id: i64) -> StoreResult<Option<Title>>;
    async fn delete_title(&mut self, title_id: i64) -> StoreResult<bool>;

    // ---- requirements -------------------------------------------------------

    async fn insert_requirement(
        &mut self,
        track: Track,
        parent_id: i64,
        requirement: &NewRequirement,
    ) -> StoreResult<i64>;
    /// Exact match on `key`; an empty result is a normal outcome
    async fn requirements_by_key(&mut self, track: Track, key: &str)
        -> StoreResult<Vec<Requirement>>;
    async fn requirements_of(&mut self, track: Track, parent_id: i64)
        -> StoreResult<Vec<Requirement>>;

    // ---- progress -----------------------------------------------------------

    /// Fetch-or-create (0, not completed) and lock the row
    async fn lock_progress(
        &mut self,
        track: Track,
        user_id: i64,
        requirement_id: i64,
    ) -> StoreResult<Progress>;
    async fn save_progress(&mut self, progress: &Progress) -> StoreResult<()>;
    /// Existing progress rows of `user_id` for every requirement under `parent_id`
    async fn progress_of(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Vec<Progress>>;
    async fn reset_mission_progress(&mut self, mission_id: i64, user_ids: &[i64])
        -> StoreResult<u64>;

    // ---- completions (UserMission / UserTitle) ------------------------------

    /// Fetch-or-create (not completed) and lock the join row
    async fn lock_completion(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Completion>;
    async fn save_completion(&mut self, completion: &Completion) -> StoreResult<()>;
    /// Users holding a UserMission row for `mission_id`
    async fn mission_participants(&mut self, mission_id: i64) -> StoreResult<Vec<i64>>;
    async fn reset_mission_completions(
        &mut self,
        mission_id: i64,
        user_ids: &[i64],
    ) -> StoreResult<u64>;
    async fn user_titles(&mut self, user_id: i64) -> StoreResult<Vec<UserTitle>>;
    async fn set_title_enabled(
        &mut self,
        user_id: i64,
        title_id: i64,
        enabled: bool,
    ) -> StoreResult<()>;

    // ---- assignments --------------------------------------------------------

    /// Returns false when the assignment already existed
    async fn assign_mission(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool>;
    async fn is_assigned(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool>;

    // ---- rewards ------------------------------------------------------------

    async fn insert_reward(&mut self, source: RewardSource, grant: &Rewardable)
        -> StoreResult<i64>;
    async fn rewards_for(&mut self, source: RewardSource) -> StoreResult<Vec<Reward>>;

    // ---- wallet / level -----------------------------------------------------

    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>>;
    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()>;
    async fn lock_level(&mut self, user_id: i64) -> StoreResult<Option<Level>>;
    async fn save_level(&mut self, level: &Level) -> StoreResult<()>;

    // ---- lifecycle ----------------------------------------------------------

    /// Make every write of this unit of work visible. Further use fails
    /// with [`StoreError::Finished`].
    async fn commit(&mut self) -> StoreResult<()>;
}
