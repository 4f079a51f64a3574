//! PostgreSQL Storage - durable implementation of the store contract
//!
//! Uses `sqlx` for async queries. Each `PgTx` wraps one database
//! transaction; `lock_*` reads use `SELECT ... FOR UPDATE`, so concurrent
//! requests touching the same progress, completion or wallet row queue up
//! behind each other instead of losing updates.
//!
//! ## Tables
//! - users, wallets, levels
//! - missions, mission_requirements, mission_progress, user_missions, user_mission_assignments
//! - titles, title_requirements, title_progress, user_titles
//! - rewards, currency_grants

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::{FromRow, Transaction};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::migrations;
use super::repository::{Store, StoreError, StoreResult, StoreTx};
use crate::model::*;

/// PostgreSQL connection pool wrapper
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open a pool of up to `max_connections` and bring the schema up to date
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        debug!(max_connections, "PostgreSQL pool open");

        let store = Self { pool };
        let applied = store.run_migrations().await?;
        info!(applied, "PostgreSQL ready");
        Ok(store)
    }

    /// Apply every migration not yet recorded in `_migrations`. Each one
    /// runs in its own transaction together with its ledger row. Returns
    /// how many were applied.
    pub async fn run_migrations(&self) -> StoreResult<usize> {
        sqlx::raw_sql(MIGRATION_LEDGER).execute(&self.pool).await?;

        let done: HashSet<String> = sqlx::query_scalar("SELECT name FROM _migrations")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        let mut applied = 0;
        for (name, sql) in migrations::get_migrations() {
            if done.contains(name) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", name, e)))?;
            sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(migration = name, "Migration applied");
            applied += 1;
        }
        Ok(applied)
    }
}

const MIGRATION_LEDGER: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    name VARCHAR(100) PRIMARY KEY,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
)";

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }
}

/// Table layout shared by missions and titles
struct TrackTables {
    requirements: &'static str,
    progress: &'static str,
    completions: &'static str,
    parent_col: &'static str,
}

fn tables(track: Track) -> TrackTables {
    match track {
        Track::Mission => TrackTables {
            requirements: "mission_requirements",
            progress: "mission_progress",
            completions: "user_missions",
            parent_col: "mission_id",
        },
        Track::Title => TrackTables {
            requirements: "title_requirements",
            progress: "title_progress",
            completions: "user_titles",
            parent_col: "title_id",
        },
    }
}

fn unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Constraint(format!("{} already exists", what)),
        _ => StoreError::Sqlx(e),
    }
}

pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> StoreResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or(StoreError::Finished)
    }

    /// Resolve a reward row's payload by its rewardable tag
    async fn load_rewardable(
        &mut self,
        kind: RewardableKind,
        rewardable_id: i64,
    ) -> StoreResult<Rewardable> {
        match kind {
            RewardableKind::Currency => {
                let row: Option<(i64, i64)> =
                    sqlx::query_as("SELECT coins, experience FROM currency_grants WHERE id = $1")
                        .bind(rewardable_id)
                        .fetch_optional(self.conn()?)
                        .await?;
                row.map(|(coins, experience)| Rewardable::Currency { coins, experience })
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!("currency grant {} missing", rewardable_id))
                    })
            }
            RewardableKind::Title => Ok(Rewardable::Title {
                title_id: rewardable_id,
            }),
        }
    }
}

const MISSION_COLUMNS: &str =
    "id, text, coins, experience, status, frequency, for_all, reset_time";

#[async_trait]
impl StoreTx for PgTx {
    // ========================================================================
    // Users
    // ========================================================================

    async fn create_user(&mut self, username: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let id: i64 = sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
            .bind(username)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| unique_violation(e, "username"))?;

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("INSERT INTO levels (user_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        debug!("Created user: {} (id={})", username, id);
        Ok(id)
    }

    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.conn()?)
            .await?;
        Ok(exists)
    }

    async fn all_user_ids(&mut self) -> StoreResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
            .fetch_all(self.conn()?)
            .await?;
        Ok(ids)
    }

    // ========================================================================
    // Missions
    // ========================================================================

    async fn insert_mission(
        &mut self,
        mission: &NewMission,
        reset_time: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO missions (text, coins, experience, status, frequency, for_all, reset_time)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(&mission.text)
        .bind(mission.coins)
        .bind(mission.experience)
        .bind(MissionStatus::Available.as_str())
        .bind(mission.frequency.as_str())
        .bind(mission.for_all)
        .bind(reset_time)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn get_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>(&format!(
            "SELECT {} FROM missions WHERE id = $1",
            MISSION_COLUMNS
        ))
        .bind(mission_id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(Mission::try_from).transpose()
    }

    async fn lock_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>(&format!(
            "SELECT {} FROM missions WHERE id = $1 FOR UPDATE",
            MISSION_COLUMNS
        ))
        .bind(mission_id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(Mission::try_from).transpose()
    }

    async fn set_mission_status(
        &mut self,
        mission_id: i64,
        status: MissionStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE missions SET status = $2 WHERE id = $1")
            .bind(mission_id)
            .bind(status.as_str())
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_reset_time(&mut self, mission_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE missions SET reset_time = $2 WHERE id = $1")
            .bind(mission_id)
            .bind(at)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn due_missions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Mission>> {
        let rows = sqlx::query_as::<_, MissionRow>(&format!(
            "SELECT {} FROM missions
             WHERE reset_time < $1
               AND status NOT IN ('canceled', 'unavailable')
               AND frequency <> 'one_time'
             ORDER BY id",
            MISSION_COLUMNS
        ))
        .bind(now)
        .fetch_all(self.conn()?)
        .await?;
        rows.into_iter().map(Mission::try_from).collect()
    }

    async fn delete_mission(&mut self, mission_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        sqlx::query(
            "DELETE FROM mission_progress WHERE requirement_id IN
                (SELECT id FROM mission_requirements WHERE mission_id = $1)",
        )
        .bind(mission_id)
        .execute(&mut *conn)
        .await?;
        for sql in [
            "DELETE FROM mission_requirements WHERE mission_id = $1",
            "DELETE FROM user_missions WHERE mission_id = $1",
            "DELETE FROM user_mission_assignments WHERE mission_id = $1",
            "DELETE FROM currency_grants WHERE id IN
                (SELECT rewardable_id FROM rewards
                 WHERE sourceable_type = 'mission' AND sourceable_id = $1
                   AND rewardable_type = 'currency')",
            "DELETE FROM rewards WHERE sourceable_type = 'mission' AND sourceable_id = $1",
        ] {
            sqlx::query(sql).bind(mission_id).execute(&mut *conn).await?;
        }
        let result = sqlx::query("DELETE FROM missions WHERE id = $1")
            .bind(mission_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Titles
    // ========================================================================

    async fn insert_title(&mut self, title: &NewTitle) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO titles (name, description) VALUES ($1, $2) RETURNING id",
        )
        .bind(&title.name)
        .bind(&title.description)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn get_title(&mut self, title_id: i64) -> StoreResult<Option<Title>> {
        let row = sqlx::query_as::<_, TitleRow>(
            "SELECT id, name, description FROM titles WHERE id = $1",
        )
        .bind(title_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(row.map(|r| Title {
            id: r.id,
            name: r.name,
            description: r.description,
        }))
    }

    async fn delete_title(&mut self, title_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        for sql in [
            "DELETE FROM title_progress WHERE requirement_id IN
                (SELECT id FROM title_requirements WHERE title_id = $1)",
            "DELETE FROM title_requirements WHERE title_id = $1",
            "DELETE FROM user_titles WHERE title_id = $1",
            "DELETE FROM currency_grants WHERE id IN
                (SELECT rewardable_id FROM rewards
                 WHERE sourceable_type = 'title' AND sourceable_id = $1
                   AND rewardable_type = 'currency')",
            "DELETE FROM rewards WHERE sourceable_type = 'title' AND sourceable_id = $1",
            "DELETE FROM rewards WHERE rewardable_type = 'title' AND rewardable_id = $1",
        ] {
            sqlx::query(sql).bind(title_id).execute(&mut *conn).await?;
        }
        let result = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(title_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Requirements
    // ========================================================================

    async fn insert_requirement(
        &mut self,
        track: Track,
        parent_id: i64,
        requirement: &NewRequirement,
    ) -> StoreResult<i64> {
        let t = tables(track);
        let id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {} ({}, task, key, goal) VALUES ($1, $2, $3, $4) RETURNING id",
            t.requirements, t.parent_col
        ))
        .bind(parent_id)
        .bind(&requirement.task)
        .bind(&requirement.key)
        .bind(requirement.goal)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn requirements_by_key(
        &mut self,
        track: Track,
        key: &str,
    ) -> StoreResult<Vec<Requirement>> {
        let t = tables(track);
        let rows = sqlx::query_as::<_, RequirementRow>(&format!(
            "SELECT id, {} AS parent_id, task, key, goal FROM {} WHERE key = $1 ORDER BY id",
            t.parent_col, t.requirements
        ))
        .bind(key)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_requirement(track)).collect())
    }

    async fn requirements_of(
        &mut self,
        track: Track,
        parent_id: i64,
    ) -> StoreResult<Vec<Requirement>> {
        let t = tables(track);
        let rows = sqlx::query_as::<_, RequirementRow>(&format!(
            "SELECT id, {col} AS parent_id, task, key, goal FROM {} WHERE {col} = $1 ORDER BY id",
            t.requirements,
            col = t.parent_col
        ))
        .bind(parent_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_requirement(track)).collect())
    }

    // ========================================================================
    // Progress
    // ========================================================================

    async fn lock_progress(
        &mut self,
        track: Track,
        user_id: i64,
        requirement_id: i64,
    ) -> StoreResult<Progress> {
        let t = tables(track);
        let conn = self.conn()?;
        sqlx::query(&format!(
            "INSERT INTO {} (user_id, requirement_id) VALUES ($1, $2)
             ON CONFLICT (user_id, requirement_id) DO NOTHING",
            t.progress
        ))
        .bind(user_id)
        .bind(requirement_id)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT user_id, requirement_id, progress, completed FROM {}
             WHERE user_id = $1 AND requirement_id = $2 FOR UPDATE",
            t.progress
        ))
        .bind(user_id)
        .bind(requirement_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.into_progress(track))
    }

    async fn save_progress(&mut self, progress: &Progress) -> StoreResult<()> {
        let t = tables(progress.track);
        sqlx::query(&format!(
            "UPDATE {} SET progress = $3, completed = $4 WHERE user_id = $1 AND requirement_id = $2",
            t.progress
        ))
        .bind(progress.user_id)
        .bind(progress.requirement_id)
        .bind(progress.progress)
        .bind(progress.completed)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn progress_of(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Vec<Progress>> {
        let t = tables(track);
        let rows = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT p.user_id, p.requirement_id, p.progress, p.completed
             FROM {} p JOIN {} r ON r.id = p.requirement_id
             WHERE p.user_id = $1 AND r.{} = $2
             ORDER BY p.requirement_id",
            t.progress, t.requirements, t.parent_col
        ))
        .bind(user_id)
        .bind(parent_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_progress(track)).collect())
    }

    async fn reset_mission_progress(
        &mut self,
        mission_id: i64,
        user_ids: &[i64],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE mission_progress SET progress = 0, completed = FALSE
             WHERE user_id = ANY($2)
               AND requirement_id IN (SELECT id FROM mission_requirements WHERE mission_id = $1)",
        )
        .bind(mission_id)
        .bind(user_ids)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Completions
    // ========================================================================

    async fn lock_completion(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Completion> {
        let t = tables(track);
        let conn = self.conn()?;
        sqlx::query(&format!(
            "INSERT INTO {table} (user_id, {col}) VALUES ($1, $2)
             ON CONFLICT (user_id, {col}) DO NOTHING",
            table = t.completions,
            col = t.parent_col
        ))
        .bind(user_id)
        .bind(parent_id)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, CompletionRow>(&format!(
            "SELECT user_id, {col} AS parent_id, completed, last_completed_at FROM {table}
             WHERE user_id = $1 AND {col} = $2 FOR UPDATE",
            table = t.completions,
            col = t.parent_col
        ))
        .bind(user_id)
        .bind(parent_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.into_completion(track))
    }

    async fn save_completion(&mut self, completion: &Completion) -> StoreResult<()> {
        let t = tables(completion.track);
        sqlx::query(&format!(
            "UPDATE {} SET completed = $3, last_completed_at = $4 WHERE user_id = $1 AND {} = $2",
            t.completions, t.parent_col
        ))
        .bind(completion.user_id)
        .bind(completion.parent_id)
        .bind(completion.completed)
        .bind(completion.last_completed_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn mission_participants(&mut self, mission_id: i64) -> StoreResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM user_missions WHERE mission_id = $1 ORDER BY user_id",
        )
        .bind(mission_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(ids)
    }

    async fn reset_mission_completions(
        &mut self,
        mission_id: i64,
        user_ids: &[i64],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE user_missions SET completed = FALSE, last_completed_at = NULL
             WHERE mission_id = $1 AND user_id = ANY($2)",
        )
        .bind(mission_id)
        .bind(user_ids)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected())
    }

    async fn user_titles(&mut self, user_id: i64) -> StoreResult<Vec<UserTitle>> {
        let rows = sqlx::query_as::<_, UserTitleRow>(
            "SELECT user_id, title_id, completed, enabled, last_completed_at
             FROM user_titles WHERE user_id = $1 ORDER BY title_id",
        )
        .bind(user_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserTitle {
                user_id: r.user_id,
                title_id: r.title_id,
                completed: r.completed,
                enabled: r.enabled,
                last_completed_at: r.last_completed_at,
            })
            .collect())
    }

    async fn set_title_enabled(
        &mut self,
        user_id: i64,
        title_id: i64,
        enabled: bool,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE user_titles SET enabled = $3 WHERE user_id = $1 AND title_id = $2")
            .bind(user_id)
            .bind(title_id)
            .bind(enabled)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Assignments
    // ========================================================================

    async fn assign_mission(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO user_mission_assignments (user_id, mission_id) VALUES ($1, $2)
             ON CONFLICT (user_id, mission_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(mission_id)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_assigned(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_mission_assignments
                           WHERE user_id = $1 AND mission_id = $2)",
        )
        .bind(user_id)
        .bind(mission_id)
        .fetch_one(self.conn()?)
        .await?;
        Ok(exists)
    }

    // ========================================================================
    // Rewards
    // ========================================================================

    async fn insert_reward(
        &mut self,
        source: RewardSource,
        grant: &Rewardable,
    ) -> StoreResult<i64> {
        let conn = self.conn()?;
        let rewardable_id = match *grant {
            Rewardable::Currency { coins, experience } => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO currency_grants (coins, experience) VALUES ($1, $2) RETURNING id",
                )
                .bind(coins)
                .bind(experience)
                .fetch_one(&mut *conn)
                .await?;
                id
            }
            Rewardable::Title { title_id } => title_id,
        };

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO rewards (sourceable_type, sourceable_id, rewardable_type, rewardable_id)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(source.track().as_str())
        .bind(source.id())
        .bind(grant.kind().as_tag())
        .bind(rewardable_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn rewards_for(&mut self, source: RewardSource) -> StoreResult<Vec<Reward>> {
        let rows = sqlx::query_as::<_, RewardRow>(
            "SELECT id, rewardable_type, rewardable_id FROM rewards
             WHERE sourceable_type = $1 AND sourceable_id = $2
             ORDER BY id",
        )
        .bind(source.track().as_str())
        .bind(source.id())
        .fetch_all(self.conn()?)
        .await?;

        let mut rewards = Vec::with_capacity(rows.len());
        for row in rows {
            let kind = RewardableKind::from_tag(&row.rewardable_type).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "reward {} has unknown rewardable_type '{}'",
                    row.id, row.rewardable_type
                ))
            })?;
            let grant = self.load_rewardable(kind, row.rewardable_id).await?;
            rewards.push(Reward {
                id: Some(row.id),
                source,
                grant,
            });
        }
        Ok(rewards)
    }

    // ========================================================================
    // Wallet / Level
    // ========================================================================

    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT user_id, amount FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(self.conn()?)
                .await?;
        Ok(row.map(|(user_id, amount)| Wallet { user_id, amount }))
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET amount = $2 WHERE user_id = $1")
            .bind(wallet.user_id)
            .bind(wallet.amount)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn lock_level(&mut self, user_id: i64) -> StoreResult<Option<Level>> {
        let row: Option<(i64, i32, i64)> = sqlx::query_as(
            "SELECT user_id, level, experience FROM levels WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(row.map(|(user_id, level, experience)| Level {
            user_id,
            level,
            experience,
        }))
    }

    async fn save_level(&mut self, level: &Level) -> StoreResult<()> {
        sqlx::query("UPDATE levels SET level = $2, experience = $3 WHERE user_id = $1")
            .bind(level.user_id)
            .bind(level.level)
            .bind(level.experience)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row types (for sqlx query_as mapping)
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct MissionRow {
    pub id: i64,
    pub text: String,
    pub coins: i64,
    pub experience: i64,
    pub status: String,
    pub frequency: String,
    pub for_all: bool,
    pub reset_time: Option<DateTime<Utc>>,
}

impl TryFrom<MissionRow> for Mission {
    type Error = StoreError;

    fn try_from(row: MissionRow) -> Result<Self, Self::Error> {
        let status = MissionStatus::from_tag(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("mission {} has status '{}'", row.id, row.status))
        })?;
        let frequency = Frequency::from_tag(&row.frequency).ok_or_else(|| {
            StoreError::Corrupt(format!("mission {} has frequency '{}'", row.id, row.frequency))
        })?;
        Ok(Mission {
            id: row.id,
            text: row.text,
            coins: row.coins,
            experience: row.experience,
            status,
            frequency,
            for_all: row.for_all,
            reset_time: row.reset_time,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TitleRow {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RequirementRow {
    pub id: i64,
    pub parent_id: i64,
    pub task: String,
    pub key: String,
    pub goal: i64,
}

impl RequirementRow {
    fn into_requirement(self, track: Track) -> Requirement {
        Requirement {
            id: self.id,
            track,
            parent_id: self.parent_id,
            task: self.task,
            key: self.key,
            goal: self.goal,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ProgressRow {
    pub user_id: i64,
    pub requirement_id: i64,
    pub progress: i64,
    pub completed: bool,
}

impl ProgressRow {
    fn into_progress(self, track: Track) -> Progress {
        Progress {
            track,
            user_id: self.user_id,
            requirement_id: self.requirement_id,
            progress: self.progress,
            completed: self.completed,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CompletionRow {
    pub user_id: i64,
    pub parent_id: i64,
    pub completed: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl CompletionRow {
    fn into_completion(self, track: Track) -> Completion {
        Completion {
            track,
            user_id: self.user_id,
            parent_id: self.parent_id,
            completed: self.completed,
            last_completed_at: self.last_completed_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserTitleRow {
    pub user_id: i64,
    pub title_id: i64,
    pub completed: bool,
    pub enabled: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RewardRow {
    pub id: i64,
    pub rewardable_type: String,
    pub rewardable_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_tables_are_distinct() {
        let m = tables(Track::Mission);
        let t = tables(Track::Title);
        assert_ne!(m.requirements, t.requirements);
        assert_ne!(m.progress, t.progress);
        assert_ne!(m.completions, t.completions);
        assert_eq!(m.parent_col, "mission_id");
        assert_eq!(t.parent_col, "title_id");
    }

    #[test]
    fn test_mission_row_rejects_unknown_tags() {
        let row = MissionRow {
            id: 9,
            text: "x".into(),
            coins: 0,
            experience: 0,
            status: "paused".into(),
            frequency: "daily".into(),
            for_all: true,
            reset_time: None,
        };
        assert!(matches!(Mission::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
