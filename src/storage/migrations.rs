//! Database Migrations - PostgreSQL schema for the progress engine
//!
//! Foreign keys carry no `ON DELETE CASCADE`: cascades are performed
//! explicitly by the store (see `StoreTx::delete_mission` /
//! `StoreTx::delete_title`), so a missing step shows up as an FK error
//! instead of silently orphaning or silently deleting rows.

/// SQL migration for creating all tables
pub const MIGRATION_V1: &str = r#"
-- ============================================================================
-- 1. Users, wallets, levels
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id              BIGSERIAL PRIMARY KEY,
    username        VARCHAR(50) UNIQUE NOT NULL,
    created_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS wallets (
    user_id         BIGINT PRIMARY KEY REFERENCES users(id),
    amount          BIGINT NOT NULL DEFAULT 0 CHECK (amount >= 0)
);

CREATE TABLE IF NOT EXISTS levels (
    user_id         BIGINT PRIMARY KEY REFERENCES users(id),
    level           INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
    experience      BIGINT NOT NULL DEFAULT 0 CHECK (experience >= 0)
);

-- ============================================================================
-- 2. Missions
-- ============================================================================

CREATE TABLE IF NOT EXISTS missions (
    id              BIGSERIAL PRIMARY KEY,
    text            TEXT NOT NULL,
    coins           BIGINT NOT NULL DEFAULT 0 CHECK (coins >= 0),
    experience      BIGINT NOT NULL DEFAULT 0 CHECK (experience >= 0),
    status          VARCHAR(16) NOT NULL DEFAULT 'available',  -- available, unavailable, canceled
    frequency       VARCHAR(16) NOT NULL DEFAULT 'one_time',   -- one_time, daily, weekly, monthly
    for_all         BOOLEAN NOT NULL DEFAULT TRUE,
    reset_time      TIMESTAMP WITH TIME ZONE,
    created_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW()
);

CREATE INDEX idx_missions_reset ON missions(reset_time) WHERE frequency <> 'one_time';

CREATE TABLE IF NOT EXISTS mission_requirements (
    id              BIGSERIAL PRIMARY KEY,
    mission_id      BIGINT NOT NULL REFERENCES missions(id),
    task            TEXT NOT NULL,
    key             VARCHAR(64) NOT NULL,
    goal            BIGINT NOT NULL CHECK (goal > 0)
);

CREATE INDEX idx_mission_requirements_key ON mission_requirements(key);
CREATE INDEX idx_mission_requirements_mission ON mission_requirements(mission_id);

CREATE TABLE IF NOT EXISTS mission_progress (
    user_id         BIGINT NOT NULL REFERENCES users(id),
    requirement_id  BIGINT NOT NULL REFERENCES mission_requirements(id),
    progress        BIGINT NOT NULL DEFAULT 0,
    completed       BOOLEAN NOT NULL DEFAULT FALSE,

    PRIMARY KEY (user_id, requirement_id)
);

CREATE TABLE IF NOT EXISTS user_missions (
    user_id             BIGINT NOT NULL REFERENCES users(id),
    mission_id          BIGINT NOT NULL REFERENCES missions(id),
    completed           BOOLEAN NOT NULL DEFAULT FALSE,
    last_completed_at   TIMESTAMP WITH TIME ZONE,

    PRIMARY KEY (user_id, mission_id)
);

CREATE INDEX idx_user_missions_mission ON user_missions(mission_id);

CREATE TABLE IF NOT EXISTS user_mission_assignments (
    user_id         BIGINT NOT NULL REFERENCES users(id),
    mission_id      BIGINT NOT NULL REFERENCES missions(id),
    assigned_at     TIMESTAMP WITH TIME ZONE DEFAULT NOW(),

    PRIMARY KEY (user_id, mission_id)
);

-- ============================================================================
-- 3. Titles
-- ============================================================================

CREATE TABLE IF NOT EXISTS titles (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(100) NOT NULL,
    description     TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS title_requirements (
    id              BIGSERIAL PRIMARY KEY,
    title_id        BIGINT NOT NULL REFERENCES titles(id),
    task            TEXT NOT NULL,
    key             VARCHAR(64) NOT NULL,
    goal            BIGINT NOT NULL CHECK (goal > 0)
);

CREATE INDEX idx_title_requirements_key ON title_requirements(key);
CREATE INDEX idx_title_requirements_title ON title_requirements(title_id);

CREATE TABLE IF NOT EXISTS title_progress (
    user_id         BIGINT NOT NULL REFERENCES users(id),
    requirement_id  BIGINT NOT NULL REFERENCES title_requirements(id),
    progress        BIGINT NOT NULL DEFAULT 0,
    completed       BOOLEAN NOT NULL DEFAULT FALSE,

    PRIMARY KEY (user_id, requirement_id)
);

CREATE TABLE IF NOT EXISTS user_titles (
    user_id             BIGINT NOT NULL REFERENCES users(id),
    title_id            BIGINT NOT NULL REFERENCES titles(id),
    completed           BOOLEAN NOT NULL DEFAULT FALSE,
    enabled             BOOLEAN NOT NULL DEFAULT FALSE,
    last_completed_at   TIMESTAMP WITH TIME ZONE,

    PRIMARY KEY (user_id, title_id)
);

-- ============================================================================
-- 4. Rewards (polymorphic: sourceable -> rewardable)
-- ============================================================================

CREATE TABLE IF NOT EXISTS currency_grants (
    id              BIGSERIAL PRIMARY KEY,
    coins           BIGINT NOT NULL DEFAULT 0 CHECK (coins >= 0),
    experience      BIGINT NOT NULL DEFAULT 0 CHECK (experience >= 0)
);

CREATE TABLE IF NOT EXISTS rewards (
    id              BIGSERIAL PRIMARY KEY,
    sourceable_type VARCHAR(16) NOT NULL,  -- mission, title
    sourceable_id   BIGINT NOT NULL,
    rewardable_type VARCHAR(16) NOT NULL,  -- currency (currency_grants.id), title (titles.id)
    rewardable_id   BIGINT NOT NULL
);

CREATE INDEX idx_rewards_source ON rewards(sourceable_type, sourceable_id);
CREATE INDEX idx_rewards_rewardable ON rewards(rewardable_type, rewardable_id);
"#;

/// Get all migration SQL statements in order
pub fn get_migrations() -> Vec<(&'static str, &'static str)> {
    vec![("v1_initial_schema", MIGRATION_V1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_names_unique() {
        let migrations = get_migrations();
        let names: std::collections::HashSet<_> = migrations.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), migrations.len());
    }

    #[test]
    fn test_schema_covers_every_table() {
        for table in [
            "users",
            "wallets",
            "levels",
            "missions",
            "mission_requirements",
            "mission_progress",
            "user_missions",
            "user_mission_assignments",
            "titles",
            "title_requirements",
            "title_progress",
            "user_titles",
            "currency_grants",
            "rewards",
        ] {
            assert!(
                MIGRATION_V1.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)),
                "missing table {}",
                table
            );
        }
    }
}
