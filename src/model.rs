//! Domain records for the progress engine
//!
//! Missions recur on a schedule, titles are earned once. Both are a parent
//! with a list of keyed requirements; per-user progress is tracked per
//! requirement and the parent's completion is tracked in a join record
//! (UserMission / UserTitle).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InvalidState, ProgressError};

/// Which goal family a requirement, progress row or completion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    Mission,
    Title,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Mission, Track::Title];

    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Mission => "mission",
            Track::Title => "title",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionStatus {
    Available,
    Unavailable,
    Canceled,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "available" => Some(Self::Available),
            "unavailable" => Some(Self::Unavailable),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Canceled and unavailable missions accept no progress, completion or reset
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// How often a mission's progress is wiped by the reset sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    OneTime,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "one_time" => Some(Self::OneTime),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::OneTime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub id: i64,
    pub text: String,
    pub coins: i64,
    pub experience: i64,
    pub status: MissionStatus,
    pub frequency: Frequency,
    pub for_all: bool,
    /// Next scheduled reset; `None` for one-time missions
    pub reset_time: Option<DateTime<Utc>>,
}

impl Mission {
    /// Whether the reset sweep running at `now` should pick this mission up
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.frequency.is_recurring()
            && self.status.is_active()
            && self.reset_time.map_or(false, |at| at < now)
    }

    /// The mission's own coin/experience amounts as an implicit grant
    pub fn base_grant(&self) -> Option<Rewardable> {
        if self.coins == 0 && self.experience == 0 {
            None
        } else {
            Some(Rewardable::Currency {
                coins: self.coins,
                experience: self.experience,
            })
        }
    }
}

/// Administrator input for a new mission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMission {
    pub text: String,
    pub coins: i64,
    pub experience: i64,
    pub frequency: Frequency,
    pub for_all: bool,
    pub requirements: Vec<NewRequirement>,
    pub rewards: Vec<Rewardable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTitle {
    pub name: String,
    pub description: String,
    pub requirements: Vec<NewRequirement>,
    pub rewards: Vec<Rewardable>,
}

/// One sub-goal of a mission or title, matched against incoming action keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: i64,
    pub track: Track,
    pub parent_id: i64,
    pub task: String,
    pub key: String,
    pub goal: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequirement {
    pub task: String,
    pub key: String,
    pub goal: i64,
}

impl NewRequirement {
    pub fn new(task: impl Into<String>, key: impl Into<String>, goal: i64) -> Self {
        Self {
            task: task.into(),
            key: key.into(),
            goal,
        }
    }

    /// Same requirement with surrounding whitespace stripped from task and key
    pub fn trimmed(&self) -> Self {
        Self {
            task: self.task.trim().to_string(),
            key: self.key.trim().to_string(),
            goal: self.goal,
        }
    }
}

/// Per-(user, requirement) counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub track: Track,
    pub user_id: i64,
    pub requirement_id: i64,
    pub progress: i64,
    pub completed: bool,
}

impl Progress {
    pub fn new(track: Track, user_id: i64, requirement_id: i64) -> Self {
        Self {
            track,
            user_id,
            requirement_id,
            progress: 0,
            completed: false,
        }
    }

    /// Add `delta` and re-check the goal. Returns true when this call
    /// flipped the row to completed. Never un-completes.
    pub fn advance(&mut self, delta: i64, goal: i64) -> bool {
        self.progress = self.progress.saturating_add(delta);
        let was_completed = self.completed;
        self.completed = was_completed || self.progress >= goal;
        self.completed && !was_completed
    }

    pub fn reset(&mut self) {
        self.progress = 0;
        self.completed = false;
    }
}

/// UserMission / UserTitle: the at-most-once completion guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub track: Track,
    pub user_id: i64,
    pub parent_id: i64,
    pub completed: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Completion {
    pub fn new(track: Track, user_id: i64, parent_id: i64) -> Self {
        Self {
            track,
            user_id,
            parent_id,
            completed: false,
            last_completed_at: None,
        }
    }

    /// Flip `completed` false → true. A second call is rejected.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), ProgressError> {
        if self.completed {
            return Err(ProgressError::AlreadyCompleted {
                track: self.track,
                user_id: self.user_id,
                parent_id: self.parent_id,
            });
        }
        self.completed = true;
        self.last_completed_at = Some(now);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.completed = false;
        self.last_completed_at = None;
    }
}

/// A title as held by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTitle {
    pub user_id: i64,
    pub title_id: i64,
    pub completed: bool,
    pub enabled: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Owner of a reward list (the "sourceable" side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardSource {
    Mission(i64),
    Title(i64),
}

impl RewardSource {
    pub fn of(track: Track, parent_id: i64) -> Self {
        match track {
            Track::Mission => Self::Mission(parent_id),
            Track::Title => Self::Title(parent_id),
        }
    }

    pub fn track(&self) -> Track {
        match self {
            Self::Mission(_) => Track::Mission,
            Self::Title(_) => Track::Title,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Mission(id) | Self::Title(id) => *id,
        }
    }
}

/// Tag stored next to a reward's payload reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardableKind {
    Currency,
    Title,
}

impl RewardableKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Currency => "currency",
            Self::Title => "title",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "currency" => Some(Self::Currency),
            "title" => Some(Self::Title),
            _ => None,
        }
    }
}

/// What a reward hands out (the "rewardable" side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rewardable {
    Currency { coins: i64, experience: i64 },
    Title { title_id: i64 },
}

impl Rewardable {
    pub fn kind(&self) -> RewardableKind {
        match self {
            Self::Currency { .. } => RewardableKind::Currency,
            Self::Title { .. } => RewardableKind::Title,
        }
    }

    pub fn coins(coins: i64) -> Self {
        Self::Currency {
            coins,
            experience: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// `None` for the implicit grant built from a mission's own amounts
    pub id: Option<i64>,
    pub source: RewardSource,
    pub grant: Rewardable,
}

/// Per-user coin balance; never negative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: i64,
    pub amount: i64,
}

impl Wallet {
    pub fn new(user_id: i64) -> Self {
        Self { user_id, amount: 0 }
    }

    pub fn credit(&mut self, amount: i64) -> Result<i64, ProgressError> {
        if amount < 0 {
            return Err(InvalidState::NegativeAmount { amount }.into());
        }
        self.amount = self
            .amount
            .checked_add(amount)
            .ok_or(InvalidState::BalanceOverflow {
                user_id: self.user_id,
            })?;
        Ok(self.amount)
    }

    pub fn debit(&mut self, amount: i64) -> Result<i64, ProgressError> {
        if amount < 0 {
            return Err(InvalidState::NegativeAmount { amount }.into());
        }
        if amount > self.amount {
            return Err(ProgressError::InsufficientFunds {
                have: self.amount,
                need: amount,
            });
        }
        self.amount -= amount;
        Ok(self.amount)
    }
}

/// Experience needed to go from level `n` to `n + 1` is `base_experience * n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCurve {
    pub base_experience: i64,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self {
            base_experience: 100,
        }
    }
}

impl LevelCurve {
    pub fn threshold(&self, level: i32) -> i64 {
        self.base_experience.max(1).saturating_mul(level.max(1) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub user_id: i64,
    pub level: i32,
    /// Experience accumulated towards the next level
    pub experience: i64,
}

impl Level {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            level: 1,
            experience: 0,
        }
    }

    /// Add experience and roll over as many levels as it pays for, up to
    /// `i32::MAX`. Returns the number of levels gained.
    pub fn gain_experience(&mut self, xp: i64, curve: &LevelCurve) -> u32 {
        self.experience = self.experience.saturating_add(xp.max(0));

        // cost of k levels from `from` is base * (k*from + k*(k-1)/2)
        let base = i128::from(curve.base_experience.max(1));
        let from = i128::from(self.level.max(1));
        let cost = |k: i128| base * (k * from + k * (k - 1) / 2);
        let available = i128::from(self.experience);

        let (mut lo, mut hi) = (0i128, i128::from(i32::MAX) - from);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if cost(mid) <= available {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        // lo <= i32::MAX - from and cost(lo) <= experience, so both fit
        self.experience -= cost(lo) as i64;
        self.level = (from + lo) as i32;
        lo as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_progress_completes_at_goal() {
        let mut p = Progress::new(Track::Mission, 1, 10);
        assert!(!p.advance(4, 5));
        assert!(!p.completed);
        assert!(p.advance(1, 5));
        assert!(p.completed);
        // further progress does not re-trigger
        assert!(!p.advance(3, 5));
        assert_eq!(p.progress, 8);
        assert!(p.completed);
    }

    #[test]
    fn test_progress_reset() {
        let mut p = Progress::new(Track::Title, 1, 10);
        p.advance(10, 3);
        p.reset();
        assert_eq!(p.progress, 0);
        assert!(!p.completed);
    }

    #[test]
    fn test_completion_only_once() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut c = Completion::new(Track::Mission, 7, 3);
        c.mark_completed(now).unwrap();
        assert_eq!(c.last_completed_at, Some(now));
        let err = c.mark_completed(now).unwrap_err();
        assert!(matches!(err, ProgressError::AlreadyCompleted { parent_id: 3, .. }));
    }

    #[test]
    fn test_wallet_debit_rejects_overdraw() {
        let mut w = Wallet::new(1);
        w.credit(30).unwrap();
        let err = w.debit(31).unwrap_err();
        assert!(matches!(err, ProgressError::InsufficientFunds { have: 30, need: 31 }));
        assert_eq!(w.amount, 30);
        assert_eq!(w.debit(30).unwrap(), 0);
    }

    #[test]
    fn test_wallet_rejects_negative_amounts() {
        let mut w = Wallet::new(1);
        assert!(w.credit(-1).is_err());
        assert!(w.debit(-1).is_err());
        assert_eq!(w.amount, 0);
    }

    #[test]
    fn test_level_rollover() {
        let curve = LevelCurve { base_experience: 100 };
        let mut level = Level::new(1);
        // 100 to reach 2, 200 to reach 3
        assert_eq!(level.gain_experience(350, &curve), 2);
        assert_eq!(level.level, 3);
        assert_eq!(level.experience, 50);
        assert_eq!(level.gain_experience(10, &curve), 0);
    }

    #[test]
    fn test_level_caps_at_i32_max() {
        let mut level = Level::new(1);
        let gained = level.gain_experience(4_000_000_000_000_000_000, &LevelCurve { base_experience: 1 });
        assert_eq!(level.level, i32::MAX);
        assert_eq!(gained, (i32::MAX - 1) as u32);
        assert!(level.experience >= 0);

        // already capped: experience accumulates, level stays
        assert_eq!(level.gain_experience(i64::MAX, &LevelCurve { base_experience: 1 }), 0);
        assert_eq!(level.level, i32::MAX);
        assert_eq!(level.experience, i64::MAX);
    }

    #[test]
    fn test_huge_grant_with_default_curve() {
        let curve = LevelCurve::default();
        let mut level = Level::new(1);
        let gained = level.gain_experience(i64::MAX, &curve);
        assert!(gained > 400_000_000);
        assert_eq!(level.level, 1 + gained as i32);
        assert!(level.experience >= 0);
        assert!(level.experience < curve.threshold(level.level));
    }

    #[test]
    fn test_mission_due_predicate() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let mut m = Mission {
            id: 1,
            text: "Play".into(),
            coins: 0,
            experience: 0,
            status: MissionStatus::Available,
            frequency: Frequency::Daily,
            for_all: true,
            reset_time: Some(now - chrono::Duration::hours(1)),
        };
        assert!(m.is_due(now));
        m.status = MissionStatus::Canceled;
        assert!(!m.is_due(now));
        m.status = MissionStatus::Available;
        m.frequency = Frequency::OneTime;
        assert!(!m.is_due(now));
        m.frequency = Frequency::Weekly;
        m.reset_time = Some(now);
        assert!(!m.is_due(now), "strictly before now");
    }

    #[test]
    fn test_tags_round_trip() {
        for s in [MissionStatus::Available, MissionStatus::Unavailable, MissionStatus::Canceled] {
            assert_eq!(MissionStatus::from_tag(s.as_str()), Some(s));
        }
        for f in [Frequency::OneTime, Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
            assert_eq!(Frequency::from_tag(f.as_str()), Some(f));
        }
        assert_eq!(RewardableKind::from_tag("badge"), None);
    }
}
