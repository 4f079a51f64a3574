//! Input validation for actions and administrator-created records
//!
//! The validator is an ordinary value built from `ProgressConfig` and owned
//! by the service that uses it.

use crate::config::ProgressConfig;
use crate::model::{NewMission, NewRequirement, NewTitle, Rewardable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("action key must not be empty")]
    EmptyKey,
    #[error("action key longer than {max} characters")]
    KeyTooLong { max: usize },
    #[error("progress delta must be between 1 and {max}, got {delta}")]
    DeltaOutOfRange { delta: i64, max: i64 },
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("requirement goal must be between 1 and {max}, got {goal}")]
    GoalOutOfRange { goal: i64, max: i64 },
    #[error("at least one requirement is needed")]
    NoRequirements,
    #[error("duplicate requirement key '{key}'")]
    DuplicateKey { key: String },
    #[error("reward amounts must not be negative")]
    NegativeReward,
    #[error("reward amount {amount} exceeds the limit of {max}")]
    RewardTooLarge { amount: i64, max: i64 },
    #[error("username must be 1..=50 characters")]
    BadUsername,
}

#[derive(Debug, Clone)]
pub struct Validator {
    max_delta: i64,
    max_key_len: usize,
    max_goal: i64,
    max_reward: i64,
}

impl Validator {
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            max_delta: config.max_delta,
            max_key_len: config.max_key_len,
            max_goal: config.max_goal,
            max_reward: config.max_reward,
        }
    }

    pub fn action(&self, key: &str, delta: i64) -> Result<(), ValidationError> {
        self.key(key)?;
        if delta < 1 || delta > self.max_delta {
            return Err(ValidationError::DeltaOutOfRange {
                delta,
                max: self.max_delta,
            });
        }
        Ok(())
    }

    pub fn username(&self, username: &str) -> Result<(), ValidationError> {
        let len = username.trim().chars().count();
        if len == 0 || len > 50 {
            return Err(ValidationError::BadUsername);
        }
        Ok(())
    }

    pub fn new_mission(&self, mission: &NewMission) -> Result<(), ValidationError> {
        if mission.text.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "text" });
        }
        self.amounts(mission.coins, mission.experience)?;
        self.requirements(&mission.requirements)?;
        mission.rewards.iter().try_for_each(|r| self.grant(r))
    }

    pub fn new_title(&self, title: &NewTitle) -> Result<(), ValidationError> {
        if title.name.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "name" });
        }
        self.requirements(&title.requirements)?;
        title.rewards.iter().try_for_each(|r| self.grant(r))
    }

    pub fn grant(&self, grant: &Rewardable) -> Result<(), ValidationError> {
        match *grant {
            Rewardable::Currency { coins, experience } => self.amounts(coins, experience),
            Rewardable::Title { .. } => Ok(()),
        }
    }

    fn amounts(&self, coins: i64, experience: i64) -> Result<(), ValidationError> {
        for amount in [coins, experience] {
            if amount < 0 {
                return Err(ValidationError::NegativeReward);
            }
            if amount > self.max_reward {
                return Err(ValidationError::RewardTooLarge {
                    amount,
                    max: self.max_reward,
                });
            }
        }
        Ok(())
    }

    /// Keys are compared and stored trimmed; the limit counts characters
    fn key(&self, key: &str) -> Result<(), ValidationError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if key.chars().count() > self.max_key_len {
            return Err(ValidationError::KeyTooLong {
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    fn requirements(&self, requirements: &[NewRequirement]) -> Result<(), ValidationError> {
        if requirements.is_empty() {
            return Err(ValidationError::NoRequirements);
        }
        let mut seen = std::collections::HashSet::new();
        for req in requirements {
            if req.task.trim().is_empty() {
                return Err(ValidationError::EmptyField { field: "task" });
            }
            self.key(&req.key)?;
            if req.goal < 1 || req.goal > self.max_goal {
                return Err(ValidationError::GoalOutOfRange {
                    goal: req.goal,
                    max: self.max_goal,
                });
            }
            if !seen.insert(req.key.trim()) {
                return Err(ValidationError::DuplicateKey {
                    key: req.key.trim().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Frequency;

    fn validator() -> Validator {
        Validator::new(&ProgressConfig::default())
    }

    fn mission(requirements: Vec<NewRequirement>) -> NewMission {
        NewMission {
            text: "Play ten games".into(),
            coins: 50,
            experience: 0,
            frequency: Frequency::Daily,
            for_all: true,
            requirements,
            rewards: vec![],
        }
    }

    #[test]
    fn test_action_bounds() {
        let v = validator();
        assert!(v.action("play_game", 1).is_ok());
        assert_eq!(v.action("", 1), Err(ValidationError::EmptyKey));
        assert!(matches!(
            v.action("play_game", 0),
            Err(ValidationError::DeltaOutOfRange { delta: 0, .. })
        ));
        assert!(v.action("play_game", -3).is_err());
        let long = "k".repeat(ProgressConfig::default().max_key_len + 1);
        assert!(matches!(v.action(&long, 1), Err(ValidationError::KeyTooLong { .. })));
    }

    #[test]
    fn test_mission_needs_requirements() {
        let v = validator();
        assert_eq!(v.new_mission(&mission(vec![])), Err(ValidationError::NoRequirements));
        assert!(v
            .new_mission(&mission(vec![NewRequirement::new("Play", "play_game", 10)]))
            .is_ok());
    }

    #[test]
    fn test_mission_rejects_bad_goal_and_duplicates() {
        let v = validator();
        let zero = mission(vec![NewRequirement::new("Play", "play_game", 0)]);
        assert!(matches!(v.new_mission(&zero), Err(ValidationError::GoalOutOfRange { .. })));

        let dup = mission(vec![
            NewRequirement::new("Play", "play_game", 1),
            NewRequirement::new("Play more", "play_game", 5),
        ]);
        assert!(matches!(v.new_mission(&dup), Err(ValidationError::DuplicateKey { .. })));
    }

    #[test]
    fn test_negative_rewards_rejected() {
        let v = validator();
        let mut m = mission(vec![NewRequirement::new("Play", "play_game", 1)]);
        m.rewards.push(Rewardable::Currency {
            coins: -5,
            experience: 0,
        });
        assert_eq!(v.new_mission(&m), Err(ValidationError::NegativeReward));
    }

    #[test]
    fn test_oversized_rewards_rejected() {
        let v = validator();
        let max = ProgressConfig::default().max_reward;
        assert!(v.grant(&Rewardable::Currency { coins: max, experience: max }).is_ok());
        assert_eq!(
            v.grant(&Rewardable::Currency { coins: 0, experience: i64::MAX }),
            Err(ValidationError::RewardTooLarge { amount: i64::MAX, max })
        );

        let mut m = mission(vec![NewRequirement::new("Play", "play_game", 1)]);
        m.experience = 4_000_000_000_000_000_000;
        assert!(matches!(v.new_mission(&m), Err(ValidationError::RewardTooLarge { .. })));
    }

    #[test]
    fn test_keys_are_trimmed_and_counted_in_chars() {
        let v = validator();
        let padded = mission(vec![
            NewRequirement::new("Play", "play_game", 1),
            NewRequirement::new("Play again", " play_game ", 1),
        ]);
        assert_eq!(
            v.new_mission(&padded),
            Err(ValidationError::DuplicateKey { key: "play_game".into() })
        );

        let max = ProgressConfig::default().max_key_len;
        let wide = "é".repeat(max);
        assert!(wide.len() > max);
        assert!(v.action(&wide, 1).is_ok());
        assert!(v.action(&format!("  {}  ", wide), 1).is_ok());
        assert!(v.action(&"é".repeat(max + 1), 1).is_err());
    }
}
