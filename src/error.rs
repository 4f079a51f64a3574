//! Error taxonomy for progress, completion, reward and wallet operations
//!
//! Every operation returns these as values. Only `Persistence` is a
//! failure of the store itself; the rest are business outcomes the caller
//! is expected to branch on.

use serde::Serialize;
use std::fmt;

use crate::model::{MissionStatus, Track};
use crate::storage::repository::StoreError;
use crate::validation::ValidationError;

/// Referenced record that does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Entity {
    User(i64),
    Mission(i64),
    Title(i64),
    Wallet(i64),
    Level(i64),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User(id) => write!(f, "user {}", id),
            Entity::Mission(id) => write!(f, "mission {}", id),
            Entity::Title(id) => write!(f, "title {}", id),
            Entity::Wallet(id) => write!(f, "wallet of user {}", id),
            Entity::Level(id) => write!(f, "level of user {}", id),
        }
    }
}

/// Why an otherwise well-formed operation was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum InvalidState {
    #[error("mission {mission_id} is {status:?}")]
    MissionInactive {
        mission_id: i64,
        status: MissionStatus,
    },
    #[error("user {user_id} is not assigned to mission {mission_id}")]
    NotAssigned { user_id: i64, mission_id: i64 },
    #[error("{track} {parent_id}: {satisfied}/{total} requirements satisfied")]
    NotSatisfied {
        track: Track,
        parent_id: i64,
        satisfied: usize,
        total: usize,
    },
    #[error("user {user_id} does not hold title {title_id}")]
    TitleNotHeld { user_id: i64, title_id: i64 },
    #[error("amount must not be negative, got {amount}")]
    NegativeAmount { amount: i64 },
    #[error("balance overflow for user {user_id}")]
    BalanceOverflow { user_id: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Not found: {0}")]
    NotFound(Entity),
    #[error("Invalid state: {0}")]
    InvalidState(#[from] InvalidState),
    #[error("{track} {parent_id} already completed by user {user_id}")]
    AlreadyCompleted {
        track: Track,
        user_id: i64,
        parent_id: i64,
    },
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: i64, need: i64 },
    #[error("Rejected input: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ProgressError {
    /// True for outcomes a caller can report as "already done"
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyCompleted { .. })
    }
}

pub type ProgressResult<T> = Result<T, ProgressError>;
