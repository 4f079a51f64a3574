//! PlayHub Server Library
//!
//! Mission and title progress engine for the PlayHub game catalog:
//! - Per-user progress against keyed requirement lists
//! - At-most-once completion with coin, experience and title rewards
//! - Scheduled reset of daily/weekly/monthly missions
//! - Wallet ledger with overdraw protection
//! - PostgreSQL (sqlx) and in-memory storage behind one transactional trait

pub mod config;
pub mod error;
pub mod logging;
pub mod missions; // Resolver, evaluator, rewards, reset sweep
pub mod model;
pub mod storage; // Store / StoreTx, PostgreSQL + memory
pub mod validation;
pub mod wallet;

// Re-export commonly used types
pub use config::{ProgressConfig, ServerConfig};
pub use error::{Entity, InvalidState, ProgressError, ProgressResult};
pub use missions::{MissionService, ParentStatus, ProgressReport, RewardSummary, SweepReport};
pub use storage::{MemoryStore, PostgresStore, Store, StoreError, StoreTx};
pub use wallet::WalletLedger;
