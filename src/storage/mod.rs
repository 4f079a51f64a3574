//! Storage Layer - persistence for the progress engine
//!
//! Implements the Repository pattern with a transactional unit of work:
//! - **PostgreSQL**: durable store, row locks via `SELECT ... FOR UPDATE`
//! - **Memory**: in-process store for tests, benches and embedding
//!
//! ## Architecture
//! ```text
//! [MissionService / WalletLedger]
//!       ↓
//! [Store::begin → StoreTx]
//!       ↓
//! ┌─────────────────┬──────────────┐
//! │ PostgresStore   │ MemoryStore  │
//! │ (sqlx, PgTx)    │ (MemoryTx)   │
//! └─────────────────┴──────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let pg = PostgresStore::new("postgres://...", 10).await?;
//!
//! let mut tx = pg.begin().await?;
//! let mut wallet = tx.lock_wallet(user_id).await?.ok_or(...)?;
//! wallet.credit(50)?;
//! tx.save_wallet(&wallet).await?;
//! tx.commit().await?;
//! ```

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod repository;

pub use memory::{Fault, MemoryStore};
pub use postgres::PostgresStore;
pub use repository::{Store, StoreError, StoreResult, StoreTx};
