//! Wallet ledger
//!
//! Balance reads and coin adds/subtracts outside of reward issuance (store
//! purchases, refunds). Each mutation locks the wallet row, so a subtract
//! re-checks the balance in the same critical section it writes in.

use std::sync::Arc;
use tracing::debug;

use crate::error::{Entity, ProgressError, ProgressResult};
use crate::model::Wallet;
use crate::storage::{Store, StoreTx};

pub struct WalletLedger<S: Store> {
    store: Arc<S>,
}

impl<S: Store> WalletLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user_id: i64) -> ProgressResult<i64> {
        let mut tx = self.store.begin().await?;
        Ok(locked(tx.as_mut(), user_id).await?.amount)
    }

    /// Credit `amount` coins, returns the new balance
    pub async fn add(&self, user_id: i64, amount: i64) -> ProgressResult<i64> {
        self.mutate(user_id, |wallet| wallet.credit(amount)).await
    }

    /// Debit `amount` coins, returns the new balance. Fails with
    /// `InsufficientFunds` and leaves the balance alone when it would go
    /// negative.
    pub async fn subtract(&self, user_id: i64, amount: i64) -> ProgressResult<i64> {
        self.mutate(user_id, |wallet| wallet.debit(amount)).await
    }

    async fn mutate(
        &self,
        user_id: i64,
        apply: impl FnOnce(&mut Wallet) -> ProgressResult<i64>,
    ) -> ProgressResult<i64> {
        let mut tx = self.store.begin().await?;
        let mut wallet = locked(tx.as_mut(), user_id).await?;
        let balance = apply(&mut wallet)?;
        tx.save_wallet(&wallet).await?;
        tx.commit().await?;
        debug!(user_id, balance, "Wallet updated");
        Ok(balance)
    }
}

async fn locked(tx: &mut dyn StoreTx, user_id: i64) -> ProgressResult<Wallet> {
    tx.lock_wallet(user_id)
        .await?
        .ok_or(ProgressError::NotFound(Entity::Wallet(user_id)))
}
