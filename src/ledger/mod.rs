//! Balance and transaction ledger.
//!
//! The ledger is the only component allowed to mutate a balance. Reads go
//! through the balance cache facade; writes commit to the store first and
//! invalidate cache entries afterwards, so a concurrent reader sees either
//! the old cached value or a miss, never a cached value newer than the store.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{keys, CacheFacade};
use crate::db::models::{
    Balance, BalanceEffect, Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::ports::{BalanceOp, LedgerStore, NewTransaction, StoreError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("unknown balance operation: {0}")]
    UnknownOperation(String),

    #[error("duplicate external id: {0}")]
    DuplicateExternalId(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateExternalId(id) => LedgerError::DuplicateExternalId(id),
            StoreError::Persistence(msg) => LedgerError::Persistence(msg),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Reported status of an inbound payment callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Paid,
    Failed,
    Cancelled,
}

impl FromStr for CallbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(CallbackStatus::Paid),
            "failed" => Ok(CallbackStatus::Failed),
            "cancelled" => Ok(CallbackStatus::Cancelled),
            other => Err(format!("unknown callback status: {other}")),
        }
    }
}

/// Cached/serialized balance view returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Balance> for BalanceView {
    fn from(b: Balance) -> Self {
        Self {
            user_id: b.user_id,
            amount: b.amount,
            currency: b.currency,
            updated_at: b.updated_at,
        }
    }
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    balance_cache: Arc<CacheFacade>,
    default_currency: String,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        balance_cache: Arc<CacheFacade>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            balance_cache,
            default_currency: default_currency.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Resolves an external caller id to the internal account id, creating
    /// the user row on first contact. Every other ledger operation expects
    /// the internal id.
    pub async fn ensure_user(&self, external_user_id: i64) -> LedgerResult<i64> {
        Ok(self.store.get_or_create_user(external_user_id).await?)
    }

    /// Cache-aside balance read. A user without a balance row gets a zero
    /// row provisioned on first read. Cache failures never surface; the
    /// facade degrades them into misses.
    pub async fn get_balance(&self, user_id: i64) -> LedgerResult<BalanceView> {
        let key = keys::user_balance(user_id);

        if let Ok(Some(view)) = self.balance_cache.get::<BalanceView>(&key).await {
            return Ok(view);
        }

        let balance = match self.store.get_balance(user_id).await? {
            Some(balance) => balance,
            None => {
                // First use: provision the zero row through the same atomic
                // upsert every other adjustment uses.
                self.store
                    .adjust_balance(
                        user_id,
                        &BigDecimal::from(0),
                        BalanceOp::Add,
                        &self.default_currency,
                    )
                    .await?
            }
        };

        let view = BalanceView::from(balance);
        if let Err(err) = self.balance_cache.set(&key, &view).await {
            tracing::warn!(user_id, %err, "balance cache write failed");
        }
        Ok(view)
    }

    /// Applies an arithmetic operation to the stored balance, then
    /// invalidates the cached entry. `op` is the external string form.
    pub async fn adjust_balance(
        &self,
        user_id: i64,
        amount: &BigDecimal,
        op: &str,
    ) -> LedgerResult<BalanceView> {
        let op = BalanceOp::from_str(op).map_err(LedgerError::UnknownOperation)?;
        self.adjust_balance_op(user_id, amount, op).await
    }

    pub async fn adjust_balance_op(
        &self,
        user_id: i64,
        amount: &BigDecimal,
        op: BalanceOp,
    ) -> LedgerResult<BalanceView> {
        let balance = self
            .store
            .adjust_balance(user_id, amount, op, &self.default_currency)
            .await?;

        // Store committed; now drop the stale cache entry.
        self.balance_cache
            .invalidate(&keys::user_balance(user_id))
            .await;

        tracing::info!(
            user_id,
            op = op.as_str(),
            amount = %amount,
            new_amount = %balance.amount,
            "balance adjusted"
        );
        Ok(BalanceView::from(balance))
    }

    pub async fn create_transaction(&self, tx: NewTransaction) -> LedgerResult<i64> {
        let id = self.store.insert_transaction(&tx).await?;
        tracing::info!(
            transaction_id = id,
            user_id = tx.user_id,
            transaction_type = tx.transaction_type.as_str(),
            amount = %tx.amount,
            "transaction created"
        );
        Ok(id)
    }

    pub async fn get_transaction(&self, id: i64) -> LedgerResult<Option<Transaction>> {
        Ok(self.store.get_transaction(id).await?)
    }

    pub async fn list_transactions(
        &self,
        user_id: i64,
        transaction_type: Option<TransactionType>,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .store
            .list_user_transactions(user_id, transaction_type, limit, offset)
            .await?)
    }

    /// Moves a PENDING transaction to a terminal status. Returns false when
    /// the transaction does not exist or has already left PENDING.
    ///
    /// This is the only place a transaction completion moves the balance,
    /// and the conditional store update guarantees it happens at most once
    /// per transaction.
    pub async fn transition_status(
        &self,
        transaction_id: i64,
        new_status: TransactionStatus,
        metadata: Option<TransactionMetadata>,
    ) -> LedgerResult<bool> {
        let metadata = metadata.map(|m| m.to_column());
        let updated = self
            .store
            .transition_pending(transaction_id, new_status, metadata)
            .await?;

        let Some(tx) = updated else {
            tracing::debug!(transaction_id, "status transition skipped, not pending");
            return Ok(false);
        };

        if new_status == TransactionStatus::Completed {
            self.apply_completion_effect(&tx).await?;
        }

        tracing::info!(
            transaction_id,
            user_id = tx.user_id,
            status = new_status.as_str(),
            "transaction transitioned"
        );
        Ok(true)
    }

    /// Matches an inbound payment callback to a transaction by external id
    /// and settles it. Idempotent: a repeat callback for an already settled
    /// transaction reports success without touching the balance.
    pub async fn apply_inbound_callback(
        &self,
        external_id: &str,
        status: CallbackStatus,
        reported_amount: Option<&BigDecimal>,
    ) -> LedgerResult<bool> {
        let Some(tx) = self.store.get_transaction_by_external_id(external_id).await? else {
            tracing::warn!(external_id, "callback for unknown external id");
            return Ok(false);
        };

        if tx.status() == Some(TransactionStatus::Completed) {
            tracing::info!(external_id, transaction_id = tx.id, "duplicate callback ignored");
            return Ok(true);
        }

        if let Some(reported) = reported_amount {
            if *reported != tx.amount {
                tracing::warn!(
                    external_id,
                    recorded = %tx.amount,
                    reported = %reported,
                    "callback amount differs from recorded transaction"
                );
            }
        }

        let new_status = match status {
            CallbackStatus::Paid => TransactionStatus::Completed,
            CallbackStatus::Failed | CallbackStatus::Cancelled => TransactionStatus::Failed,
        };

        let metadata = TransactionMetadata::V1 {
            stars_count: None,
            purchase_type: None,
            payment_status: Some(
                match status {
                    CallbackStatus::Paid => "paid",
                    CallbackStatus::Failed => "failed",
                    CallbackStatus::Cancelled => "cancelled",
                }
                .to_string(),
            ),
            webhook_received_at: Some(Utc::now()),
            cancelled_at: None,
            note: None,
        };

        self.transition_status(tx.id, new_status, Some(metadata))
            .await
    }

    /// Cancels a PENDING purchase and credits the held amount back.
    /// Any other state or type is rejected with false.
    pub async fn cancel_and_refund(&self, transaction_id: i64) -> LedgerResult<bool> {
        let Some(tx) = self.store.get_transaction(transaction_id).await? else {
            return Ok(false);
        };

        if tx.transaction_type() != Some(TransactionType::Purchase)
            || tx.status() != Some(TransactionStatus::Pending)
        {
            tracing::debug!(
                transaction_id,
                transaction_type = %tx.transaction_type,
                status = %tx.status,
                "cancellation rejected"
            );
            return Ok(false);
        }

        let metadata = TransactionMetadata::V1 {
            stars_count: None,
            purchase_type: None,
            payment_status: None,
            webhook_received_at: None,
            cancelled_at: Some(Utc::now()),
            note: None,
        };

        let updated = self
            .store
            .transition_pending(transaction_id, TransactionStatus::Cancelled, Some(metadata.to_column()))
            .await?;

        let Some(tx) = updated else {
            // Lost the race against another settlement.
            return Ok(false);
        };

        self.adjust_balance_op(tx.user_id, &tx.amount, BalanceOp::Add)
            .await?;
        tracing::info!(transaction_id, user_id = tx.user_id, "purchase cancelled and refunded");
        Ok(true)
    }

    /// Debit for purchases, credit for refund/bonus/recharge, nothing for
    /// adjustments. Called exactly once per transaction, from the single
    /// successful PENDING -> COMPLETED transition.
    async fn apply_completion_effect(&self, tx: &Transaction) -> LedgerResult<()> {
        let effect = tx
            .transaction_type()
            .map(|t| t.balance_effect())
            .unwrap_or(BalanceEffect::None);

        let op = match effect {
            BalanceEffect::Credit => BalanceOp::Add,
            BalanceEffect::Debit => BalanceOp::Subtract,
            BalanceEffect::None => return Ok(()),
        };

        self.adjust_balance_op(tx.user_id, &tx.amount, op).await?;
        Ok(())
    }
}
