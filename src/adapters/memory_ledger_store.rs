//! In-memory implementation of LedgerStore.
//!
//! Backs the test suite and single-process development runs; production
//! deployments use [`PostgresLedgerStore`](super::PostgresLedgerStore).

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::models::{Balance, Transaction, TransactionStatus, TransactionType};
use crate::ports::{BalanceOp, LedgerStore, NewTransaction, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    users: HashMap<i64, i64>,
    balances: HashMap<i64, Balance>,
    transactions: Vec<Transaction>,
    next_user_id: i64,
    next_tx_id: i64,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_or_create_user(&self, external_user_id: i64) -> StoreResult<i64> {
        let mut inner = self.inner.lock().expect("ledger store lock poisoned");
        if let Some(id) = inner.users.get(&external_user_id) {
            return Ok(*id);
        }
        inner.next_user_id += 1;
        let id = inner.next_user_id;
        inner.users.insert(external_user_id, id);
        Ok(id)
    }

    async fn get_balance(&self, user_id: i64) -> StoreResult<Option<Balance>> {
        let inner = self.inner.lock().expect("ledger store lock poisoned");
        Ok(inner.balances.get(&user_id).cloned())
    }

    async fn adjust_balance(
        &self,
        user_id: i64,
        amount: &BigDecimal,
        op: BalanceOp,
        currency: &str,
    ) -> StoreResult<Balance> {
        let mut inner = self.inner.lock().expect("ledger store lock poisoned");
        let now = Utc::now();
        let balance = inner.balances.entry(user_id).or_insert_with(|| Balance {
            user_id,
            amount: BigDecimal::from(0),
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        });

        match op {
            BalanceOp::Add => balance.amount += amount,
            BalanceOp::Subtract => balance.amount -= amount,
            BalanceOp::Set => balance.amount = amount.clone(),
        }
        balance.updated_at = now;

        Ok(balance.clone())
    }

    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64> {
        let mut inner = self.inner.lock().expect("ledger store lock poisoned");

        if let Some(external_id) = &tx.external_id {
            if inner
                .transactions
                .iter()
                .any(|t| t.external_id.as_deref() == Some(external_id))
            {
                return Err(StoreError::DuplicateExternalId(external_id.clone()));
            }
        }

        inner.next_tx_id += 1;
        let id = inner.next_tx_id;
        let now = Utc::now();
        inner.transactions.push(Transaction {
            id,
            user_id: tx.user_id,
            transaction_type: tx.transaction_type.as_str().to_string(),
            status: tx.status.as_str().to_string(),
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            description: tx.description.clone(),
            external_id: tx.external_id.clone(),
            metadata: tx.metadata.clone(),
            created_at: now,
            updated_at: now,
        });

        Ok(id)
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().expect("ledger store lock poisoned");
        Ok(inner.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn get_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().expect("ledger store lock poisoned");
        Ok(inner
            .transactions
            .iter()
            .find(|t| t.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn transition_pending(
        &self,
        id: i64,
        status: TransactionStatus,
        metadata: Option<String>,
    ) -> StoreResult<Option<Transaction>> {
        let mut inner = self.inner.lock().expect("ledger store lock poisoned");
        let tx = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending.as_str());

        match tx {
            Some(tx) => {
                tx.status = status.as_str().to_string();
                if metadata.is_some() {
                    tx.metadata = metadata;
                }
                tx.updated_at = Utc::now();
                Ok(Some(tx.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_user_transactions(
        &self,
        user_id: i64,
        transaction_type: Option<TransactionType>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.lock().expect("ledger store lock poisoned");
        let mut rows: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| match transaction_type {
                Some(ty) => t.transaction_type == ty.as_str(),
                None => true,
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
