//! Storage seam between the ledger and its persistent store.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::db::models::{Balance, Transaction, TransactionStatus, TransactionType};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique-constraint hit on `transactions.external_id`.
    #[error("duplicate external id: {0}")]
    DuplicateExternalId(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::DuplicateExternalId(db_err.message().to_string());
            }
        }
        StoreError::Persistence(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How a balance adjustment is applied to the stored amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    Add,
    Subtract,
    Set,
}

impl BalanceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceOp::Add => "add",
            BalanceOp::Subtract => "subtract",
            BalanceOp::Set => "set",
        }
    }
}

impl std::str::FromStr for BalanceOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(BalanceOp::Add),
            "subtract" => Ok(BalanceOp::Subtract),
            "set" => Ok(BalanceOp::Set),
            other => Err(other.to_string()),
        }
    }
}

/// Parameters for inserting a new transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub metadata: Option<String>,
}

/// Persistent store of record for users, balances and transactions.
///
/// The store is the only place read-modify-write on a balance may happen,
/// and implementations must make `adjust_balance` a single atomic statement.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Resolves an external user id to an internal one, creating the user
    /// row on first contact.
    async fn get_or_create_user(&self, external_user_id: i64) -> StoreResult<i64>;

    async fn get_balance(&self, user_id: i64) -> StoreResult<Option<Balance>>;

    /// Applies the arithmetic atomically, provisioning a zero row when the
    /// user has no balance yet. Returns the balance after the operation.
    async fn adjust_balance(
        &self,
        user_id: i64,
        amount: &BigDecimal,
        op: BalanceOp,
        currency: &str,
    ) -> StoreResult<Balance>;

    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64>;

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>>;

    async fn get_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Moves a transaction out of PENDING. Conditional on the current status
    /// still being PENDING, so a terminal transition happens at most once;
    /// returns the updated row, or None when the guard did not match.
    async fn transition_pending(
        &self,
        id: i64,
        status: TransactionStatus,
        metadata: Option<String>,
    ) -> StoreResult<Option<Transaction>>;

    async fn list_user_transactions(
        &self,
        user_id: i64,
        transaction_type: Option<TransactionType>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>>;
}
