//! Postgres implementation of LedgerStore.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::db::models::{Balance, Transaction, TransactionStatus, TransactionType};
use crate::ports::{BalanceOp, LedgerStore, NewTransaction, StoreResult};

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_or_create_user(&self, external_user_id: i64) -> StoreResult<i64> {
        // ON CONFLICT DO UPDATE so RETURNING yields the id on both paths.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (external_user_id)
            VALUES ($1)
            ON CONFLICT (external_user_id)
            DO UPDATE SET external_user_id = EXCLUDED.external_user_id
            RETURNING id
            "#,
        )
        .bind(external_user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_balance(&self, user_id: i64) -> StoreResult<Option<Balance>> {
        let balance = sqlx::query_as::<_, Balance>(
            "SELECT user_id, amount, currency, created_at, updated_at FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn adjust_balance(
        &self,
        user_id: i64,
        amount: &BigDecimal,
        op: BalanceOp,
        currency: &str,
    ) -> StoreResult<Balance> {
        // Single-statement upsert: the increment happens inside the store,
        // never as an application-level read-then-write.
        let query = match op {
            BalanceOp::Add => {
                r#"
                INSERT INTO balances (user_id, amount, currency)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id) DO UPDATE
                SET amount = balances.amount + EXCLUDED.amount, updated_at = NOW()
                RETURNING user_id, amount, currency, created_at, updated_at
                "#
            }
            BalanceOp::Subtract => {
                r#"
                INSERT INTO balances (user_id, amount, currency)
                VALUES ($1, -$2, $3)
                ON CONFLICT (user_id) DO UPDATE
                SET amount = balances.amount - $2, updated_at = NOW()
                RETURNING user_id, amount, currency, created_at, updated_at
                "#
            }
            BalanceOp::Set => {
                r#"
                INSERT INTO balances (user_id, amount, currency)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id) DO UPDATE
                SET amount = EXCLUDED.amount, updated_at = NOW()
                RETURNING user_id, amount, currency, created_at, updated_at
                "#
            }
        };

        let balance = sqlx::query_as::<_, Balance>(query)
            .bind(user_id)
            .bind(amount)
            .bind(currency)
            .fetch_one(&self.pool)
            .await?;

        Ok(balance)
    }

    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (
                user_id, transaction_type, status, amount, currency,
                description, external_id, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(tx.user_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(&tx.description)
        .bind(&tx.external_id)
        .bind(&tx.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tx)
    }

    async fn get_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let tx =
            sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(tx)
    }

    async fn transition_pending(
        &self,
        id: i64,
        status: TransactionStatus,
        metadata: Option<String>,
    ) -> StoreResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = $2,
                metadata = COALESCE($3, metadata),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(metadata)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tx)
    }

    async fn list_user_transactions(
        &self,
        user_id: i64,
        transaction_type: Option<TransactionType>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = match transaction_type {
            Some(ty) => {
                sqlx::query_as::<_, Transaction>(
                    r#"
                    SELECT * FROM transactions
                    WHERE user_id = $1 AND transaction_type = $2
                    ORDER BY created_at DESC LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(user_id)
                .bind(ty.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Transaction>(
                    r#"
                    SELECT * FROM transactions
                    WHERE user_id = $1
                    ORDER BY created_at DESC LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }
}
