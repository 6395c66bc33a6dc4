//! Star purchase and balance recharge flows.
//!
//! Outcomes are structured, never bare errors: the dialog layer upstream
//! renders a specific message per failure, so "insufficient balance" and
//! "invalid amount" must be distinguishable without string matching.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{keys, CacheFacade};
use crate::db::models::{
    Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::ledger::{Ledger, LedgerError, LedgerResult};
use crate::ports::NewTransaction;

#[derive(Debug, Clone)]
pub struct PurchaseSettings {
    pub min_purchase_amount: i64,
    pub max_purchase_amount: i64,
    pub min_recharge_amount: BigDecimal,
    pub max_recharge_amount: BigDecimal,
    pub currency: String,
}

impl Default for PurchaseSettings {
    fn default() -> Self {
        Self {
            min_purchase_amount: 1,
            max_purchase_amount: 100_000,
            min_recharge_amount: BigDecimal::from(10),
            max_recharge_amount: BigDecimal::from(10_000),
            currency: "TON".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Pending,
    Failed,
}

/// Structured result of a purchase or recharge attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_balance: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<BigDecimal>,
}

impl PurchaseOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            transaction_id: None,
            external_id: None,
            stars_count: None,
            old_balance: None,
            new_balance: None,
        }
    }
}

pub struct PurchaseService {
    ledger: Arc<Ledger>,
    profile_cache: Arc<CacheFacade>,
    settings: PurchaseSettings,
}

impl PurchaseService {
    pub fn new(
        ledger: Arc<Ledger>,
        profile_cache: Arc<CacheFacade>,
        settings: PurchaseSettings,
    ) -> Self {
        Self {
            ledger,
            profile_cache,
            settings,
        }
    }

    /// Buys stars against the held balance: pending purchase transaction,
    /// completion (which debits), then user-cache invalidation.
    pub async fn purchase_with_balance(
        &self,
        user_id: i64,
        stars: i64,
    ) -> LedgerResult<PurchaseOutcome> {
        if stars < self.settings.min_purchase_amount || stars > self.settings.max_purchase_amount {
            return Ok(PurchaseOutcome::failed("Invalid purchase amount"));
        }
        let amount = BigDecimal::from(stars);

        let balance = self.ledger.get_balance(user_id).await?;
        if balance.amount < amount {
            tracing::info!(user_id, stars, balance = %balance.amount, "purchase rejected, insufficient balance");
            let mut outcome = PurchaseOutcome::failed("Insufficient balance");
            outcome.old_balance = Some(balance.amount);
            outcome.stars_count = Some(stars);
            return Ok(outcome);
        }

        let external_id = format!("balance_purchase_{user_id}_{}", Uuid::new_v4());
        let metadata = TransactionMetadata::V1 {
            stars_count: Some(stars),
            purchase_type: Some("balance".to_string()),
            payment_status: None,
            webhook_received_at: None,
            cancelled_at: None,
            note: None,
        };

        let transaction_id = self
            .ledger
            .create_transaction(NewTransaction {
                user_id,
                transaction_type: TransactionType::Purchase,
                status: TransactionStatus::Pending,
                amount: amount.clone(),
                currency: self.settings.currency.clone(),
                description: Some(format!("Purchase of {stars} stars from balance")),
                external_id: Some(external_id.clone()),
                metadata: Some(metadata.to_column()),
            })
            .await?;

        // Completion performs the debit exactly once.
        let completed = self
            .ledger
            .transition_status(transaction_id, TransactionStatus::Completed, None)
            .await?;
        if !completed {
            return Ok(PurchaseOutcome::failed("Failed to complete transaction"));
        }

        self.profile_cache
            .invalidate_pattern(&keys::user_pattern(user_id))
            .await;

        let updated = self.ledger.get_balance(user_id).await?;
        tracing::info!(user_id, stars, transaction_id, "star purchase completed");

        Ok(PurchaseOutcome {
            status: OutcomeStatus::Success,
            error: None,
            transaction_id: Some(transaction_id),
            external_id: Some(external_id),
            stars_count: Some(stars),
            old_balance: Some(balance.amount),
            new_balance: Some(updated.amount),
        })
    }

    /// Opens a recharge: a pending credit transaction carrying a generated
    /// external id. The payment callback settles it later.
    pub async fn initiate_recharge(
        &self,
        user_id: i64,
        amount: BigDecimal,
    ) -> LedgerResult<PurchaseOutcome> {
        if amount < self.settings.min_recharge_amount || amount > self.settings.max_recharge_amount
        {
            return Ok(PurchaseOutcome::failed("Invalid recharge amount"));
        }

        let external_id = format!("recharge_{}", Uuid::new_v4());
        let metadata = TransactionMetadata::V1 {
            stars_count: None,
            purchase_type: Some("recharge".to_string()),
            payment_status: Some("pending".to_string()),
            webhook_received_at: None,
            cancelled_at: None,
            note: Some(format!("initiated at {}", Utc::now().to_rfc3339())),
        };

        let transaction_id = match self
            .ledger
            .create_transaction(NewTransaction {
                user_id,
                transaction_type: TransactionType::Recharge,
                status: TransactionStatus::Pending,
                amount: amount.clone(),
                currency: self.settings.currency.clone(),
                description: Some("Balance recharge".to_string()),
                external_id: Some(external_id.clone()),
                metadata: Some(metadata.to_column()),
            })
            .await
        {
            Ok(id) => id,
            Err(LedgerError::DuplicateExternalId(_)) => {
                // A v4 collision is not a caller problem; report failure.
                return Ok(PurchaseOutcome::failed("Failed to create transaction"));
            }
            Err(err) => return Err(err),
        };

        tracing::info!(user_id, transaction_id, external_id = %external_id, "recharge initiated");

        Ok(PurchaseOutcome {
            status: OutcomeStatus::Pending,
            error: None,
            transaction_id: Some(transaction_id),
            external_id: Some(external_id),
            stars_count: None,
            old_balance: None,
            new_balance: None,
        })
    }

    pub async fn purchase_history(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        self.ledger
            .list_transactions(user_id, Some(TransactionType::Purchase), limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryLedgerStore;
    use crate::breaker::{CircuitBreaker, CircuitConfig};
    use crate::cache::MemoryStore;
    use crate::ledger::CallbackStatus;
    use std::time::Duration;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    fn service() -> (PurchaseService, Arc<Ledger>) {
        let remote = Arc::new(MemoryStore::new());
        let breaker = Arc::new(CircuitBreaker::new("redis", CircuitConfig::remote_cache()));
        let balance_cache = Arc::new(CacheFacade::new(
            "balance",
            Duration::from_secs(60),
            true,
            remote.clone(),
            breaker.clone(),
            100,
        ));
        let profile_cache = Arc::new(CacheFacade::new(
            "profile",
            Duration::from_secs(300),
            true,
            remote,
            breaker,
            100,
        ));
        let ledger = Arc::new(Ledger::new(
            Arc::new(MemoryLedgerStore::new()),
            balance_cache,
            "TON",
        ));
        (
            PurchaseService::new(ledger.clone(), profile_cache, PurchaseSettings::default()),
            ledger,
        )
    }

    #[tokio::test]
    async fn test_successful_balance_purchase() {
        let (service, ledger) = service();
        ledger.adjust_balance(1, &dec("100.00"), "add").await.unwrap();

        let outcome = service.purchase_with_balance(1, 40).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.stars_count, Some(40));
        assert_eq!(outcome.old_balance, Some(dec("100.00")));
        assert_eq!(outcome.new_balance, Some(dec("60.00")));

        let history = service.purchase_history(1, 10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status(), Some(TransactionStatus::Completed));
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_structured_failure() {
        let (service, ledger) = service();
        ledger.adjust_balance(1, &dec("5.00"), "add").await.unwrap();

        let outcome = service.purchase_with_balance(1, 40).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("Insufficient balance"));
        assert_eq!(outcome.old_balance, Some(dec("5.00")));

        // Nothing moved.
        assert_eq!(ledger.get_balance(1).await.unwrap().amount, dec("5.00"));
    }

    #[tokio::test]
    async fn test_amount_bounds() {
        let (service, _) = service();
        let outcome = service.purchase_with_balance(1, 0).await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("Invalid purchase amount"));

        let outcome = service.purchase_with_balance(1, 100_001).await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("Invalid purchase amount"));

        let outcome = service
            .initiate_recharge(1, dec("9.99"))
            .await
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("Invalid recharge amount"));
    }

    #[tokio::test]
    async fn test_recharge_settled_by_callback() {
        let (service, ledger) = service();

        let outcome = service.initiate_recharge(1, dec("50.00")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Pending);
        let external_id = outcome.external_id.unwrap();
        assert!(external_id.starts_with("recharge_"));

        // Balance untouched until the gateway confirms.
        assert_eq!(ledger.get_balance(1).await.unwrap().amount, dec("0"));

        assert!(ledger
            .apply_inbound_callback(&external_id, CallbackStatus::Paid, Some(&dec("50.00")))
            .await
            .unwrap());
        assert_eq!(ledger.get_balance(1).await.unwrap().amount, dec("50.00"));
    }
}
