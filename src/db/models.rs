use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub external_user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// One row per user; `amount` is mutated only through the ledger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_type: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn transaction_type(&self) -> Option<TransactionType> {
        self.transaction_type.parse().ok()
    }

    pub fn status(&self) -> Option<TransactionStatus> {
        self.status.parse().ok()
    }

    pub fn metadata(&self) -> Option<TransactionMetadata> {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Refund,
    Bonus,
    Adjustment,
    Recharge,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Refund => "refund",
            TransactionType::Bonus => "bonus",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Recharge => "recharge",
        }
    }

    /// Whether completing a transaction of this type moves the balance,
    /// and in which direction.
    pub fn balance_effect(&self) -> BalanceEffect {
        match self {
            TransactionType::Purchase => BalanceEffect::Debit,
            TransactionType::Refund | TransactionType::Bonus | TransactionType::Recharge => {
                BalanceEffect::Credit
            }
            TransactionType::Adjustment => BalanceEffect::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEffect {
    Credit,
    Debit,
    None,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionType::Purchase),
            "refund" => Ok(TransactionType::Refund),
            "bonus" => Ok(TransactionType::Bonus),
            "adjustment" => Ok(TransactionType::Adjustment),
            "recharge" => Ok(TransactionType::Recharge),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Versioned transaction metadata stored in the `metadata` text column.
///
/// Tagged so the schema can evolve without breaking rows written by older
/// builds; unknown versions deserialize to `None` at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum TransactionMetadata {
    #[serde(rename = "1")]
    V1 {
        #[serde(skip_serializing_if = "Option::is_none")]
        stars_count: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        purchase_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payment_status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_received_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cancelled_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl TransactionMetadata {
    pub fn v1() -> Self {
        TransactionMetadata::V1 {
            stars_count: None,
            purchase_type: None,
            payment_status: None,
            webhook_received_at: None,
            cancelled_at: None,
            note: None,
        }
    }

    pub fn to_column(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
