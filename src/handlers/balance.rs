//! Balance, purchase and transaction endpoints.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use crate::db::models::TransactionType;
use crate::error::AppError;
use crate::ratelimit::RateAction;
use crate::AppState;

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = state.ledger.ensure_user(user_id).await?;
    let view = state.ledger.get_balance(account_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let transaction_type = match query.transaction_type.as_deref() {
        Some(raw) => Some(
            TransactionType::from_str(raw).map_err(AppError::Validation)?,
        ),
        None => None,
    };

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let account_id = state.ledger.ensure_user(user_id).await?;
    let transactions = state
        .ledger
        .list_transactions(account_id, transaction_type, limit, offset)
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub stars: i64,
}

pub async fn purchase(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let decision = state.rate_limiter.check(user_id, RateAction::Payment).await;
    if !decision.allowed {
        return Err(AppError::RateLimited(format!(
            "payment limit reached for tier {}",
            decision.tier.as_str()
        )));
    }

    let account_id = state.ledger.ensure_user(user_id).await?;
    let outcome = state
        .purchases
        .purchase_with_balance(account_id, req.stars)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    pub amount: String,
}

pub async fn recharge(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<RechargeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let decision = state.rate_limiter.check(user_id, RateAction::Payment).await;
    if !decision.allowed {
        return Err(AppError::RateLimited(format!(
            "payment limit reached for tier {}",
            decision.tier.as_str()
        )));
    }

    let amount = BigDecimal::from_str(&req.amount)
        .map_err(|_| AppError::Validation(format!("invalid amount: {}", req.amount)))?;

    let account_id = state.ledger.ensure_user(user_id).await?;
    let outcome = state.purchases.initiate_recharge(account_id, amount).await?;
    Ok(Json(outcome))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path((user_id, transaction_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = state.ledger.ensure_user(user_id).await?;
    let Some(tx) = state.ledger.get_transaction(transaction_id).await? else {
        return Err(AppError::NotFound(format!(
            "transaction {transaction_id} not found"
        )));
    };
    if tx.user_id != account_id {
        return Err(AppError::NotFound(format!(
            "transaction {transaction_id} not found"
        )));
    }

    let cancelled = state.ledger.cancel_and_refund(transaction_id).await?;
    if !cancelled {
        return Err(AppError::BadRequest(
            "only pending purchases can be cancelled".to_string(),
        ));
    }

    Ok(Json(json!({ "status": "cancelled", "transaction_id": transaction_id })))
}
