//! Inbound payment callback endpoint.
//!
//! The gateway signs a canonical JSON form of the payload (keys sorted,
//! compact separators) with HMAC-SHA256 and sends the hex digest in
//! `X-Signature`. Verification failures are 401, malformed payloads 400,
//! unknown external ids 404. A repeated callback for a settled transaction
//! is a 200: the gateway retries until it sees success.

use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::str::FromStr;

use crate::error::AppError;
use crate::ledger::CallbackStatus;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub uuid: Option<String>,
    pub status: Option<String>,
    pub amount: Option<String>,
}

/// Canonical signing form. Field order is the sorted key order; serde_json
/// emits compact separators, so serializing this struct reproduces the
/// gateway's canonical bytes.
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    amount: &'a str,
    status: &'a str,
    uuid: &'a str,
}

pub fn compute_signature(secret: &str, uuid: &str, status: &str, amount: &str) -> String {
    let canonical = serde_json::to_string(&CanonicalPayload {
        amount,
        status,
        uuid,
    })
    .unwrap_or_default();

    // HMAC accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key of any length is valid");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(
    secret: &str,
    uuid: &str,
    status: &str,
    amount: &str,
    provided_hex: &str,
) -> bool {
    let canonical = serde_json::to_string(&CanonicalPayload {
        amount,
        status,
        uuid,
    })
    .unwrap_or_default();

    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    // Constant-time comparison.
    mac.verify_slice(&provided).is_ok()
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing signature".to_string()))?;

    let uuid = payload.uuid.as_deref().unwrap_or_default();
    let status = payload.status.as_deref().unwrap_or_default();
    let amount = payload.amount.as_deref().unwrap_or_default();

    if !verify_signature(&state.config.webhook_secret, uuid, status, amount, signature) {
        tracing::warn!("webhook rejected: invalid signature");
        return Err(AppError::Unauthorized("invalid signature".to_string()));
    }

    if uuid.is_empty() || status.is_empty() {
        return Err(AppError::BadRequest("missing uuid or status".to_string()));
    }

    let status = CallbackStatus::from_str(status)
        .map_err(|_| AppError::BadRequest(format!("unknown status: {status}")))?;

    let reported_amount = match payload.amount.as_deref() {
        Some(raw) => Some(
            BigDecimal::from_str(raw)
                .map_err(|_| AppError::BadRequest(format!("invalid amount: {raw}")))?,
        ),
        None => None,
    };

    // Recharge callbacks are distinguished by external-id prefix; both paths
    // converge on the ledger, which settles by transaction type.
    let kind = if uuid.starts_with("recharge_") {
        "recharge"
    } else {
        "purchase"
    };
    tracing::info!(external_id = uuid, kind, "payment webhook received");

    let applied = state
        .ledger
        .apply_inbound_callback(uuid, status, reported_amount.as_ref())
        .await?;

    if !applied {
        return Err(AppError::NotFound(format!(
            "no transaction for external id {uuid}"
        )));
    }

    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let sig = compute_signature("secret", "recharge_1", "paid", "25.00");
        assert!(verify_signature("secret", "recharge_1", "paid", "25.00", &sig));
        assert!(!verify_signature("secret", "recharge_1", "paid", "26.00", &sig));
        assert!(!verify_signature("other", "recharge_1", "paid", "25.00", &sig));
        assert!(!verify_signature("secret", "recharge_1", "paid", "25.00", "zz"));
    }

    #[test]
    fn test_canonical_form_is_sorted_and_compact() {
        let canonical = serde_json::to_string(&CanonicalPayload {
            amount: "25.00",
            status: "paid",
            uuid: "abc",
        })
        .unwrap();
        assert_eq!(canonical, r#"{"amount":"25.00","status":"paid","uuid":"abc"}"#);
    }
}
