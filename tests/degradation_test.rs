//! Behavior with the remote cache store down: reads and purchases keep
//! working, the rate limiter fails open, and health reports degraded
//! rather than dead.

mod common;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use starpay_core::cache::{CacheError, CacheResult, RemoteCache};
use starpay_core::create_app;
use starpay_core::ports::{BalanceOp, LedgerStore};

struct DownStore;

#[async_trait]
impl RemoteCache for DownStore {
    async fn get(&self, _: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn delete(&self, _: &str) -> CacheResult<bool> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn exists(&self, _: &str) -> CacheResult<bool> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn expire(&self, _: &str, _: Duration) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn keys(&self, _: &str) -> CacheResult<Vec<String>> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn list_push(&self, _: &str, _: &str) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn list_len(&self, _: &str) -> CacheResult<usize> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn list_range(&self, _: &str, _: isize, _: isize) -> CacheResult<Vec<String>> {
        Err(CacheError::Backend("connection refused".into()))
    }
    async fn list_trim(&self, _: &str, _: isize, _: isize) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_balance_reads_survive_cache_outage() {
    let (state, store) = common::state_with_remote(Arc::new(DownStore));
    let account_id = store.get_or_create_user(7).await.unwrap();
    store
        .adjust_balance(account_id, &dec("42.00"), BalanceOp::Add, "TON")
        .await
        .unwrap();
    let app = create_app(state);

    // Repeated reads: every one must come back from the store of record.
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/balance/7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let amount: BigDecimal = serde_json::from_value(body["amount"].clone()).unwrap();
        assert_eq!(amount, dec("42.00"));
    }
}

#[tokio::test]
async fn test_purchase_succeeds_with_cache_down() {
    let (state, store) = common::state_with_remote(Arc::new(DownStore));
    let account_id = store.get_or_create_user(1).await.unwrap();
    store
        .adjust_balance(account_id, &dec("100.00"), BalanceOp::Add, "TON")
        .await
        .unwrap();
    let app = create_app(state);

    // Rate limiter cannot reach its store, so it fails open; the purchase
    // itself only needs the ledger.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/users/1/purchase")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "stars": 30 }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");

    let balance = store.get_balance(account_id).await.unwrap().unwrap();
    assert_eq!(balance.amount, dec("70.00"));
}

#[tokio::test]
async fn test_breaker_trips_and_recovers_visibility() {
    let (state, _) = common::state_with_remote(Arc::new(DownStore));
    let app = create_app(state.clone());

    // Drive enough failing cache reads to trip the remote_cache circuit.
    for _ in 0..5 {
        let _ = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/balance/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let snapshots = state.breakers.snapshots();
    let cache_circuit = snapshots
        .iter()
        .find(|s| s.name == "remote_cache")
        .expect("remote_cache circuit registered");
    assert_eq!(cache_circuit.state, "open");

    // Health folds the open circuit into "degraded".
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
}
