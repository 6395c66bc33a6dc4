pub mod balance;
pub mod webhook;

use axum::{extract::State, response::IntoResponse, Json};

use crate::health;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = health::evaluate(&state.checkers, state.breakers.snapshots()).await;
    Json(report)
}
