pub mod adapters;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ledger;
pub mod middleware;
pub mod ports;
pub mod ratelimit;
pub mod services;
pub mod startup;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::breaker::{BreakerRegistry, CircuitConfig};
use crate::cache::{CacheFacade, RemoteCache};
use crate::config::Config;
use crate::health::DependencyChecker;
use crate::ledger::Ledger;
use crate::ports::LedgerStore;
use crate::ratelimit::RateLimiter;
use crate::services::PurchaseService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<Ledger>,
    pub purchases: Arc<PurchaseService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breakers: Arc<BreakerRegistry>,
    pub checkers: Arc<Vec<Box<dyn DependencyChecker>>>,
}

impl AppState {
    /// Wires the service graph over whichever store and remote-cache
    /// adapters the caller provides.
    pub fn build(
        config: Config,
        store: Arc<dyn LedgerStore>,
        remote: Arc<dyn RemoteCache>,
        checkers: Vec<Box<dyn DependencyChecker>>,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new());
        let cache_breaker = breakers.get_or_create("remote_cache", CircuitConfig::remote_cache());

        let balance_cache = Arc::new(CacheFacade::new(
            "balance",
            config.cache_ttl_balance,
            config.cache_degrade_open,
            remote.clone(),
            cache_breaker.clone(),
            config.local_cache_capacity,
        ));
        let profile_cache = Arc::new(CacheFacade::new(
            "profile",
            config.cache_ttl_user,
            config.cache_degrade_open,
            remote.clone(),
            cache_breaker,
            config.local_cache_capacity,
        ));

        let ledger = Arc::new(Ledger::new(
            store,
            balance_cache,
            config.default_currency.clone(),
        ));
        let purchases = Arc::new(PurchaseService::new(
            ledger.clone(),
            profile_cache,
            config.purchase_settings(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(remote, config.rate_limit_settings()));

        Self {
            config: Arc::new(config),
            ledger,
            purchases,
            rate_limiter,
            breakers,
            checkers: Arc::new(checkers),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/webhook/payment", post(handlers::webhook::payment_webhook))
        .route("/balance/:user_id", get(handlers::balance::get_balance))
        .route(
            "/users/:user_id/transactions",
            get(handlers::balance::list_transactions),
        )
        .route(
            "/users/:user_id/purchase",
            post(handlers::balance::purchase),
        )
        .route(
            "/users/:user_id/recharge",
            post(handlers::balance::recharge),
        )
        .route(
            "/users/:user_id/transactions/:transaction_id/cancel",
            post(handlers::balance::cancel_transaction),
        )
        .layer(axum_middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
