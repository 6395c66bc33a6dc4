use std::sync::Arc;
use std::time::Duration;

use starpay_core::adapters::MemoryLedgerStore;
use starpay_core::cache::{MemoryStore, RemoteCache};
use starpay_core::config::Config;
use starpay_core::ports::LedgerStore;
use starpay_core::AppState;

pub fn test_config() -> Config {
    Config {
        server_port: 3000,
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        redis_url: None,
        webhook_secret: "test-webhook-secret".to_string(),
        default_currency: "TON".to_string(),
        cache_ttl_user: Duration::from_secs(1800),
        cache_ttl_balance: Duration::from_secs(300),
        cache_ttl_payment: Duration::from_secs(900),
        local_cache_capacity: 1000,
        cache_degrade_open: true,
        min_purchase_amount: 1,
        max_purchase_amount: 100_000,
        min_recharge_amount: 10.0,
        max_recharge_amount: 10_000.0,
        rate_limit_user_messages: 30,
        rate_limit_user_operations: 20,
        rate_limit_user_payments: 5,
        rate_limit_global_messages: 1000,
        rate_limit_global_operations: 500,
        rate_limit_global_payments: 100,
        rate_limit_burst_messages: 10,
        rate_limit_burst_operations: 5,
        rate_limit_burst_payments: 2,
        rate_limit_burst_window_secs: 10,
        rate_limit_premium_multiplier: 2.0,
        rate_limit_new_user_messages: 15,
        rate_limit_new_user_operations: 10,
        rate_limit_new_user_hours: 24,
    }
}

pub fn test_state() -> (AppState, Arc<MemoryLedgerStore>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let remote: Arc<dyn RemoteCache> = Arc::new(MemoryStore::new());
    let state = AppState::build(
        test_config(),
        store.clone() as Arc<dyn LedgerStore>,
        remote,
        Vec::new(),
    );
    (state, store)
}

pub fn state_with_remote(remote: Arc<dyn RemoteCache>) -> (AppState, Arc<MemoryLedgerStore>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let state = AppState::build(
        test_config(),
        store.clone() as Arc<dyn LedgerStore>,
        remote,
        Vec::new(),
    );
    (state, store)
}
