use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::ratelimit::RateLimitSettings;
use crate::services::PurchaseSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// Absent means no Redis: the in-memory store backs caching and
    /// rate limiting for this process.
    pub redis_url: Option<String>,
    pub webhook_secret: String,
    pub default_currency: String,

    pub cache_ttl_user: Duration,
    pub cache_ttl_balance: Duration,
    pub cache_ttl_payment: Duration,
    pub local_cache_capacity: usize,
    /// Absorb remote-cache failures into the local tier instead of
    /// surfacing them.
    pub cache_degrade_open: bool,

    pub min_purchase_amount: i64,
    pub max_purchase_amount: i64,
    pub min_recharge_amount: f64,
    pub max_recharge_amount: f64,

    pub rate_limit_user_messages: u32,
    pub rate_limit_user_operations: u32,
    pub rate_limit_user_payments: u32,
    pub rate_limit_global_messages: u32,
    pub rate_limit_global_operations: u32,
    pub rate_limit_global_payments: u32,
    pub rate_limit_burst_messages: u32,
    pub rate_limit_burst_operations: u32,
    pub rate_limit_burst_payments: u32,
    pub rate_limit_burst_window_secs: u64,
    pub rate_limit_premium_multiplier: f64,
    pub rate_limit_new_user_messages: u32,
    pub rate_limit_new_user_operations: u32,
    pub rate_limit_new_user_hours: u64,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => Ok(raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}: {e}"))?),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: var_or("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: env::var("REDIS_URL").ok(),
            webhook_secret: env::var("WEBHOOK_SECRET")?,
            default_currency: var_or("DEFAULT_CURRENCY", "TON".to_string())?,

            cache_ttl_user: Duration::from_secs(var_or("CACHE_TTL_USER", 1800)?),
            cache_ttl_balance: Duration::from_secs(var_or("CACHE_TTL_BALANCE", 300)?),
            cache_ttl_payment: Duration::from_secs(var_or("CACHE_TTL_PAYMENT", 900)?),
            local_cache_capacity: var_or("LOCAL_CACHE_CAPACITY", 10_000)?,
            cache_degrade_open: var_or("CACHE_DEGRADE_OPEN", true)?,

            min_purchase_amount: var_or("MIN_PURCHASE_AMOUNT", 1)?,
            max_purchase_amount: var_or("MAX_PURCHASE_AMOUNT", 100_000)?,
            min_recharge_amount: var_or("MIN_RECHARGE_AMOUNT", 10.0)?,
            max_recharge_amount: var_or("MAX_RECHARGE_AMOUNT", 10_000.0)?,

            rate_limit_user_messages: var_or("RATE_LIMIT_USER_MESSAGES", 30)?,
            rate_limit_user_operations: var_or("RATE_LIMIT_USER_OPERATIONS", 20)?,
            rate_limit_user_payments: var_or("RATE_LIMIT_USER_PAYMENTS", 5)?,
            rate_limit_global_messages: var_or("RATE_LIMIT_GLOBAL_MESSAGES", 1000)?,
            rate_limit_global_operations: var_or("RATE_LIMIT_GLOBAL_OPERATIONS", 500)?,
            rate_limit_global_payments: var_or("RATE_LIMIT_GLOBAL_PAYMENTS", 100)?,
            rate_limit_burst_messages: var_or("RATE_LIMIT_BURST_MESSAGES", 10)?,
            rate_limit_burst_operations: var_or("RATE_LIMIT_BURST_OPERATIONS", 5)?,
            rate_limit_burst_payments: var_or("RATE_LIMIT_BURST_PAYMENTS", 2)?,
            rate_limit_burst_window_secs: var_or("RATE_LIMIT_BURST_WINDOW", 10)?,
            rate_limit_premium_multiplier: var_or("RATE_LIMIT_PREMIUM_MULTIPLIER", 2.0)?,
            rate_limit_new_user_messages: var_or("RATE_LIMIT_NEW_USER_MESSAGES", 15)?,
            rate_limit_new_user_operations: var_or("RATE_LIMIT_NEW_USER_OPERATIONS", 10)?,
            rate_limit_new_user_hours: var_or("RATE_LIMIT_NEW_USER_HOURS", 24)?,
        })
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            user_messages: self.rate_limit_user_messages,
            user_operations: self.rate_limit_user_operations,
            user_payments: self.rate_limit_user_payments,
            global_messages: self.rate_limit_global_messages,
            global_operations: self.rate_limit_global_operations,
            global_payments: self.rate_limit_global_payments,
            burst_messages: self.rate_limit_burst_messages,
            burst_operations: self.rate_limit_burst_operations,
            burst_payments: self.rate_limit_burst_payments,
            burst_window: Duration::from_secs(self.rate_limit_burst_window_secs),
            premium_multiplier: self.rate_limit_premium_multiplier,
            new_user_messages: self.rate_limit_new_user_messages,
            new_user_operations: self.rate_limit_new_user_operations,
            new_user_period: Duration::from_secs(self.rate_limit_new_user_hours * 3600),
        }
    }

    pub fn purchase_settings(&self) -> PurchaseSettings {
        PurchaseSettings {
            min_purchase_amount: self.min_purchase_amount,
            max_purchase_amount: self.max_purchase_amount,
            min_recharge_amount: bigdecimal::BigDecimal::try_from(self.min_recharge_amount)
                .unwrap_or_else(|_| bigdecimal::BigDecimal::from(10)),
            max_recharge_amount: bigdecimal::BigDecimal::try_from(self.max_recharge_amount)
                .unwrap_or_else(|_| bigdecimal::BigDecimal::from(10_000)),
            currency: self.default_currency.clone(),
        }
    }
}
