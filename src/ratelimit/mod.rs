//! Tiered sliding-window rate limiting.
//!
//! Mechanical layer: [`SlidingWindow`] keeps a list of call timestamps per
//! key in the remote store. Policy layer: [`RateLimiter`] classifies the
//! caller into a tier, scales the base limits, and evaluates burst, personal
//! and global ceilings in that order. Any internal failure fails open: this
//! is abuse mitigation, not a correctness mechanism.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cache::keys;
use crate::cache::remote::{CacheResult, RemoteCache};

const TIER_MEMO_TTL: Duration = Duration::from_secs(300);

/// Actions with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    Message,
    Operation,
    Payment,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::Message => "message",
            RateAction::Operation => "operation",
            RateAction::Payment => "payment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    New,
    Regular,
    Premium,
    Suspicious,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::New => "new",
            UserTier::Regular => "regular",
            UserTier::Premium => "premium",
            UserTier::Suspicious => "suspicious",
        }
    }
}

impl FromStr for UserTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(UserTier::New),
            "regular" => Ok(UserTier::Regular),
            "premium" => Ok(UserTier::Premium),
            "suspicious" => Ok(UserTier::Suspicious),
            other => Err(format!("unknown user tier: {other}")),
        }
    }
}

/// Base limits per action, before tier scaling. Counts are per minute,
/// bursts per `burst_window`.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub user_messages: u32,
    pub user_operations: u32,
    pub user_payments: u32,
    pub global_messages: u32,
    pub global_operations: u32,
    pub global_payments: u32,
    pub burst_messages: u32,
    pub burst_operations: u32,
    pub burst_payments: u32,
    pub burst_window: Duration,
    pub premium_multiplier: f64,
    pub new_user_messages: u32,
    pub new_user_operations: u32,
    pub new_user_period: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            user_messages: 30,
            user_operations: 20,
            user_payments: 5,
            global_messages: 1000,
            global_operations: 500,
            global_payments: 100,
            burst_messages: 10,
            burst_operations: 5,
            burst_payments: 2,
            burst_window: Duration::from_secs(10),
            premium_multiplier: 2.0,
            new_user_messages: 15,
            new_user_operations: 10,
            new_user_period: Duration::from_secs(24 * 3600),
        }
    }
}

/// Limits in effect for one (tier, action) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionLimits {
    pub personal: u32,
    pub global: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    BurstLimitExceeded,
    PersonalLimitExceeded,
    GlobalLimitExceeded,
}

/// Outcome of a rate-limit check. `degraded` marks a fail-open decision
/// taken because the limiter itself could not be evaluated.
#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub tier: UserTier,
    pub limits: ActionLimits,
    pub reason: Option<DenyReason>,
    pub degraded: bool,
}

impl RateDecision {
    fn allow(tier: UserTier, limits: ActionLimits) -> Self {
        Self {
            allowed: true,
            tier,
            limits,
            reason: None,
            degraded: false,
        }
    }

    fn deny(tier: UserTier, limits: ActionLimits, reason: DenyReason) -> Self {
        Self {
            allowed: false,
            tier,
            limits,
            reason: Some(reason),
            degraded: false,
        }
    }

    fn fail_open(tier: UserTier, limits: ActionLimits) -> Self {
        Self {
            allowed: true,
            tier,
            limits,
            reason: None,
            degraded: true,
        }
    }
}

/// Timestamp-list sliding window over the remote store.
pub struct SlidingWindow {
    store: Arc<dyn RemoteCache>,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn RemoteCache>) -> Self {
        Self { store }
    }

    /// Allows iff fewer than `limit` calls happened inside `window`;
    /// records the call when allowed.
    pub async fn check_and_record(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> CacheResult<bool> {
        let now = Utc::now().timestamp();
        self.prune(key, now, window).await?;

        let count = self.store.list_len(key).await?;
        if count >= limit as usize {
            return Ok(false);
        }

        self.store.list_push(key, &now.to_string()).await?;
        self.store.expire(key, window).await?;
        Ok(true)
    }

    pub async fn current_count(&self, key: &str, window: Duration) -> CacheResult<usize> {
        self.prune(key, Utc::now().timestamp(), window).await?;
        self.store.list_len(key).await
    }

    /// Drops entries older than the window. The list is newest-first
    /// (push-to-front), so fresh entries form a prefix.
    async fn prune(&self, key: &str, now: i64, window: Duration) -> CacheResult<()> {
        let cutoff = now - window.as_secs() as i64;
        let entries = self.store.list_range(key, 0, -1).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let fresh = entries
            .iter()
            .take_while(|ts| ts.parse::<i64>().map(|t| t > cutoff).unwrap_or(false))
            .count();

        if fresh == 0 {
            self.store.delete(key).await?;
        } else if fresh < entries.len() {
            self.store.list_trim(key, 0, fresh as isize - 1).await?;
        }
        Ok(())
    }
}

pub struct RateLimiter {
    window: SlidingWindow,
    store: Arc<dyn RemoteCache>,
    settings: RateLimitSettings,
    tier_memo: RwLock<HashMap<i64, (UserTier, DateTime<Utc>)>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RemoteCache>, settings: RateLimitSettings) -> Self {
        Self {
            window: SlidingWindow::new(store.clone()),
            store,
            settings,
            tier_memo: RwLock::new(HashMap::new()),
        }
    }

    /// Full check for one call: burst, then personal, then global, so
    /// abusive bursts are rejected before they count against the global cap.
    pub async fn check(&self, user_id: i64, action: RateAction) -> RateDecision {
        let tier = self.tier_of(user_id).await;
        let limits = self.limits_for(tier, action);

        let burst_key = keys::burst(&user_id.to_string(), action.as_str());
        match self
            .window
            .check_and_record(&burst_key, limits.burst, self.settings.burst_window)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user_id, action = action.as_str(), "burst limit exceeded");
                return RateDecision::deny(tier, limits, DenyReason::BurstLimitExceeded);
            }
            Err(err) => {
                tracing::error!(user_id, %err, "rate limiter degraded, failing open");
                return RateDecision::fail_open(tier, limits);
            }
        }

        let personal_key = keys::rate_limit(&user_id.to_string(), action.as_str());
        match self
            .window
            .check_and_record(&personal_key, limits.personal, Duration::from_secs(60))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user_id, action = action.as_str(), "personal limit exceeded");
                return RateDecision::deny(tier, limits, DenyReason::PersonalLimitExceeded);
            }
            Err(err) => {
                tracing::error!(user_id, %err, "rate limiter degraded, failing open");
                return RateDecision::fail_open(tier, limits);
            }
        }

        let global_key = keys::global_rate_limit(action.as_str());
        match self
            .window
            .check_and_record(&global_key, limits.global, Duration::from_secs(60))
            .await
        {
            Ok(true) => RateDecision::allow(tier, limits),
            Ok(false) => {
                tracing::warn!(action = action.as_str(), "global limit exceeded");
                RateDecision::deny(tier, limits, DenyReason::GlobalLimitExceeded)
            }
            Err(err) => {
                tracing::error!(user_id, %err, "rate limiter degraded, failing open");
                RateDecision::fail_open(tier, limits)
            }
        }
    }

    /// Base limits scaled by tier. New users get a halved burst and a capped
    /// personal limit; premium multiplies both; suspicious users drop to a
    /// quarter of personal and a burst of one.
    pub fn limits_for(&self, tier: UserTier, action: RateAction) -> ActionLimits {
        let s = &self.settings;
        let mut limits = match action {
            RateAction::Message => ActionLimits {
                personal: s.user_messages,
                global: s.global_messages,
                burst: s.burst_messages,
            },
            RateAction::Operation => ActionLimits {
                personal: s.user_operations,
                global: s.global_operations,
                burst: s.burst_operations,
            },
            RateAction::Payment => ActionLimits {
                personal: s.user_payments,
                global: s.global_payments,
                burst: s.burst_payments,
            },
        };

        match tier {
            UserTier::New => {
                let cap = match action {
                    RateAction::Message => s.new_user_messages,
                    _ => s.new_user_operations,
                };
                limits.personal = limits.personal.min(cap);
                limits.burst = (limits.burst / 2).max(1);
            }
            UserTier::Premium => {
                limits.personal = (limits.personal as f64 * s.premium_multiplier) as u32;
                limits.burst = (limits.burst as f64 * s.premium_multiplier) as u32;
            }
            UserTier::Suspicious => {
                limits.personal = (limits.personal / 4).max(1);
                limits.burst = 1;
            }
            UserTier::Regular => {}
        }

        limits
    }

    /// Tier classification, memoized in-process for five minutes.
    pub async fn tier_of(&self, user_id: i64) -> UserTier {
        {
            let memo = self.tier_memo.read().expect("tier memo lock poisoned");
            if let Some((tier, cached_at)) = memo.get(&user_id) {
                let age = Utc::now().signed_duration_since(*cached_at);
                if age.num_seconds() < TIER_MEMO_TTL.as_secs() as i64 {
                    return *tier;
                }
            }
        }

        let tier = self.classify(user_id).await;
        self.tier_memo
            .write()
            .expect("tier memo lock poisoned")
            .insert(user_id, (tier, Utc::now()));
        tier
    }

    async fn classify(&self, user_id: i64) -> UserTier {
        let result: CacheResult<UserTier> = async {
            let created_key = keys::user_created(user_id);
            match self.store.get(&created_key).await? {
                None => {
                    // First sighting: stamp it and treat as new for the
                    // configured period.
                    self.store
                        .set_ex(
                            &created_key,
                            &Utc::now().timestamp().to_string(),
                            self.settings.new_user_period,
                        )
                        .await?;
                    return Ok(UserTier::New);
                }
                Some(stamp) => {
                    let created = stamp.parse::<i64>().unwrap_or(0);
                    let age = Utc::now().timestamp() - created;
                    if age < self.settings.new_user_period.as_secs() as i64 {
                        return Ok(UserTier::New);
                    }
                }
            }

            if self.store.exists(&keys::user_premium(user_id)).await? {
                return Ok(UserTier::Premium);
            }
            if self.store.exists(&keys::user_suspicious(user_id)).await? {
                return Ok(UserTier::Suspicious);
            }
            Ok(UserTier::Regular)
        }
        .await;

        match result {
            Ok(tier) => tier,
            Err(err) => {
                tracing::error!(user_id, %err, "tier classification failed, defaulting to regular");
                UserTier::Regular
            }
        }
    }

    pub async fn mark_premium(&self, user_id: i64, duration: Duration) -> bool {
        self.mark(user_id, keys::user_premium(user_id), duration)
            .await
    }

    pub async fn mark_suspicious(&self, user_id: i64, duration: Duration) -> bool {
        self.mark(user_id, keys::user_suspicious(user_id), duration)
            .await
    }

    async fn mark(&self, user_id: i64, key: String, duration: Duration) -> bool {
        match self.store.set_ex(&key, "1", duration).await {
            Ok(()) => {
                // Drop the memoized tier so the flag takes effect now.
                self.tier_memo
                    .write()
                    .expect("tier memo lock poisoned")
                    .remove(&user_id);
                true
            }
            Err(err) => {
                tracing::error!(user_id, %err, "failed to set tier flag");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::{CacheError, MemoryStore};
    use async_trait::async_trait;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitSettings::default())
    }

    /// Marks an existing user old enough to leave the new tier.
    async fn age_out(limiter: &RateLimiter, user_id: i64) {
        let stamp = (Utc::now().timestamp() - 48 * 3600).to_string();
        limiter
            .store
            .set_ex(
                &keys::user_created(user_id),
                &stamp,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sliding_window_blocks_at_limit() {
        let store: Arc<dyn RemoteCache> = Arc::new(MemoryStore::new());
        let window = SlidingWindow::new(store);

        for _ in 0..3 {
            assert!(window
                .check_and_record("k", 3, Duration::from_secs(60))
                .await
                .unwrap());
        }
        assert!(!window
            .check_and_record("k", 3, Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(
            window.current_count("k", Duration::from_secs(60)).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_first_sighting_is_new_tier() {
        let limiter = limiter();
        assert_eq!(limiter.tier_of(1).await, UserTier::New);
        // Memoized.
        assert_eq!(limiter.tier_of(1).await, UserTier::New);
    }

    #[tokio::test]
    async fn test_aged_user_is_regular() {
        let limiter = limiter();
        age_out(&limiter, 2).await;
        assert_eq!(limiter.tier_of(2).await, UserTier::Regular);
    }

    #[tokio::test]
    async fn test_mark_premium_clears_memo() {
        let limiter = limiter();
        age_out(&limiter, 3).await;
        assert_eq!(limiter.tier_of(3).await, UserTier::Regular);

        assert!(limiter.mark_premium(3, Duration::from_secs(3600)).await);
        assert_eq!(limiter.tier_of(3).await, UserTier::Premium);
    }

    #[tokio::test]
    async fn test_suspicious_scaling() {
        let limiter = limiter();
        let limits = limiter.limits_for(UserTier::Suspicious, RateAction::Message);
        assert_eq!(limits.personal, 30 / 4);
        assert_eq!(limits.burst, 1);
    }

    #[tokio::test]
    async fn test_premium_scaling() {
        let limiter = limiter();
        let limits = limiter.limits_for(UserTier::Premium, RateAction::Operation);
        assert_eq!(limits.personal, 40);
        assert_eq!(limits.burst, 10);
    }

    #[tokio::test]
    async fn test_new_user_scaling() {
        let limiter = limiter();
        let limits = limiter.limits_for(UserTier::New, RateAction::Message);
        assert_eq!(limits.personal, 15);
        assert_eq!(limits.burst, 5);
    }

    #[tokio::test]
    async fn test_burst_denied_before_personal() {
        let limiter = limiter();
        age_out(&limiter, 4).await;

        // Payment burst is 2 per window; the third call inside the window
        // must be rejected with the burst reason.
        for _ in 0..2 {
            let d = limiter.check(4, RateAction::Payment).await;
            assert!(d.allowed, "unexpected denial: {:?}", d.reason);
        }
        let d = limiter.check(4, RateAction::Payment).await;
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(DenyReason::BurstLimitExceeded));
        assert!(!d.degraded);
    }

    #[tokio::test]
    async fn test_suspicious_user_single_payment() {
        let limiter = limiter();
        age_out(&limiter, 5).await;
        limiter.mark_suspicious(5, Duration::from_secs(3600)).await;

        let d = limiter.check(5, RateAction::Payment).await;
        assert!(d.allowed);
        assert_eq!(d.tier, UserTier::Suspicious);

        let d = limiter.check(5, RateAction::Payment).await;
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(DenyReason::BurstLimitExceeded));
    }

    struct BrokenStore;

    #[async_trait]
    impl RemoteCache for BrokenStore {
        async fn get(&self, _: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Backend("down".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> CacheResult<()> {
            Err(CacheError::Backend("down".into()))
        }
        async fn delete(&self, _: &str) -> CacheResult<bool> {
            Err(CacheError::Backend("down".into()))
        }
        async fn exists(&self, _: &str) -> CacheResult<bool> {
            Err(CacheError::Backend("down".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> CacheResult<()> {
            Err(CacheError::Backend("down".into()))
        }
        async fn keys(&self, _: &str) -> CacheResult<Vec<String>> {
            Err(CacheError::Backend("down".into()))
        }
        async fn list_push(&self, _: &str, _: &str) -> CacheResult<()> {
            Err(CacheError::Backend("down".into()))
        }
        async fn list_len(&self, _: &str) -> CacheResult<usize> {
            Err(CacheError::Backend("down".into()))
        }
        async fn list_range(&self, _: &str, _: isize, _: isize) -> CacheResult<Vec<String>> {
            Err(CacheError::Backend("down".into()))
        }
        async fn list_trim(&self, _: &str, _: isize, _: isize) -> CacheResult<()> {
            Err(CacheError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), RateLimitSettings::default());
        let d = limiter.check(9, RateAction::Message).await;
        assert!(d.allowed);
        assert!(d.degraded);
        // Classification also failed, so the caller is treated as regular.
        assert_eq!(d.tier, UserTier::Regular);
    }
}
