pub mod facade;
pub mod local;
pub mod remote;

pub use facade::CacheFacade;
pub use local::LocalCache;
pub use remote::{CacheError, CacheResult, MemoryStore, RedisStore, RemoteCache};

/// Key namespace builders. All cache keys in the system come from here so
/// invalidation patterns and keys can never drift apart.
pub mod keys {
    pub fn user_profile(user_id: i64) -> String {
        format!("user:{user_id}:profile")
    }

    pub fn user_balance(user_id: i64) -> String {
        format!("user:{user_id}:balance")
    }

    pub fn user_activity(user_id: i64) -> String {
        format!("user:{user_id}:activity")
    }

    /// Pattern matching every cached entry for one user.
    pub fn user_pattern(user_id: i64) -> String {
        format!("user:{user_id}:*")
    }

    pub fn payment(payment_id: &str) -> String {
        format!("payment:{payment_id}")
    }

    pub fn rate_limit(subject: &str, action: &str) -> String {
        format!("rate_limit:{subject}:{action}")
    }

    pub fn global_rate_limit(action: &str) -> String {
        format!("global_rate_limit:{action}")
    }

    pub fn burst(subject: &str, action: &str) -> String {
        format!("burst:{subject}:{action}")
    }

    pub fn user_created(user_id: i64) -> String {
        format!("user_created:{user_id}")
    }

    pub fn user_premium(user_id: i64) -> String {
        format!("user_premium:{user_id}")
    }

    pub fn user_suspicious(user_id: i64) -> String {
        format!("user_suspicious:{user_id}")
    }
}
