//! Cache-aside facade with graceful degradation.
//!
//! One facade per key namespace. Reads try the local cache first, then the
//! remote store through the namespace's circuit breaker; writes go remote
//! first and mirror locally. With `degrade_open` set, remote failures are
//! absorbed: reads come back as misses and writes land in the local cache
//! only, so callers never see the outage.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::cache::local::LocalCache;
use crate::cache::remote::{CacheError, CacheResult, RemoteCache};

/// Every remote value is wrapped so freshness can be judged by the facade's
/// own TTL, independent of the remote store's expiry.
#[derive(Serialize, Deserialize)]
struct Envelope {
    cached_at: i64,
    data: serde_json::Value,
}

pub struct CacheFacade {
    namespace: String,
    ttl: Duration,
    degrade_open: bool,
    remote: Arc<dyn RemoteCache>,
    local: LocalCache,
    breaker: Arc<CircuitBreaker>,
}

impl CacheFacade {
    pub fn new(
        namespace: impl Into<String>,
        ttl: Duration,
        degrade_open: bool,
        remote: Arc<dyn RemoteCache>,
        breaker: Arc<CircuitBreaker>,
        local_capacity: usize,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            ttl,
            degrade_open,
            remote,
            local: LocalCache::new(ttl, local_capacity),
            breaker,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        if let Some(value) = self.local.get(key) {
            return Ok(Some(serde_json::from_value(value)?));
        }

        let raw = match self.remote_get(key).await {
            Ok(raw) => raw,
            Err(err) => return self.absorb(key, "get", err).map(|_| None),
        };

        let Some(raw) = raw else { return Ok(None) };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Unreadable entry; drop it rather than poisoning callers.
                tracing::warn!(namespace = %self.namespace, key, %err, "discarding malformed cache entry");
                let _ = self.remote_delete(key).await;
                return Ok(None);
            }
        };

        let age = Utc::now().timestamp() - envelope.cached_at;
        if age >= self.ttl.as_secs() as i64 {
            let _ = self.remote_delete(key).await;
            return Ok(None);
        }

        self.local.set(key, envelope.data.clone());
        Ok(Some(serde_json::from_value(envelope.data)?))
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let data = serde_json::to_value(value)?;
        let envelope = Envelope {
            cached_at: Utc::now().timestamp(),
            data: data.clone(),
        };
        let raw = serde_json::to_string(&envelope)?;

        match self
            .breaker
            .call(self.remote.set_ex(key, &raw, self.ttl))
            .await
        {
            Ok(()) => {
                self.local.set(key, data);
                Ok(())
            }
            Err(err) => {
                // Local-only write keeps the value visible to this process.
                self.local.set(key, data);
                self.absorb(key, "set", err)
            }
        }
    }

    /// Removes a single key from both tiers. Returns whether the remote
    /// store held it; false also covers a degraded remote.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.local.remove(key);
        match self.remote_delete(key).await {
            Ok(existed) => existed,
            Err(err) => {
                self.log_degraded(key, "invalidate", &err);
                false
            }
        }
    }

    /// Removes every key matching a trailing-star pattern. Returns false when
    /// the remote store could not be reached.
    pub async fn invalidate_pattern(&self, pattern: &str) -> bool {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        self.local.remove_prefix(prefix);

        let keys = match self.breaker.call(self.remote.keys(pattern)).await {
            Ok(keys) => keys,
            Err(err) => {
                self.log_degraded(pattern, "invalidate_pattern", &err);
                return false;
            }
        };

        for key in &keys {
            if let Err(err) = self.remote_delete(key).await {
                self.log_degraded(key, "invalidate_pattern", &err);
                return false;
            }
        }
        true
    }

    async fn remote_get(&self, key: &str) -> Result<Option<String>, BreakerError<CacheError>> {
        self.breaker.call(self.remote.get(key)).await
    }

    async fn remote_delete(&self, key: &str) -> Result<bool, BreakerError<CacheError>> {
        self.breaker.call(self.remote.delete(key)).await
    }

    fn absorb(&self, key: &str, op: &str, err: BreakerError<CacheError>) -> CacheResult<()> {
        if self.degrade_open {
            self.log_degraded(key, op, &err);
            Ok(())
        } else {
            match err {
                BreakerError::Open(name) => Err(CacheError::Backend(format!(
                    "circuit {name} is open"
                ))),
                BreakerError::Inner(inner) => Err(inner),
            }
        }
    }

    fn log_degraded(&self, key: &str, op: &str, err: &BreakerError<CacheError>) {
        tracing::warn!(
            namespace = %self.namespace,
            key,
            op,
            error = %err,
            "remote cache unavailable, serving degraded"
        );
    }
}
